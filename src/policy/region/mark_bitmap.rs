use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD, LOG_BYTES_PER_MARK_BIT};
use crate::util::{Address, ObjectReference};

/// A liveness bitmap covering the whole heap, one bit per heap word.
pub struct MarkBitmap {
    start: Address,
    end: Address,
    words: Box<[AtomicUsize]>,
}

impl MarkBitmap {
    pub fn new(start: Address, end: Address) -> Self {
        let bits = (end - start) >> LOG_BYTES_PER_MARK_BIT;
        let words = (0..bits.div_ceil(BITS_IN_WORD))
            .map(|_| AtomicUsize::new(0))
            .collect();
        Self { start, end, words }
    }

    #[inline(always)]
    fn bit_index(&self, addr: Address) -> usize {
        debug_assert!(
            self.start <= addr && addr < self.end,
            "{} is not covered by the bitmap",
            addr
        );
        (addr - self.start) >> LOG_BYTES_PER_MARK_BIT
    }

    #[inline(always)]
    fn entry(&self, bit: usize) -> (&AtomicUsize, usize) {
        (
            &self.words[bit >> LOG_BITS_IN_WORD],
            1usize << (bit & (BITS_IN_WORD - 1)),
        )
    }

    /// Atomically set the bit of `addr`. Returns true if this call set it, false if it was set
    /// already. Marking twice leaves the bitmap unchanged.
    #[inline(always)]
    pub fn par_mark(&self, addr: Address) -> bool {
        let (word, mask) = self.entry(self.bit_index(addr));
        if word.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        word.fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    #[inline(always)]
    pub fn is_marked_addr(&self, addr: Address) -> bool {
        let (word, mask) = self.entry(self.bit_index(addr));
        word.load(Ordering::Relaxed) & mask != 0
    }

    #[inline(always)]
    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.is_marked_addr(object.to_raw_address())
    }

    pub fn clear(&self, addr: Address) {
        let (word, mask) = self.entry(self.bit_index(addr));
        word.fetch_and(!mask, Ordering::Relaxed);
    }

    /// Clear the bits of `[start, end)`.
    pub fn clear_range(&self, start: Address, end: Address) {
        if start >= end {
            return;
        }
        let first = self.bit_index(start);
        let last = self.bit_index(end - 1usize) + 1;
        let mut bit = first;
        // Partial head word.
        while bit < last && bit & (BITS_IN_WORD - 1) != 0 {
            let (word, mask) = self.entry(bit);
            word.fetch_and(!mask, Ordering::Relaxed);
            bit += 1;
        }
        while bit + BITS_IN_WORD <= last {
            self.words[bit >> LOG_BITS_IN_WORD].store(0, Ordering::Relaxed);
            bit += BITS_IN_WORD;
        }
        while bit < last {
            let (word, mask) = self.entry(bit);
            word.fetch_and(!mask, Ordering::Relaxed);
            bit += 1;
        }
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Is any bit of `[start, end)` set?
    pub fn is_range_clear(&self, start: Address, end: Address) -> bool {
        let mut cursor = start;
        while cursor < end {
            if self.is_marked_addr(cursor) {
                return false;
            }
            cursor += 1usize << LOG_BYTES_PER_MARK_BIT;
        }
        true
    }
}
