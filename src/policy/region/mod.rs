mod block_offset_table;
mod card;
mod cset_state;
mod mark_bitmap;
mod region;
mod remset;

pub use self::block_offset_table::*;
pub use self::card::*;
pub use self::cset_state::*;
pub use self::mark_bitmap::*;
pub use self::region::*;
pub use self::remset::*;

use crate::util::constants::LOG_BYTES_IN_CARD;
use crate::util::conversions;
use crate::util::Address;

/// The layout of the reserved heap: a contiguous range divided into equally sized regions.
///
/// Regions are numbered from the bottom of the heap. All region and card lookups are shifts and
/// subtractions against the heap start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapGeometry {
    start: Address,
    end: Address,
    log_region_size: u8,
}

impl HeapGeometry {
    pub fn new(start: Address, size: usize, region_size: usize) -> Self {
        debug_assert!(region_size.is_power_of_two());
        debug_assert!(start.is_aligned_to(region_size));
        debug_assert!(conversions::raw_is_aligned(size, region_size));
        Self {
            start,
            end: start + size,
            log_region_size: conversions::log2(region_size),
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn log_region_size(&self) -> u8 {
        self.log_region_size
    }

    pub fn region_size(&self) -> usize {
        1 << self.log_region_size
    }

    pub fn num_regions(&self) -> usize {
        self.size() >> self.log_region_size
    }

    pub fn cards_per_region(&self) -> usize {
        1 << (self.log_region_size - LOG_BYTES_IN_CARD)
    }

    pub fn num_cards(&self) -> usize {
        self.size() >> LOG_BYTES_IN_CARD
    }

    #[inline(always)]
    pub fn is_in_reserved(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end
    }

    /// The index of the region containing `addr`.
    #[inline(always)]
    pub fn region_index(&self, addr: Address) -> usize {
        debug_assert!(self.is_in_reserved(addr), "{} is not in the heap", addr);
        (addr - self.start) >> self.log_region_size
    }

    #[inline(always)]
    pub fn region_bottom(&self, index: usize) -> Address {
        self.start + (index << self.log_region_size)
    }

    /// Are `a` and `b` in the same region? This is a pure address comparison.
    #[inline(always)]
    pub fn is_in_same_region(&self, a: Address, b: Address) -> bool {
        (a.as_usize() ^ b.as_usize()) >> self.log_region_size == 0
    }

    /// The heap-wide index of the card containing `addr`.
    #[inline(always)]
    pub fn card_index(&self, addr: Address) -> usize {
        debug_assert!(self.is_in_reserved(addr), "{} is not in the heap", addr);
        (addr - self.start) >> LOG_BYTES_IN_CARD
    }

    #[inline(always)]
    pub fn card_at(&self, index: usize) -> Card {
        Card::of(self.start + (index << LOG_BYTES_IN_CARD))
    }
}
