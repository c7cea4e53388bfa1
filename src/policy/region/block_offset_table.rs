use atomic::{Atomic, Ordering};

use super::{Card, HeapGeometry};
use crate::util::constants::BYTES_IN_CARD;
use crate::util::Address;

/// For every card of the heap, the start of the block (object) that covers the first word of
/// the card.
///
/// Card scanning needs to find the first object that intersects a card without walking the
/// whole region. Allocation records each new block here, so that [`block_start`] is a single
/// load. An entry is zero while no block covers the start of its card.
///
/// [`block_start`]: G1BlockOffsetTable::block_start
pub struct G1BlockOffsetTable {
    geometry: HeapGeometry,
    table: Box<[Atomic<Address>]>,
}

impl G1BlockOffsetTable {
    pub fn new(geometry: HeapGeometry) -> Self {
        let table = (0..geometry.num_cards())
            .map(|_| Atomic::new(Address::ZERO))
            .collect();
        Self { geometry, table }
    }

    /// Record the block `[start, end)`. Every card whose first word lies in the block now
    /// resolves to `start`.
    pub fn alloc_block(&self, start: Address, end: Address) {
        debug_assert!(start < end);
        let mut card = Card::of(start);
        if card.start() < start {
            card = Card::of(card.end());
        }
        while card.start() < end {
            self.table[self.geometry.card_index(card.start())].store(start, Ordering::Release);
            card = Card::of(card.end());
        }
    }

    /// The start of the block covering the first word of `card`, or `None` if no block has
    /// been recorded there yet.
    pub fn block_start(&self, card: Card) -> Option<Address> {
        let start = self.table[self.geometry.card_index(card.start())].load(Ordering::Acquire);
        if start.is_zero() {
            None
        } else {
            debug_assert!(start <= card.start());
            Some(start)
        }
    }

    /// Forget all blocks in `[start, end)`.
    pub fn clear_range(&self, start: Address, end: Address) {
        let mut cursor = Card::align(start);
        while cursor < end {
            self.table[self.geometry.card_index(cursor)].store(Address::ZERO, Ordering::Relaxed);
            cursor += BYTES_IN_CARD;
        }
    }
}
