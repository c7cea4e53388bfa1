use std::fmt;

use atomic::{Atomic, Ordering};
use bytemuck::NoUninit;

use super::HeapGeometry;
use crate::util::constants::BYTES_IN_CARD;
use crate::util::Address;

/// A card: a [`BYTES_IN_CARD`]-byte aligned chunk of the heap, identified by its start address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Card(Address);

impl Card {
    #[inline(always)]
    pub fn align(address: Address) -> Address {
        address.align_down(BYTES_IN_CARD)
    }

    /// The card containing `address`.
    #[inline(always)]
    pub fn of(address: Address) -> Self {
        Self(Self::align(address))
    }

    #[inline(always)]
    pub fn start(&self) -> Address {
        self.0
    }

    #[inline(always)]
    pub fn end(&self) -> Address {
        self.0 + BYTES_IN_CARD
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Card({})", self.0)
    }
}

/// The state of a card table entry.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum CardValue {
    /// A mutator stored a reference into the card and it has not been refined yet.
    Dirty = 0,
    /// An evacuation pause found a cross-region reference in the card and queued it for
    /// remembered set insertion after the pause.
    Deferred = 2,
    Clean = 0xff,
}

/// One byte per card of the heap.
pub struct CardTable {
    geometry: HeapGeometry,
    table: Box<[Atomic<CardValue>]>,
}

impl CardTable {
    pub fn new(geometry: HeapGeometry) -> Self {
        let table = (0..geometry.num_cards())
            .map(|_| Atomic::new(CardValue::Clean))
            .collect();
        Self { geometry, table }
    }

    #[inline(always)]
    fn entry(&self, card: Card) -> &Atomic<CardValue> {
        &self.table[self.geometry.card_index(card.start())]
    }

    pub fn get(&self, card: Card) -> CardValue {
        self.entry(card).load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self, card: Card) -> bool {
        self.get(card) == CardValue::Dirty
    }

    /// The post-write barrier: remember that `card` may hold a new cross-region reference.
    pub fn mark_dirty(&self, card: Card) {
        self.entry(card).store(CardValue::Dirty, Ordering::Release);
    }

    /// Mark `card` deferred. Returns false if it already was, in which case the card has already
    /// been recorded by some worker in this pause.
    pub fn mark_card_deferred(&self, card: Card) -> bool {
        let entry = self.entry(card);
        let mut current = entry.load(Ordering::Relaxed);
        loop {
            if current == CardValue::Deferred {
                return false;
            }
            match entry.compare_exchange_weak(
                current,
                CardValue::Deferred,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(witness) => current = witness,
            }
        }
    }

    /// Claim a dirty card for refinement by cleaning it. Returns false if the card was not dirty
    /// or another refinement thread claimed it first.
    pub fn clean_card_if_dirty(&self, card: Card) -> bool {
        self.entry(card)
            .compare_exchange(
                CardValue::Dirty,
                CardValue::Clean,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    pub fn clear(&self, card: Card) {
        self.entry(card).store(CardValue::Clean, Ordering::Relaxed);
    }

    /// Clean every card of `[start, end)`.
    pub fn clear_range(&self, start: Address, end: Address) {
        let mut cursor = Card::align(start);
        while cursor < end {
            self.clear(Card::of(cursor));
            cursor += BYTES_IN_CARD;
        }
    }

    pub fn count(&self, value: CardValue) -> usize {
        self.table
            .iter()
            .filter(|e| e.load(Ordering::Relaxed) == value)
            .count()
    }
}
