use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use atomic::Atomic;
use bytemuck::NoUninit;

use super::{Card, HeapGeometry};
use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD, LOG_BYTES_IN_CARD};
use crate::util::Address;

/// Whether a remembered set accepts new entries.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit)]
pub enum RemSetState {
    /// Entries are not recorded. The region is free, or an old region whose set will only be
    /// built by the next rebuild after marking.
    Untracked,
    /// Entries are being rebuilt after marking.
    Updating,
    /// The set is complete and maintained by refinement.
    Complete,
}

const NO_CARD: usize = usize::MAX;

/// The remembered set of one region: the cards, in any other region, that may hold a reference
/// into this region.
///
/// Cards are grouped by the region that contains them. Each source region gets a bitmap with one
/// bit per card, installed lazily by whichever worker first records a card from that region.
/// Insertion is lock-free and safe from any number of workers.
pub struct HeapRegionRemSet {
    geometry: HeapGeometry,
    state: Atomic<RemSetState>,
    occupied: AtomicUsize,
    prts: Box<[AtomicPtr<PerRegionTable>]>,
    /// The last card each worker added. Repeated inserts of the same card by the same worker
    /// are dropped before touching the table.
    from_card_cache: Box<[AtomicUsize]>,
}

impl HeapRegionRemSet {
    pub fn new(geometry: HeapGeometry, max_workers: usize) -> Self {
        Self {
            geometry,
            state: Atomic::new(RemSetState::Untracked),
            occupied: AtomicUsize::new(0),
            prts: (0..geometry.num_regions())
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect(),
            from_card_cache: (0..max_workers).map(|_| AtomicUsize::new(NO_CARD)).collect(),
        }
    }

    pub fn state(&self) -> RemSetState {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_tracked(&self) -> bool {
        self.state() != RemSetState::Untracked
    }

    pub fn is_updating(&self) -> bool {
        self.state() == RemSetState::Updating
    }

    pub fn is_complete(&self) -> bool {
        self.state() == RemSetState::Complete
    }

    /// Stop tracking and drop all entries.
    pub fn set_state_untracked(&self) {
        self.state.store(RemSetState::Untracked, Ordering::Release);
        self.clear();
    }

    pub fn set_state_updating(&self) {
        debug_assert_eq!(self.state(), RemSetState::Untracked);
        self.state.store(RemSetState::Updating, Ordering::Release);
    }

    pub fn set_state_complete(&self) {
        self.state.store(RemSetState::Complete, Ordering::Release);
    }

    fn get_per_region_table(&self, region_index: usize) -> &PerRegionTable {
        let entry = &self.prts[region_index];
        let mut ptr = entry.load(Ordering::Acquire);
        if ptr.is_null() {
            let new_table = Box::into_raw(Box::new(PerRegionTable::new(
                self.geometry.cards_per_region(),
            )));
            match entry.compare_exchange(
                std::ptr::null_mut(),
                new_table,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => ptr = new_table,
                Err(winner) => {
                    // Another worker installed a table first.
                    drop(unsafe { Box::from_raw(new_table) });
                    ptr = winner;
                }
            }
        }
        unsafe { &*ptr }
    }

    fn get_per_region_table_opt(&self, region_index: usize) -> Option<&PerRegionTable> {
        let ptr = self.prts[region_index].load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    #[inline(always)]
    fn card_in_region(&self, addr: Address) -> usize {
        ((addr - self.geometry.start()) >> LOG_BYTES_IN_CARD) & (self.geometry.cards_per_region() - 1)
    }

    /// Record that the slot at `slot_addr` may hold a reference into this region. Does nothing
    /// while the set is untracked, and leaves the from-card cache alone in that case.
    pub fn add_reference(&self, slot_addr: Address, worker_id: usize) {
        if !self.is_tracked() {
            return;
        }
        let card = Card::of(slot_addr);
        if let Some(cached) = self.from_card_cache.get(worker_id) {
            if cached.load(Ordering::Relaxed) == card.start().as_usize() {
                return;
            }
            cached.store(card.start().as_usize(), Ordering::Relaxed);
        }
        let prt = self.get_per_region_table(self.geometry.region_index(slot_addr));
        if prt.add_card(self.card_in_region(slot_addr)) {
            self.occupied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Does the set contain the card of `slot_addr`?
    pub fn contains_reference(&self, slot_addr: Address) -> bool {
        self.get_per_region_table_opt(self.geometry.region_index(slot_addr))
            .map(|prt| prt.contains_card(self.card_in_region(slot_addr)))
            .unwrap_or(false)
    }

    /// The number of distinct cards in the set.
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Call `f` for every card in the set.
    pub fn iterate_cards<F: FnMut(Card)>(&self, mut f: F) {
        for (region_index, entry) in self.prts.iter().enumerate() {
            let ptr = entry.load(Ordering::Acquire);
            if ptr.is_null() {
                continue;
            }
            let prt = unsafe { &*ptr };
            let bottom = self.geometry.region_bottom(region_index);
            prt.iterate(|index| f(Card::of(bottom + (index << LOG_BYTES_IN_CARD))));
        }
    }

    /// Drop every entry. Must not run concurrently with insertion.
    pub fn clear(&self) {
        for entry in self.prts.iter() {
            let ptr = entry.swap(std::ptr::null_mut(), Ordering::AcqRel);
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
        for cached in self.from_card_cache.iter() {
            cached.store(NO_CARD, Ordering::Relaxed);
        }
        self.occupied.store(0, Ordering::Relaxed);
    }

    /// Forget the cards the workers added last. Called at the start of every pause and
    /// refinement round so a card cleaned and dirtied again is re-recorded.
    pub fn reset_from_card_cache(&self) {
        for cached in self.from_card_cache.iter() {
            cached.store(NO_CARD, Ordering::Relaxed);
        }
    }
}

impl Drop for HeapRegionRemSet {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for HeapRegionRemSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("HeapRegionRemSet")
            .field("state", &self.state())
            .field("occupied", &self.occupied())
            .finish()
    }
}

/// One bit per card of a single source region.
struct PerRegionTable {
    data: Box<[AtomicUsize]>,
}

impl PerRegionTable {
    fn new(cards: usize) -> Self {
        Self {
            data: (0..cards.div_ceil(BITS_IN_WORD))
                .map(|_| AtomicUsize::new(0))
                .collect(),
        }
    }

    fn get_entry(&self, index: usize) -> (&AtomicUsize, usize) {
        (
            &self.data[index >> LOG_BITS_IN_WORD],
            1usize << (index & (BITS_IN_WORD - 1)),
        )
    }

    fn add_card(&self, index: usize) -> bool {
        let (entry, mask) = self.get_entry(index);
        if entry.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        entry.fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    fn contains_card(&self, index: usize) -> bool {
        let (entry, mask) = self.get_entry(index);
        entry.load(Ordering::Relaxed) & mask != 0
    }

    fn iterate<F: FnMut(usize)>(&self, mut f: F) {
        for (i, word) in self.data.iter().enumerate() {
            let mut val = word.load(Ordering::Relaxed);
            while val != 0 {
                let j = val.trailing_zeros() as usize;
                f((i << LOG_BITS_IN_WORD) + j);
                val &= val - 1;
            }
        }
    }
}
