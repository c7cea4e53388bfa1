use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use atomic::Atomic;
use bytemuck::NoUninit;

use super::{CSetState, HeapGeometry, HeapRegionRemSet};
use crate::util::constants::MIN_OBJECT_ALIGNMENT;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};

/// What a region is currently used for.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, NoUninit, strum_macros::Display)]
pub enum RegionType {
    Free,
    Eden,
    Survivor,
    Old,
    /// The first region of a humongous object.
    StartsHumongous,
    /// A following region of a humongous object. It contains no object start.
    ContinuesHumongous,
}

impl RegionType {
    pub fn is_young(self) -> bool {
        matches!(self, RegionType::Eden | RegionType::Survivor)
    }

    pub fn is_humongous(self) -> bool {
        matches!(
            self,
            RegionType::StartsHumongous | RegionType::ContinuesHumongous
        )
    }
}

/// A fixed-size, contiguous, region-aligned range of the heap.
///
/// Objects are bump allocated from `bottom` up to `top`, so the objects of a region can be walked
/// by size from `bottom`. A humongous object starts at the bottom of a `StartsHumongous` region
/// and extends through zero or more `ContinuesHumongous` regions.
pub struct HeapRegion {
    index: usize,
    bottom: Address,
    end: Address,
    top: Atomic<Address>,
    region_type: Atomic<RegionType>,
    cset_state: Atomic<CSetState>,
    humongous_start_index: AtomicUsize,
    humongous_is_live: AtomicBool,
    next_top_at_mark_start: Atomic<Address>,
    evacuation_failed: AtomicBool,
    rem_set: HeapRegionRemSet,
}

impl HeapRegion {
    pub fn new(index: usize, geometry: HeapGeometry, max_workers: usize) -> Self {
        let bottom = geometry.region_bottom(index);
        Self {
            index,
            bottom,
            end: bottom + geometry.region_size(),
            top: Atomic::new(bottom),
            region_type: Atomic::new(RegionType::Free),
            cset_state: Atomic::new(CSetState::NotInCSet),
            humongous_start_index: AtomicUsize::new(index),
            humongous_is_live: AtomicBool::new(false),
            next_top_at_mark_start: Atomic::new(bottom),
            evacuation_failed: AtomicBool::new(false),
            rem_set: HeapRegionRemSet::new(geometry, max_workers),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Acquire)
    }

    pub fn set_top(&self, top: Address) {
        debug_assert!(self.bottom <= top && top <= self.end);
        self.top.store(top, Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.end - self.bottom
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end - self.top()
    }

    pub fn region_type(&self) -> RegionType {
        self.region_type.load(Ordering::Acquire)
    }

    pub fn set_region_type(&self, region_type: RegionType) {
        trace!("Region {} becomes {}", self.index, region_type);
        self.region_type.store(region_type, Ordering::Release);
    }

    pub fn is_free(&self) -> bool {
        self.region_type() == RegionType::Free
    }

    pub fn is_young(&self) -> bool {
        self.region_type().is_young()
    }

    pub fn is_eden(&self) -> bool {
        self.region_type() == RegionType::Eden
    }

    pub fn is_survivor(&self) -> bool {
        self.region_type() == RegionType::Survivor
    }

    pub fn is_old(&self) -> bool {
        self.region_type() == RegionType::Old
    }

    pub fn is_humongous(&self) -> bool {
        self.region_type().is_humongous()
    }

    pub fn is_starts_humongous(&self) -> bool {
        self.region_type() == RegionType::StartsHumongous
    }

    pub fn is_continues_humongous(&self) -> bool {
        self.region_type() == RegionType::ContinuesHumongous
    }

    /// The index of the first region of the humongous object this region belongs to.
    pub fn humongous_start_index(&self) -> usize {
        debug_assert!(self.is_humongous(), "region {} is not humongous", self.index);
        self.humongous_start_index.load(Ordering::Relaxed)
    }

    pub fn set_humongous_start_index(&self, index: usize) {
        self.humongous_start_index.store(index, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn cset_state(&self) -> CSetState {
        self.cset_state.load(Ordering::Relaxed)
    }

    pub fn set_cset_state(&self, state: CSetState) {
        self.cset_state.store(state, Ordering::Relaxed);
    }

    pub fn in_collection_set(&self) -> bool {
        self.cset_state().is_in_cset()
    }

    /// Flag the humongous object of this region as reachable. Any number of workers may set the
    /// flag at once; it is only ever set to true during a pause.
    pub fn set_humongous_is_live(&self) {
        if !self.humongous_is_live.load(Ordering::Relaxed) {
            self.humongous_is_live.store(true, Ordering::Relaxed);
        }
    }

    pub fn humongous_is_live(&self) -> bool {
        self.humongous_is_live.load(Ordering::Relaxed)
    }

    pub fn clear_humongous_is_live(&self) {
        self.humongous_is_live.store(false, Ordering::Relaxed);
    }

    pub fn next_top_at_mark_start(&self) -> Address {
        self.next_top_at_mark_start.load(Ordering::Acquire)
    }

    pub fn set_next_top_at_mark_start(&self, tams: Address) {
        self.next_top_at_mark_start.store(tams, Ordering::Release);
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed.load(Ordering::Relaxed)
    }

    /// Record an evacuation failure of an object in this region. Returns true for the first
    /// failure.
    pub fn set_evacuation_failed(&self) -> bool {
        !self.evacuation_failed.swap(true, Ordering::Relaxed)
    }

    pub fn clear_evacuation_failed(&self) {
        self.evacuation_failed.store(false, Ordering::Relaxed);
    }

    pub fn rem_set(&self) -> &HeapRegionRemSet {
        &self.rem_set
    }

    /// Is `addr` between the bottom and the end of this region?
    #[inline(always)]
    pub fn is_in_reserved(&self, addr: Address) -> bool {
        self.bottom <= addr && addr < self.end
    }

    /// Bump allocate `size` bytes. Safe to call from several threads.
    pub fn par_allocate(&self, size: usize) -> Option<Address> {
        debug_assert!(size % MIN_OBJECT_ALIGNMENT == 0);
        let mut old = self.top.load(Ordering::Relaxed);
        loop {
            let new = old + size;
            if new > self.end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Some(old),
                Err(witness) => old = witness,
            }
        }
    }

    /// Return the region to the free state. The remembered set stops tracking.
    pub fn reset(&self) {
        self.set_top(self.bottom);
        self.set_next_top_at_mark_start(self.bottom);
        self.set_cset_state(CSetState::NotInCSet);
        self.set_humongous_start_index(self.index);
        self.clear_humongous_is_live();
        self.clear_evacuation_failed();
        self.rem_set.set_state_untracked();
        self.set_region_type(RegionType::Free);
    }

    /// Call `f` for every object in `[bottom, top)`. A continues-humongous region has no object
    /// start, so nothing is visited.
    pub fn object_iterate<VM: VMBinding, F: FnMut(ObjectReference)>(&self, mut f: F) {
        if self.is_continues_humongous() {
            return;
        }
        let top = self.top();
        let mut cursor = self.bottom;
        while cursor < top {
            let object = VM::VMObjectModel::get_object_from_start_address(cursor);
            f(object);
            if self.is_starts_humongous() {
                break;
            }
            cursor = VM::VMObjectModel::get_object_end_address(object);
        }
    }
}

impl fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HeapRegion({} {} [{}, {}, {}))",
            self.index,
            self.region_type(),
            self.bottom,
            self.top(),
            self.end
        )
    }
}

impl PartialEq for HeapRegion {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for HeapRegion {}
