use std::io;
use std::marker::PhantomData;

use spin::Mutex;

use super::{DirtyCardQueue, DirtyCardQueueSet, G1ConcurrentMark};
use crate::policy::region::{
    CSetState, Card, CardTable, G1BlockOffsetTable, HeapGeometry, HeapRegion, RegionType,
};
use crate::util::memory;
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::slot::CompressedOops;
use crate::vm::VMBinding;

/// The heap: a reserved range of regions plus the heap-wide side tables.
///
/// There is no global instance. Closures, drivers and tests borrow the heap they work on.
pub struct G1CollectedHeap<VM: VMBinding> {
    options: Options,
    geometry: HeapGeometry,
    regions: Box<[HeapRegion]>,
    /// Free region indices, highest first, so `pop` hands out the lowest free region.
    free_list: Mutex<Vec<usize>>,
    card_table: CardTable,
    block_offset_table: G1BlockOffsetTable,
    compressed_oops: Option<CompressedOops>,
    concurrent_mark: G1ConcurrentMark<VM>,
    dirty_card_queue_set: DirtyCardQueueSet,
    collection_set: Mutex<Vec<usize>>,
    humongous_reclaim_candidates: Mutex<Vec<usize>>,
    max_workers: usize,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> G1CollectedHeap<VM> {
    /// Reserve the heap and set up empty regions.
    pub fn new(options: Options) -> io::Result<Self> {
        let size = options.aligned_heap_size();
        let start = memory::dzmmap_aligned(size, options.region_size)?;
        let geometry = HeapGeometry::new(start, size, options.region_size);
        let max_workers = options.threads.max(options.conc_refinement_threads);
        let regions: Box<[HeapRegion]> = (0..geometry.num_regions())
            .map(|i| HeapRegion::new(i, geometry, max_workers))
            .collect();
        let compressed_oops = if options.compressed_oops_enabled() {
            Some(CompressedOops::for_heap(start))
        } else {
            None
        };
        info!(
            "Reserved heap [{}, {}) with {} regions of {} bytes, compressed oops: {}",
            geometry.start(),
            geometry.end(),
            geometry.num_regions(),
            geometry.region_size(),
            compressed_oops.is_some()
        );
        Ok(Self {
            free_list: Mutex::new((0..geometry.num_regions()).rev().collect()),
            card_table: CardTable::new(geometry),
            block_offset_table: G1BlockOffsetTable::new(geometry),
            concurrent_mark: G1ConcurrentMark::new(geometry, &options),
            dirty_card_queue_set: DirtyCardQueueSet::new(options.refinement_buffer_size),
            collection_set: Mutex::new(vec![]),
            humongous_reclaim_candidates: Mutex::new(vec![]),
            compressed_oops,
            regions,
            geometry,
            options,
            max_workers,
            _p: PhantomData,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn geometry(&self) -> HeapGeometry {
        self.geometry
    }

    /// The number of distinct worker ids the per-worker tables are sized for.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn block_offset_table(&self) -> &G1BlockOffsetTable {
        &self.block_offset_table
    }

    pub fn concurrent_mark(&self) -> &G1ConcurrentMark<VM> {
        &self.concurrent_mark
    }

    pub fn dirty_card_queue_set(&self) -> &DirtyCardQueueSet {
        &self.dirty_card_queue_set
    }

    /// The encoding of narrow slots, if this heap uses them.
    pub fn compressed_oops(&self) -> Option<CompressedOops> {
        self.compressed_oops
    }

    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    pub fn region_at(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    #[inline(always)]
    pub fn is_in_reserved(&self, addr: Address) -> bool {
        self.geometry.is_in_reserved(addr)
    }

    /// The region containing `addr`, which must be in the heap.
    #[inline(always)]
    pub fn region_of(&self, addr: Address) -> &HeapRegion {
        &self.regions[self.geometry.region_index(addr)]
    }

    #[inline(always)]
    pub fn region_of_object(&self, object: ObjectReference) -> &HeapRegion {
        self.region_of(object.to_raw_address())
    }

    /// The collection set state of the region containing `object`. Objects outside the heap
    /// are never in the collection set.
    #[inline(always)]
    pub fn in_cset_state(&self, object: ObjectReference) -> CSetState {
        let addr = object.to_raw_address();
        if self.is_in_reserved(addr) {
            self.region_of(addr).cset_state()
        } else {
            CSetState::NotInCSet
        }
    }

    #[inline(always)]
    pub fn is_in_cset(&self, object: ObjectReference) -> bool {
        self.in_cset_state(object).is_in_cset()
    }

    /// Is the slot at `slot_addr` in the same region as `object`?
    ///
    /// A slot in a continues-humongous region counts as being in the region where its humongous
    /// object starts, so references from the tail of a humongous object to its own start are
    /// intra-region.
    #[inline(always)]
    pub fn is_in_same_region(&self, slot_addr: Address, object: ObjectReference) -> bool {
        let obj_addr = object.to_raw_address();
        if self.geometry.is_in_same_region(slot_addr, obj_addr) {
            return true;
        }
        if !self.is_in_reserved(slot_addr) || !self.is_in_reserved(obj_addr) {
            return false;
        }
        let from = self.region_of(slot_addr);
        from.is_continues_humongous()
            && from.humongous_start_index() == self.geometry.region_index(obj_addr)
    }

    /// Keep the humongous object `object` from being eagerly reclaimed at the end of the pause.
    #[inline(always)]
    pub fn set_humongous_is_live(&self, object: ObjectReference) {
        let hr = self.region_of_object(object);
        debug_assert!(hr.is_starts_humongous(), "{} is not a humongous object", object);
        hr.set_humongous_is_live();
    }

    pub fn humongous_is_live(&self, object: ObjectReference) -> bool {
        self.region_of_object(object).humongous_is_live()
    }

    pub fn num_free_regions(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Take the lowest free region and give it `region_type`.
    pub fn alloc_region(&self, region_type: RegionType) -> Option<&HeapRegion> {
        debug_assert!(!region_type.is_humongous() && region_type != RegionType::Free);
        let index = self.free_list.lock().pop()?;
        let hr = &self.regions[index];
        debug_assert!(hr.is_free(), "{:?} is on the free list", hr);
        hr.set_region_type(region_type);
        self.update_rem_set_tracking_at_allocate(hr);
        Some(hr)
    }

    /// Young and humongous regions always track incoming references. A new old region does not
    /// until the next remembered set rebuild.
    fn update_rem_set_tracking_at_allocate(&self, hr: &HeapRegion) {
        if hr.is_young() || hr.is_humongous() {
            hr.rem_set().set_state_complete();
        } else {
            debug_assert!(!hr.rem_set().is_tracked());
        }
    }

    /// Bump allocate `size` bytes in `hr` and record the block for card scanning.
    pub fn allocate_in(&self, hr: &HeapRegion, size: usize) -> Option<Address> {
        let start = hr.par_allocate(size)?;
        self.block_offset_table.alloc_block(start, start + size);
        Some(start)
    }

    /// Allocate an object of `size` bytes that spans one or more contiguous regions.
    pub fn allocate_humongous(&self, size: usize) -> Option<Address> {
        let num = size.div_ceil(self.geometry.region_size());
        let first = {
            let mut free = self.free_list.lock();
            let mut sorted = free.clone();
            sorted.sort_unstable();
            let mut run_start = None;
            let mut run_len = 0;
            let mut prev = None;
            for &index in sorted.iter() {
                if prev.map(|p| p + 1) == Some(index) {
                    run_len += 1;
                } else {
                    run_start = Some(index);
                    run_len = 1;
                }
                prev = Some(index);
                if run_len == num {
                    break;
                }
            }
            if run_len < num {
                debug!("No {} contiguous free regions for a humongous object", num);
                return None;
            }
            let first = run_start?;
            free.retain(|i| !(first..first + num).contains(i));
            first
        };
        let start = self.geometry.region_bottom(first);
        let end = start + size;
        for index in first..first + num {
            let hr = &self.regions[index];
            hr.set_humongous_start_index(first);
            hr.set_region_type(if index == first {
                RegionType::StartsHumongous
            } else {
                RegionType::ContinuesHumongous
            });
            hr.set_top(end.min(hr.end()));
            self.update_rem_set_tracking_at_allocate(hr);
        }
        self.block_offset_table.alloc_block(start, end);
        debug!("Allocated humongous object of {} bytes at {}", size, start);
        Some(start)
    }

    /// Return `hr` to the free list, dropping everything known about its contents.
    pub fn free_region(&self, hr: &HeapRegion) {
        self.block_offset_table.clear_range(hr.bottom(), hr.end());
        self.card_table.clear_range(hr.bottom(), hr.end());
        self.concurrent_mark
            .clear_range_in_next_bitmap(hr.bottom(), hr.end());
        hr.reset();
        let mut free = self.free_list.lock();
        free.push(hr.index());
        free.sort_unstable_by(|a, b| b.cmp(a));
    }

    /// Free every region of the humongous object starting in region `start_index`.
    pub fn free_humongous_object(&self, start_index: usize) {
        debug_assert!(self.regions[start_index].is_starts_humongous());
        self.free_region(&self.regions[start_index]);
        for hr in self.regions[start_index + 1..].iter() {
            if !hr.is_continues_humongous() || hr.humongous_start_index() != start_index {
                break;
            }
            self.free_region(hr);
        }
    }

    pub fn register_young_region_with_cset(&self, hr: &HeapRegion) {
        debug_assert!(hr.is_young(), "{:?} is not young", hr);
        hr.set_cset_state(CSetState::Young);
        self.collection_set.lock().push(hr.index());
    }

    pub fn register_old_region_with_cset(&self, hr: &HeapRegion) {
        debug_assert!(hr.is_old(), "{:?} is not old", hr);
        debug_assert!(
            hr.rem_set().is_complete(),
            "{:?} cannot be evacuated without a complete remembered set",
            hr
        );
        hr.set_cset_state(CSetState::Old);
        self.collection_set.lock().push(hr.index());
    }

    /// Make the humongous object starting in `hr` a candidate for eager reclaim. It is freed at
    /// the end of the next pause unless a reference to it is found.
    ///
    /// Remembered sets of candidates are not scanned, so an object with remembered set entries
    /// is refused. Returns whether `hr` became a candidate.
    pub fn register_humongous_region_with_cset(&self, hr: &HeapRegion) -> bool {
        debug_assert!(hr.is_starts_humongous(), "{:?} does not start a humongous object", hr);
        if !hr.rem_set().is_empty() {
            trace!(
                "{:?} has {} remembered cards, not a reclaim candidate",
                hr,
                hr.rem_set().occupied()
            );
            return false;
        }
        hr.clear_humongous_is_live();
        hr.set_cset_state(CSetState::Humongous);
        self.humongous_reclaim_candidates.lock().push(hr.index());
        true
    }

    pub fn collection_set(&self) -> Vec<usize> {
        self.collection_set.lock().clone()
    }

    pub fn humongous_reclaim_candidates(&self) -> Vec<usize> {
        self.humongous_reclaim_candidates.lock().clone()
    }

    /// Drop the collection set and the humongous candidates without freeing anything.
    pub fn clear_collection_set(&self) {
        let cset = std::mem::take(&mut *self.collection_set.lock());
        let candidates = std::mem::take(&mut *self.humongous_reclaim_candidates.lock());
        for index in cset.into_iter().chain(candidates) {
            self.regions[index].set_cset_state(CSetState::NotInCSet);
        }
    }

    /// Release the collection set after evacuation. Regions that failed evacuation stay in place
    /// as old regions; all other collection set regions and unreachable humongous candidates
    /// are freed. Returns the number of regions freed.
    pub fn free_collection_set(&self) -> usize {
        let cset = std::mem::take(&mut *self.collection_set.lock());
        let candidates = std::mem::take(&mut *self.humongous_reclaim_candidates.lock());
        let mut freed = 0;
        for index in cset {
            let hr = &self.regions[index];
            if hr.evacuation_failed() {
                hr.set_cset_state(CSetState::NotInCSet);
                hr.clear_evacuation_failed();
                hr.set_region_type(RegionType::Old);
            } else {
                self.free_region(hr);
                freed += 1;
            }
        }
        for index in candidates {
            let hr = &self.regions[index];
            hr.set_cset_state(CSetState::NotInCSet);
            if hr.humongous_is_live() {
                hr.clear_humongous_is_live();
            } else {
                let before = self.num_free_regions();
                debug!("Eagerly reclaiming humongous object in region {}", index);
                self.free_humongous_object(index);
                freed += self.num_free_regions() - before;
            }
        }
        freed
    }

    /// The mutator post-write barrier for a store of `new_value` into the slot at `slot_addr`.
    /// A cross-region store into a non-young region dirties the card of the slot and enqueues
    /// it for refinement, unless the card is already dirty.
    pub fn post_write_barrier(
        &self,
        queue: &mut DirtyCardQueue,
        slot_addr: Address,
        new_value: Option<ObjectReference>,
    ) {
        let Some(object) = new_value else {
            return;
        };
        if !self.is_in_reserved(slot_addr)
            || self
                .geometry
                .is_in_same_region(slot_addr, object.to_raw_address())
        {
            return;
        }
        if self.region_of(slot_addr).is_young() {
            return;
        }
        let card = Card::of(slot_addr);
        if self.card_table.is_dirty(card) {
            return;
        }
        self.card_table.mark_dirty(card);
        queue.enqueue(&self.dirty_card_queue_set, card);
    }
}

impl<VM: VMBinding> Drop for G1CollectedHeap<VM> {
    fn drop(&mut self) {
        if let Err(e) = memory::munmap(self.geometry.start(), self.geometry.size()) {
            warn!("Failed to unmap the heap at {}: {}", self.geometry.start(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::*;
    use crate::vm::slot::Slot;

    #[test]
    fn allocate_and_free_regions() {
        let heap = new_heap();
        let total = heap.num_free_regions();
        let eden = new_region(&heap, RegionType::Eden);
        assert_eq!(eden.index(), 0);
        assert!(eden.rem_set().is_tracked());
        let old = new_region(&heap, RegionType::Old);
        assert_eq!(old.index(), 1);
        assert!(!old.rem_set().is_tracked());
        assert_eq!(heap.num_free_regions(), total - 2);

        let obj = alloc_object(&heap, eden, 2, 0);
        assert_eq!(heap.region_of_object(obj), eden);
        heap.free_region(eden);
        assert!(eden.is_free());
        assert_eq!(eden.top(), eden.bottom());
        assert_eq!(heap.alloc_region(RegionType::Survivor).map(|r| r.index()), Some(0));
    }

    #[test]
    fn humongous_objects_span_regions() {
        let heap = new_heap();
        let region_size = heap.geometry().region_size();
        let _first = new_region(&heap, RegionType::Old);
        // Slightly more than two regions.
        let num_wide = (2 * region_size) / 8;
        let obj = alloc_humongous(&heap, num_wide, 0);
        let start = heap.region_of_object(obj);
        assert!(start.is_starts_humongous());
        let second = heap.region_at(start.index() + 1);
        let third = heap.region_at(start.index() + 2);
        assert!(second.is_continues_humongous());
        assert!(third.is_continues_humongous());
        assert_eq!(third.humongous_start_index(), start.index());
        assert!(heap.region_at(start.index() + 3).is_free());

        // The tail of the object references its head: same region for remembered set purposes.
        let tail_slot = wide_field(obj, num_wide - 1);
        assert!(heap.region_of(tail_slot.as_address()) == third);
        assert!(heap.is_in_same_region(tail_slot.as_address(), obj));
        let card = Card::of(tail_slot.as_address());
        assert_eq!(
            heap.block_offset_table().block_start(card),
            Some(obj.to_raw_address())
        );

        heap.free_humongous_object(start.index());
        assert!(start.is_free() && second.is_free() && third.is_free());
    }

    #[test]
    fn unreachable_humongous_candidate_is_reclaimed() {
        let heap = new_heap();
        let live = alloc_humongous(&heap, 16, 0);
        let dead = alloc_humongous(&heap, 16, 0);
        let live_region = heap.region_of_object(live);
        let dead_region = heap.region_of_object(dead);
        heap.register_humongous_region_with_cset(live_region);
        heap.register_humongous_region_with_cset(dead_region);
        assert!(heap.in_cset_state(live).is_humongous());
        heap.set_humongous_is_live(live);

        assert_eq!(heap.free_collection_set(), 1);
        assert!(live_region.is_starts_humongous());
        assert_eq!(live_region.cset_state(), CSetState::NotInCSet);
        assert!(dead_region.is_free());
    }

    #[test]
    fn failed_regions_become_old() {
        let heap = new_heap();
        let eden = new_region(&heap, RegionType::Eden);
        let other = new_region(&heap, RegionType::Eden);
        heap.register_young_region_with_cset(eden);
        heap.register_young_region_with_cset(other);
        assert!(eden.set_evacuation_failed());
        assert_eq!(heap.free_collection_set(), 1);
        assert!(eden.is_old());
        assert!(!eden.in_collection_set());
        assert!(other.is_free());
        assert!(heap.collection_set().is_empty());
    }

    #[test]
    fn clearing_the_collection_set_frees_nothing() {
        let heap = new_heap();
        let eden = new_region(&heap, RegionType::Eden);
        let humongous = alloc_humongous(&heap, 16, 0);
        heap.register_young_region_with_cset(eden);
        heap.register_humongous_region_with_cset(heap.region_of_object(humongous));
        let free = heap.num_free_regions();
        heap.clear_collection_set();
        assert!(heap.collection_set().is_empty());
        assert!(heap.humongous_reclaim_candidates().is_empty());
        assert!(!eden.in_collection_set());
        assert_eq!(heap.in_cset_state(humongous), CSetState::NotInCSet);
        assert_eq!(heap.num_free_regions(), free);
    }

    #[test]
    fn post_write_barrier_filters() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let eden = new_region(&heap, RegionType::Eden);
        let a = alloc_object(&heap, old, 2, 0);
        let b = alloc_object(&heap, old, 0, 0);
        let y = alloc_object(&heap, eden, 1, 0);
        let mut queue = DirtyCardQueue::new();

        // Intra-region, young source and null stores are filtered.
        heap.post_write_barrier(&mut queue, wide_field(a, 0).as_address(), Some(b));
        heap.post_write_barrier(&mut queue, wide_field(y, 0).as_address(), Some(a));
        heap.post_write_barrier(&mut queue, wide_field(a, 0).as_address(), None);
        assert!(queue.is_empty());

        heap.post_write_barrier(&mut queue, wide_field(a, 0).as_address(), Some(y));
        heap.post_write_barrier(&mut queue, wide_field(a, 1).as_address(), Some(y));
        assert_eq!(queue.len(), 1);
        assert!(heap.card_table().is_dirty(Card::of(wide_field(a, 0).as_address())));
    }
}
