//! The per-slot closures of the collector.
//!
//! Every traversal (root scanning, object scanning, card scanning, remembered set scanning,
//! mark stack draining) hands each reference slot it finds to one of the visitors below. The
//! visitor decides what the slot means for the current phase:
//!
//! | Closure | Phase | Action on a cross-region referent |
//! |---|---|---|
//! | [`G1ParCopyClosure`] | pause, roots | copy and forward, optionally mark |
//! | [`G1ScanEvacuatedObjClosure`] | pause, fields of a copy | queue or record for the remembered set |
//! | [`G1ScanObjsDuringScanRSClosure`] | pause, remembered set cards | queue |
//! | [`G1ScanObjsDuringUpdateRSClosure`] | pause, dirty cards | queue or add to the remembered set |
//! | [`G1ConcurrentRefineOopClosure`] | concurrent refinement | add to the remembered set |
//! | [`G1RebuildRemSetClosure`] | concurrent rebuild | add to the remembered set |
//! | [`G1CMOopClosure`] | concurrent mark | hand to the marking task |
//! | [`G1RootRegionScanClosure`] | concurrent root region scan | mark |
//!
//! Closures running inside a pause use plain slot loads. The concurrent ones use
//! [`Slot::load_volatile`] and never store to a slot or touch an object header.

use super::concurrent_mark::G1CMTask;
use super::{G1CollectedHeap, G1ParScanThreadState};
use crate::policy::region::{CSetState, HeapRegion};
use crate::util::constants::{BYTES_IN_WORD, MIN_OBJECT_ALIGNMENT};
use crate::util::mark_word::mark_raw;
use crate::util::{object_forwarding, prefetch};
use crate::util::{Address, ObjectReference};
use crate::vm::slot::Slot;
use crate::vm::{ClassLoaderData, ObjectModel, SlotVisitor, VMBinding};

/// Whether a [`G1ParCopyClosure`] runs a post-store barrier on the slot holder.
pub type G1Barrier = u8;
/// No barrier.
pub const G1_BARRIER_NONE: G1Barrier = 0;
/// The slot belongs to a [`ClassLoaderData`]. Record when it is updated to point into a young
/// region.
pub const G1_BARRIER_CLD: G1Barrier = 1;

/// Which referents a [`G1ParCopyClosure`] marks in the next mark bitmap.
pub type G1Mark = u8;
/// Mark nothing.
pub const G1_MARK_NONE: G1Mark = 0;
/// Mark non-collection-set referents, and the copies of collection set referents.
pub const G1_MARK_FROM_ROOT: G1Mark = 1;
/// Mark only the copies of collection set referents.
pub const G1_MARK_FROM_SCAN: G1Mark = 2;

/// The state shared by the closures that feed the evacuation queue of one worker.
struct G1ScanClosureBase<'p, 'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    pss: &'p mut G1ParScanThreadState<'h, VM>,
}

impl<'p, 'h, VM: VMBinding> G1ScanClosureBase<'p, 'h, VM> {
    fn new(pss: &'p mut G1ParScanThreadState<'h, VM>) -> Self {
        Self {
            heap: pss.heap(),
            pss,
        }
    }

    /// Queue `slot`, whose referent `object` is in the collection set.
    ///
    /// The header is not read here. The worker popping the slot will CAS the header and read
    /// the object's size, so both cache lines are requested now.
    #[inline(always)]
    fn prefetch_and_push<S: Slot>(&mut self, slot: S, object: ObjectReference) {
        let header = object.header_address();
        prefetch::write(header, 0);
        prefetch::read(header, 2 * BYTES_IN_WORD);
        debug_assert!(
            {
                let reloaded = slot.load();
                reloaded == Some(object)
                    || (object_forwarding::is_forwarded(object)
                        && reloaded == Some(object_forwarding::forwardee(object)))
            },
            "{:?} should still point to {} or to its forwardee",
            slot,
            object
        );
        self.pss.push_on_queue(slot.into());
    }

    #[inline(always)]
    fn handle_non_cset_obj_common(&self, state: CSetState, object: ObjectReference) {
        if state.is_humongous() {
            self.heap.set_humongous_is_live(object);
        }
    }

    #[inline(always)]
    fn trim_queue_partially(&mut self) {
        self.pss.trim_queue_partially();
    }
}

/// Scans the fields of an object that was just copied, or that failed evacuation and stays in
/// place. `from` is the region of the object being scanned.
pub struct G1ScanEvacuatedObjClosure<'p, 'h, VM: VMBinding> {
    base: G1ScanClosureBase<'p, 'h, VM>,
    from: &'h HeapRegion,
}

impl<'p, 'h, VM: VMBinding> G1ScanEvacuatedObjClosure<'p, 'h, VM> {
    pub fn new(pss: &'p mut G1ParScanThreadState<'h, VM>, from: &'h HeapRegion) -> Self {
        Self {
            base: G1ScanClosureBase::new(pss),
            from,
        }
    }
}

impl<VM: VMBinding> SlotVisitor for G1ScanEvacuatedObjClosure<'_, '_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let heap = self.base.heap;
        let state = heap.in_cset_state(object);
        if state.is_in_cset() {
            self.base.prefetch_and_push(slot, object);
        } else if !heap.is_in_same_region(slot.as_address(), object) {
            self.base.handle_non_cset_obj_common(state, object);
            self.base.pss.update_rs(self.from, slot.as_address(), object);
        }
    }
}

/// Scans the cards of a collection set region's remembered set. The remembered set is being
/// consumed, so cross-region references found here are not recorded again.
pub struct G1ScanObjsDuringScanRSClosure<'p, 'h, VM: VMBinding> {
    base: G1ScanClosureBase<'p, 'h, VM>,
}

impl<'p, 'h, VM: VMBinding> G1ScanObjsDuringScanRSClosure<'p, 'h, VM> {
    pub fn new(pss: &'p mut G1ParScanThreadState<'h, VM>) -> Self {
        Self {
            base: G1ScanClosureBase::new(pss),
        }
    }
}

impl<VM: VMBinding> SlotVisitor for G1ScanObjsDuringScanRSClosure<'_, '_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let heap = self.base.heap;
        let state = heap.in_cset_state(object);
        if state.is_in_cset() {
            self.base.prefetch_and_push(slot, object);
        } else if !heap.is_in_same_region(slot.as_address(), object) {
            self.base.handle_non_cset_obj_common(state, object);
        }
    }
}

/// Scans dirty cards outside the collection set at the start of a pause. References into the
/// collection set become evacuation roots; other cross-region references go straight into the
/// target region's remembered set.
pub struct G1ScanObjsDuringUpdateRSClosure<'p, 'h, VM: VMBinding> {
    base: G1ScanClosureBase<'p, 'h, VM>,
    worker_id: usize,
}

impl<'p, 'h, VM: VMBinding> G1ScanObjsDuringUpdateRSClosure<'p, 'h, VM> {
    pub fn new(pss: &'p mut G1ParScanThreadState<'h, VM>) -> Self {
        let worker_id = pss.worker_id();
        Self {
            base: G1ScanClosureBase::new(pss),
            worker_id,
        }
    }
}

impl<VM: VMBinding> SlotVisitor for G1ScanObjsDuringUpdateRSClosure<'_, '_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let heap = self.base.heap;
        let slot_addr = slot.as_address();
        check_obj_during_refinement(heap, slot_addr, object);
        debug_assert!(
            !heap.region_of(slot_addr).in_collection_set(),
            "Slot {} is in the collection set",
            slot_addr
        );
        let state = heap.in_cset_state(object);
        if state.is_in_cset() {
            // The slot is outside the collection set, so this is a cross-region reference.
            self.base.prefetch_and_push(slot, object);
        } else if !heap.is_in_same_region(slot_addr, object) {
            self.base.handle_non_cset_obj_common(state, object);
            heap.region_of_object(object)
                .rem_set()
                .add_reference(slot_addr, self.worker_id);
        }
    }
}

/// Turns the slots of a refined card into remembered set entries, concurrently with mutators.
pub struct G1ConcurrentRefineOopClosure<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    worker_id: usize,
}

impl<'h, VM: VMBinding> G1ConcurrentRefineOopClosure<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>, worker_id: usize) -> Self {
        Self { heap, worker_id }
    }
}

impl<VM: VMBinding> SlotVisitor for G1ConcurrentRefineOopClosure<'_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load_volatile() else {
            return;
        };
        let slot_addr = slot.as_address();
        check_obj_during_refinement(self.heap, slot_addr, object);
        // A mutator may have overwritten the slot with an intra-region reference since the card
        // was dirtied.
        if self.heap.is_in_same_region(slot_addr, object) {
            return;
        }
        let to_rem_set = self.heap.region_of_object(object).rem_set();
        if to_rem_set.is_tracked() {
            to_rem_set.add_reference(slot_addr, self.worker_id);
        }
    }
}

/// Adds every cross-region reference of a live object to the target's remembered set, while
/// remembered sets are rebuilt after marking.
pub struct G1RebuildRemSetClosure<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    worker_id: usize,
}

impl<'h, VM: VMBinding> G1RebuildRemSetClosure<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>, worker_id: usize) -> Self {
        Self { heap, worker_id }
    }
}

impl<VM: VMBinding> SlotVisitor for G1RebuildRemSetClosure<'_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load_volatile() else {
            return;
        };
        let slot_addr = slot.as_address();
        if self.heap.is_in_same_region(slot_addr, object) {
            return;
        }
        self.heap
            .region_of_object(object)
            .rem_set()
            .add_reference(slot_addr, self.worker_id);
    }
}

/// Hands each slot of a grey object to the marking task that is scanning it.
pub struct G1CMOopClosure<'t, 'h, VM: VMBinding> {
    task: &'t mut G1CMTask<'h, VM>,
}

impl<'t, 'h, VM: VMBinding> G1CMOopClosure<'t, 'h, VM> {
    pub fn new(task: &'t mut G1CMTask<'h, VM>) -> Self {
        Self { task }
    }
}

impl<VM: VMBinding> SlotVisitor for G1CMOopClosure<'_, '_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        self.task.deal_with_reference(slot);
    }
}

/// Marks the referents of the objects in a root region: a survivor region of the last initial
/// mark pause.
pub struct G1RootRegionScanClosure<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    worker_id: usize,
}

impl<'h, VM: VMBinding> G1RootRegionScanClosure<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>, worker_id: usize) -> Self {
        Self { heap, worker_id }
    }
}

impl<VM: VMBinding> SlotVisitor for G1RootRegionScanClosure<'_, VM> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load_volatile() else {
            return;
        };
        let hr = self.heap.region_of_object(object);
        self.heap
            .concurrent_mark()
            .mark_in_next_bitmap(self.worker_id, hr, object);
    }
}

/// The copy closure applied to roots during an evacuation pause.
///
/// `BARRIER` is one of the `G1_BARRIER_*` constants and `MARK` one of the `G1_MARK_*`
/// constants. Both are resolved at compile time; use the type aliases below.
pub struct G1ParCopyClosure<'p, 'h, VM: VMBinding, const BARRIER: G1Barrier, const MARK: G1Mark>
{
    base: G1ScanClosureBase<'p, 'h, VM>,
    worker_id: usize,
    scanned_cld: Option<&'p ClassLoaderData>,
}

/// Copies the referents of ordinary roots.
pub type G1ScanRootsClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_NONE, G1_MARK_NONE>;
/// Copies the referents of ordinary roots and marks them, during an initial mark pause.
pub type G1MarkRootsClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_NONE, G1_MARK_FROM_ROOT>;
/// Copies referents and marks only the promoted copies.
pub type G1MarkPromotedRootsClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_NONE, G1_MARK_FROM_SCAN>;
/// Copies the referents of class loader roots.
pub type G1ScanCLDClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_CLD, G1_MARK_NONE>;
/// Copies and marks the referents of class loader roots.
pub type G1MarkCLDClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_CLD, G1_MARK_FROM_ROOT>;
/// Copies the referents of class loader roots and marks the promoted copies.
pub type G1MarkPromotedCLDClosure<'p, 'h, VM> =
    G1ParCopyClosure<'p, 'h, VM, G1_BARRIER_CLD, G1_MARK_FROM_SCAN>;

impl<'p, 'h, VM: VMBinding, const BARRIER: G1Barrier, const MARK: G1Mark>
    G1ParCopyClosure<'p, 'h, VM, BARRIER, MARK>
{
    pub fn new(pss: &'p mut G1ParScanThreadState<'h, VM>) -> Self {
        let worker_id = pss.worker_id();
        Self {
            base: G1ScanClosureBase::new(pss),
            worker_id,
            scanned_cld: None,
        }
    }

    /// Set the class loader whose roots are about to be visited. Required before visiting any
    /// slot with the CLD barrier.
    pub fn set_scanned_cld(&mut self, cld: Option<&'p ClassLoaderData>) {
        debug_assert!(
            BARRIER == G1_BARRIER_CLD || cld.is_none(),
            "Only the CLD barrier needs a class loader"
        );
        self.scanned_cld = cld;
    }

    fn do_cld_barrier(&self, new_object: ObjectReference) {
        debug_assert!(self.scanned_cld.is_some(), "No class loader is being scanned");
        if self.base.heap.region_of_object(new_object).is_young() {
            if let Some(cld) = self.scanned_cld {
                cld.record_modified_oops();
            }
        }
    }

    /// Mark a referent that is not moving.
    fn mark_object(&self, object: ObjectReference) {
        let heap = self.base.heap;
        debug_assert!(!heap.is_in_cset(object), "{} should not be in the collection set", object);
        // Roots may point outside the heap.
        if !heap.is_in_reserved(object.to_raw_address()) {
            return;
        }
        let hr = heap.region_of_object(object);
        heap.concurrent_mark()
            .mark_in_next_bitmap(self.worker_id, hr, object);
    }

    /// Mark the copy `to_object` of `from_object`. The copy may still be written by the worker
    /// that made it, so the size comes from the from-space object.
    fn mark_forwarded_object(&self, from_object: ObjectReference, to_object: ObjectReference) {
        debug_assert!(
            object_forwarding::is_forwarded(from_object)
                && object_forwarding::forwardee(from_object) == to_object,
            "{} should be forwarded to {}",
            from_object,
            to_object
        );
        let heap = self.base.heap;
        let size = VM::VMObjectModel::get_current_size(from_object);
        let hr = heap.region_of_object(to_object);
        heap.concurrent_mark()
            .mark_in_next_bitmap_with_size(self.worker_id, hr, to_object, size);
    }
}

impl<VM: VMBinding, const BARRIER: G1Barrier, const MARK: G1Mark> SlotVisitor
    for G1ParCopyClosure<'_, '_, VM, BARRIER, MARK>
{
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let heap = self.base.heap;
        let state = heap.in_cset_state(object);
        if state.is_in_cset() {
            let mark = mark_raw(object);
            let forwardee = if mark.is_marked() {
                mark.decode_pointer()
            } else {
                self.base.pss.copy_to_survivor_space(state, object, mark)
            };
            slot.store(forwardee);

            if MARK != G1_MARK_NONE && forwardee != object {
                self.mark_forwarded_object(object, forwardee);
            }
            if BARRIER == G1_BARRIER_CLD {
                self.do_cld_barrier(forwardee);
            }
        } else {
            if state.is_humongous() {
                heap.set_humongous_is_live(object);
            }
            if MARK == G1_MARK_FROM_ROOT {
                self.mark_object(object);
            }
        }
        self.base.trim_queue_partially();
    }
}

/// Invariants of a slot found by refinement. Compiled away in release builds.
#[inline(always)]
fn check_obj_during_refinement<VM: VMBinding>(
    heap: &G1CollectedHeap<VM>,
    slot_addr: Address,
    object: ObjectReference,
) {
    debug_assert!(
        object.to_raw_address().is_aligned_to(MIN_OBJECT_ALIGNMENT),
        "Object {} referenced from {} is not aligned",
        object,
        slot_addr
    );
    debug_assert!(
        heap.is_in_reserved(object.to_raw_address()),
        "Object {} referenced from {} is not in the heap",
        object,
        slot_addr
    );
    debug_assert!(
        {
            let from = heap.region_of(slot_addr);
            from.is_in_reserved(slot_addr)
                || (from.is_humongous()
                    && heap.region_at(from.humongous_start_index()).is_humongous())
        },
        "Slot {} is not in its region",
        slot_addr
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::region::{Card, RegionType};
    use crate::util::mark_word::set_mark_raw;
    use crate::util::test_util::mock_vm::*;
    use crate::util::MarkWord;
    use crate::vm::slot::AnySlot;
    use crate::vm::Scanning;

    type Heap = G1CollectedHeap<MockVM>;

    /// An old region with a complete remembered set, so that references into it are recorded.
    fn tracked_old_region(heap: &Heap) -> &HeapRegion {
        let hr = new_region(heap, RegionType::Old);
        hr.rem_set().set_state_complete();
        hr
    }

    #[test]
    fn par_copy_copies_and_stores_forwardee() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = new_region(&heap, RegionType::Eden);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, r1, 0, 0);
        let p = wide_field(holder, 0);
        p.store(object);
        heap.register_young_region_with_cset(r1);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanRootsClosure::new(&mut pss).visit_slot(p);

        let forwardee = p.load().unwrap();
        assert_ne!(forwardee, object);
        assert!(!heap.is_in_cset(forwardee));
        assert_eq!(object_forwarding::forwardee(object), forwardee);
        assert_eq!(pss.objects_copied(), 1);
        assert!(!heap.concurrent_mark().is_marked_in_next(forwardee));
        assert!(heap.region_of_object(forwardee).rem_set().is_empty());
        assert!(pss.deferred_cards().is_empty());
    }

    #[test]
    fn par_copy_uses_installed_forwardee() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = new_region(&heap, RegionType::Eden);
        let r2 = new_region(&heap, RegionType::Survivor);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, r1, 0, 0);
        let copy = alloc_object(&heap, r2, 0, 0);
        object_forwarding::forward_to(object, copy);
        let p = wide_field(holder, 0);
        p.store(object);
        heap.register_young_region_with_cset(r1);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanRootsClosure::new(&mut pss).visit_slot(p);
        assert_eq!(p.load(), Some(copy));
        assert_eq!(pss.objects_copied(), 0);
    }

    #[test]
    fn par_copy_second_visit_is_idempotent() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = new_region(&heap, RegionType::Eden);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, r1, 0, 0);
        let p = wide_field(holder, 0);
        p.store(object);
        heap.register_young_region_with_cset(r1);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        let mut closure = G1ScanRootsClosure::new(&mut pss);
        closure.visit_slot(p);
        let first = p.load();
        closure.visit_slot(p);
        drop(closure);
        assert_eq!(p.load(), first);
        assert_eq!(pss.objects_copied(), 1);
    }

    #[test]
    fn null_slots_are_ignored() {
        let heap = new_heap();
        let old = tracked_old_region(&heap);
        let holder = alloc_object(&heap, old, 1, 0);
        let p = wide_field(holder, 0);

        let mut pss = G1ParScanThreadState::new(&heap, 0, true);
        G1MarkRootsClosure::new(&mut pss).visit_slot(p);
        G1ScanEvacuatedObjClosure::new(&mut pss, old).visit_slot(p);
        G1ScanObjsDuringScanRSClosure::new(&mut pss).visit_slot(p);
        G1ScanObjsDuringUpdateRSClosure::new(&mut pss).visit_slot(p);
        assert!(pss.queue_is_empty());
        assert!(pss.deferred_cards().is_empty());
        G1ConcurrentRefineOopClosure::new(&heap, 0).visit_slot(p);
        G1RebuildRemSetClosure::new(&heap, 0).visit_slot(p);
        G1RootRegionScanClosure::new(&heap, 0).visit_slot(p);
        assert_eq!(p.load(), None);
        assert!(old.rem_set().is_empty());
        assert!(!heap.concurrent_mark().is_marked_in_next(holder));
    }

    #[test]
    fn mark_from_root_marks_non_cset_referents() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let root_holder = new_region(&heap, RegionType::Old);
        let target = alloc_object(&heap, old, 0, 0);
        let holder = alloc_object(&heap, root_holder, 1, 0);
        let p = wide_field(holder, 0);
        p.store(target);
        heap.concurrent_mark().pre_initial_mark(&heap);

        let mut pss = G1ParScanThreadState::new(&heap, 0, true);
        G1ScanRootsClosure::new(&mut pss).visit_slot(p);
        assert!(!heap.concurrent_mark().is_marked_in_next(target));
        G1MarkPromotedRootsClosure::new(&mut pss).visit_slot(p);
        assert!(!heap.concurrent_mark().is_marked_in_next(target));
        G1MarkRootsClosure::new(&mut pss).visit_slot(p);
        assert!(heap.concurrent_mark().is_marked_in_next(target));
        assert_eq!(p.load(), Some(target));
        heap.concurrent_mark().flush_mark_stats_caches();
        assert_eq!(
            heap.concurrent_mark().live_bytes(old.index()),
            object_size(0, 0)
        );
    }

    #[test]
    fn mark_from_scan_marks_promoted_copies() {
        let heap = new_heap_with(|o| o.max_tenuring_threshold = 0);
        let eden = new_region(&heap, RegionType::Eden);
        let object = alloc_object(&heap, eden, 0, 0);
        let root = alloc_object(&heap, new_region(&heap, RegionType::Old), 1, 0);
        let p = wide_field(root, 0);
        p.store(object);
        heap.register_young_region_with_cset(eden);
        heap.concurrent_mark().pre_initial_mark(&heap);

        let mut pss = G1ParScanThreadState::new(&heap, 0, true);
        G1MarkPromotedRootsClosure::new(&mut pss).visit_slot(p);
        let copy = p.load().unwrap();
        assert!(heap.region_of_object(copy).is_old());
        assert!(heap.concurrent_mark().is_marked_in_next(copy));
        pss.flush();
        heap.concurrent_mark().flush_mark_stats_caches();
        assert_eq!(
            heap.concurrent_mark()
                .live_bytes(heap.region_of_object(copy).index()),
            object_size(0, 0)
        );
    }

    #[test]
    fn survivor_copies_are_live_above_tams() {
        let heap = new_heap();
        let eden = new_region(&heap, RegionType::Eden);
        let object = alloc_object(&heap, eden, 0, 0);
        let root = alloc_object(&heap, new_region(&heap, RegionType::Old), 1, 0);
        let p = wide_field(root, 0);
        p.store(object);
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 0, true);
        G1MarkRootsClosure::new(&mut pss).visit_slot(p);
        let copy = p.load().unwrap();
        let survivor = heap.region_of_object(copy);
        assert!(survivor.is_survivor());
        assert!(copy.to_raw_address() >= survivor.next_top_at_mark_start());
        assert!(!heap.concurrent_mark().is_marked_in_next(copy));
    }

    #[test]
    fn cld_barrier_records_young_forwardees() {
        let heap = new_heap_with(|o| o.max_tenuring_threshold = 1);
        let eden = new_region(&heap, RegionType::Eden);
        let young = alloc_object(&heap, eden, 0, 0);
        let aged = alloc_object(&heap, eden, 0, 0);
        set_mark_raw(aged, MarkWord::prototype().incr_age());
        let old = alloc_object(&heap, new_region(&heap, RegionType::Old), 0, 0);
        let roots = alloc_object(&heap, new_region(&heap, RegionType::Old), 3, 0);
        let (p_young, p_aged, p_old) = (
            wide_field(roots, 0),
            wide_field(roots, 1),
            wide_field(roots, 2),
        );
        p_young.store(young);
        p_aged.store(aged);
        p_old.store(old);
        heap.register_young_region_with_cset(eden);

        let to_old = ClassLoaderData::new(vec![AnySlot::from(p_aged), AnySlot::from(p_old)]);
        let to_young = ClassLoaderData::new(vec![AnySlot::from(p_young)]);
        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        {
            let mut closure = G1ScanCLDClosure::new(&mut pss);
            closure.set_scanned_cld(Some(&to_old));
            to_old.oops_do(&mut closure);
            closure.set_scanned_cld(Some(&to_young));
            to_young.oops_do(&mut closure);
        }
        assert!(heap.region_of_object(p_aged.load().unwrap()).is_old());
        assert_eq!(p_old.load(), Some(old));
        assert!(!to_old.has_modified_oops());
        assert!(heap.region_of_object(p_young.load().unwrap()).is_survivor());
        assert!(to_young.has_modified_oops());
    }

    #[test]
    fn humongous_referents_are_kept_alive() {
        let heap = new_heap();
        let old = tracked_old_region(&heap);
        let holder = alloc_object(&heap, old, 1, 0);
        let humongous = alloc_humongous(&heap, 16, 0);
        let p = wide_field(holder, 0);
        p.store(humongous);
        let hr = heap.region_of_object(humongous);
        heap.register_humongous_region_with_cset(hr);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanObjsDuringScanRSClosure::new(&mut pss).visit_slot(p);
        assert!(heap.humongous_is_live(humongous));
        hr.clear_humongous_is_live();
        G1ScanObjsDuringUpdateRSClosure::new(&mut pss).visit_slot(p);
        assert!(heap.humongous_is_live(humongous));
        assert!(hr.rem_set().contains_reference(p.as_address()));
        hr.clear_humongous_is_live();
        G1ScanRootsClosure::new(&mut pss).visit_slot(p);
        assert!(heap.humongous_is_live(humongous));
        assert!(pss.queue_is_empty());
        assert_eq!(p.load(), Some(humongous));
    }

    #[test]
    fn scan_evacuated_records_cross_region_references() {
        let heap = new_heap();
        let from = new_region(&heap, RegionType::Old);
        let target_region = tracked_old_region(&heap);
        let copy = alloc_object(&heap, from, 2, 0);
        let target = alloc_object(&heap, target_region, 0, 0);
        let neighbour = alloc_object(&heap, from, 0, 0);
        wide_field(copy, 0).store(target);
        wide_field(copy, 1).store(neighbour);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        MockVM::scan_object(copy, None, &mut G1ScanEvacuatedObjClosure::new(&mut pss, from));
        assert_eq!(pss.deferred_cards(), &[Card::of(wide_field(copy, 0).as_address())]);
        assert!(pss.queue_is_empty());
        assert_eq!(pss.objects_copied(), 0);
    }

    #[test]
    fn scan_evacuated_queues_cset_referents() {
        let heap = new_heap();
        let from = new_region(&heap, RegionType::Survivor);
        let eden = new_region(&heap, RegionType::Eden);
        let copy = alloc_object(&heap, from, 1, 0);
        let young = alloc_object(&heap, eden, 0, 0);
        wide_field(copy, 0).store(young);
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanEvacuatedObjClosure::new(&mut pss, from).visit_slot(wide_field(copy, 0));
        assert_eq!(pss.queue_len(), 1);
        // Nothing is copied until the queue is drained.
        assert_eq!(wide_field(copy, 0).load(), Some(young));
        pss.trim_queue();
        assert!(heap.region_of_object(wide_field(copy, 0).load().unwrap()).is_survivor());
    }

    #[test]
    fn scan_rs_never_records() {
        let heap = new_heap();
        let card_region = new_region(&heap, RegionType::Old);
        let target_region = tracked_old_region(&heap);
        let holder = alloc_object(&heap, card_region, 1, 0);
        let target = alloc_object(&heap, target_region, 0, 0);
        let p = wide_field(holder, 0);
        p.store(target);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanObjsDuringScanRSClosure::new(&mut pss).visit_slot(p);
        assert!(target_region.rem_set().is_empty());
        assert!(pss.deferred_cards().is_empty());
        assert!(pss.queue_is_empty());
    }

    #[test]
    fn update_rs_adds_reference_or_queues() {
        let heap = new_heap();
        let card_region = new_region(&heap, RegionType::Old);
        let target_region = tracked_old_region(&heap);
        let eden = new_region(&heap, RegionType::Eden);
        let holder = alloc_object(&heap, card_region, 3, 0);
        let target = alloc_object(&heap, target_region, 0, 0);
        let young = alloc_object(&heap, eden, 0, 0);
        let local = alloc_object(&heap, card_region, 0, 0);
        wide_field(holder, 0).store(target);
        wide_field(holder, 1).store(young);
        wide_field(holder, 2).store(local);
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 1, false);
        MockVM::scan_object(holder, None, &mut G1ScanObjsDuringUpdateRSClosure::new(&mut pss));
        assert!(target_region
            .rem_set()
            .contains_reference(wide_field(holder, 0).as_address()));
        assert_eq!(target_region.rem_set().occupied(), 1);
        assert!(card_region.rem_set().is_empty());
        assert!(eden.rem_set().is_empty());
        assert_eq!(pss.queue_len(), 1);
    }

    #[test]
    fn refine_adds_cross_region_reference() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = tracked_old_region(&heap);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, r1, 0, 0);
        let p = wide_field(holder, 0);
        p.store(object);
        let header = mark_raw(object);

        G1ConcurrentRefineOopClosure::new(&heap, 3).visit_slot(p);
        assert!(r1.rem_set().contains_reference(p.as_address()));
        assert_eq!(r1.rem_set().occupied(), 1);
        assert_eq!(mark_raw(object), header);
        assert_eq!(p.load(), Some(object));
    }

    #[test]
    fn refine_ignores_same_region_and_untracked() {
        let heap = new_heap();
        let r0 = tracked_old_region(&heap);
        let untracked = new_region(&heap, RegionType::Old);
        let holder = alloc_object(&heap, r0, 2, 0);
        let local = alloc_object(&heap, r0, 0, 0);
        let other = alloc_object(&heap, untracked, 0, 0);
        wide_field(holder, 0).store(local);
        wide_field(holder, 1).store(other);

        let mut closure = G1ConcurrentRefineOopClosure::new(&heap, 0);
        MockVM::scan_object(holder, None, &mut closure);
        assert!(r0.rem_set().is_empty());
        assert!(untracked.rem_set().is_empty());
    }

    #[test]
    fn refine_does_not_consult_cset() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let eden = new_region(&heap, RegionType::Eden);
        let holder = alloc_object(&heap, old, 1, 0);
        let young = alloc_object(&heap, eden, 0, 0);
        wide_field(holder, 0).store(young);
        heap.register_young_region_with_cset(eden);

        G1ConcurrentRefineOopClosure::new(&heap, 0).visit_slot(wide_field(holder, 0));
        assert!(eden.rem_set().contains_reference(wide_field(holder, 0).as_address()));
        assert!(!object_forwarding::is_forwarded(young));
    }

    #[test]
    fn humongous_tail_to_head_is_same_region() {
        let heap = new_heap();
        let region_size = heap.geometry().region_size();
        let num_wide = region_size / 8 + 16;
        let humongous = alloc_humongous(&heap, num_wide, 0);
        let tail = wide_field(humongous, num_wide - 1);
        tail.store(humongous);
        let start = heap.region_of_object(humongous);
        assert!(heap.region_of(tail.as_address()).is_continues_humongous());

        G1ConcurrentRefineOopClosure::new(&heap, 0).visit_slot(tail);
        G1RebuildRemSetClosure::new(&heap, 0).visit_slot(tail);
        assert!(start.rem_set().is_empty());
    }

    #[test]
    fn rebuild_records_into_updating_sets() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = new_region(&heap, RegionType::Old);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, r1, 0, 0);
        wide_field(holder, 0).store(object);
        r1.rem_set().set_state_updating();

        G1RebuildRemSetClosure::new(&heap, 0).visit_slot(wide_field(holder, 0));
        assert!(r1.rem_set().contains_reference(wide_field(holder, 0).as_address()));
    }

    #[test]
    fn untracked_targets_are_not_recorded() {
        let heap = new_heap();
        let r0 = new_region(&heap, RegionType::Old);
        let untracked = new_region(&heap, RegionType::Old);
        let holder = alloc_object(&heap, r0, 1, 0);
        let object = alloc_object(&heap, untracked, 0, 0);
        let p = wide_field(holder, 0);
        p.store(object);
        assert!(!untracked.rem_set().is_tracked());

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanObjsDuringUpdateRSClosure::new(&mut pss).visit_slot(p);
        assert_eq!(untracked.rem_set().occupied(), 0);
        assert!(pss.queue_is_empty());

        G1RebuildRemSetClosure::new(&heap, 0).visit_slot(p);
        assert_eq!(untracked.rem_set().occupied(), 0);
        assert!(!untracked.rem_set().contains_reference(p.as_address()));
        assert_eq!(p.load(), Some(object));
    }

    #[test]
    fn scan_evacuated_humongous_tail_to_head() {
        let heap = new_heap();
        let region_size = heap.geometry().region_size();
        let num_wide = region_size / 8 + 16;
        let humongous = alloc_humongous(&heap, num_wide, 0);
        let tail = wide_field(humongous, num_wide - 1);
        tail.store(humongous);
        let start = heap.region_of_object(humongous);
        start.clear_humongous_is_live();

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanEvacuatedObjClosure::new(&mut pss, start).visit_slot(tail);
        assert!(pss.deferred_cards().is_empty());
        assert!(pss.queue_is_empty());
        assert!(!heap.humongous_is_live(humongous));
        assert!(start.rem_set().is_empty());
        assert_eq!(tail.load(), Some(humongous));
    }

    #[test]
    fn root_region_scan_marks_referents() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let survivor = new_region(&heap, RegionType::Survivor);
        let target = alloc_object(&heap, old, 0, 0);
        let holder = alloc_object(&heap, survivor, 1, 0);
        wide_field(holder, 0).store(target);
        heap.concurrent_mark().pre_initial_mark(&heap);

        let mut closure = G1RootRegionScanClosure::new(&heap, 0);
        closure.visit_slot(wide_field(holder, 0));
        closure.visit_slot(wide_field(holder, 0));
        assert!(heap.concurrent_mark().is_marked_in_next(target));
        heap.concurrent_mark().flush_mark_stats_caches();
        assert_eq!(
            heap.concurrent_mark().live_bytes(old.index()),
            object_size(0, 0)
        );
    }

    #[test]
    fn narrow_slots() {
        let heap = new_heap();
        let Some(oops) = heap.compressed_oops() else {
            return;
        };
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = tracked_old_region(&heap);
        let eden = new_region(&heap, RegionType::Eden);
        let holder = alloc_object(&heap, r0, 0, 2);
        let target = alloc_object(&heap, r1, 0, 0);
        let young = alloc_object(&heap, eden, 0, 0);
        let n0 = narrow_field(holder, oops, 0);
        let n1 = narrow_field(holder, oops, 1);
        n0.store(target);
        n1.store(young);

        G1ConcurrentRefineOopClosure::new(&heap, 0).visit_slot(n0);
        assert!(r1.rem_set().contains_reference(n0.as_address()));

        heap.register_young_region_with_cset(eden);
        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        G1ScanRootsClosure::new(&mut pss).visit_slot(n1);
        let copy = n1.load().unwrap();
        assert!(heap.region_of_object(copy).is_survivor());
        assert_eq!(object_forwarding::forwardee(young), copy);
    }

    #[test]
    fn narrow_slots_during_rebuild_and_root_region_scan() {
        let heap = new_heap();
        let Some(oops) = heap.compressed_oops() else {
            return;
        };
        let r0 = new_region(&heap, RegionType::Old);
        let r1 = new_region(&heap, RegionType::Old);
        let survivor = new_region(&heap, RegionType::Survivor);
        let holder = alloc_object(&heap, r0, 0, 1);
        let target = alloc_object(&heap, r1, 0, 0);
        let root = alloc_object(&heap, survivor, 0, 1);
        let n0 = narrow_field(holder, oops, 0);
        let n1 = narrow_field(root, oops, 0);
        n0.store(target);
        n1.store(target);

        r1.rem_set().set_state_updating();
        G1RebuildRemSetClosure::new(&heap, 0).visit_slot(n0);
        assert!(r1.rem_set().contains_reference(n0.as_address()));
        assert_eq!(r1.rem_set().occupied(), 1);

        heap.concurrent_mark().pre_initial_mark(&heap);
        G1RootRegionScanClosure::new(&heap, 0).visit_slot(n1);
        assert!(heap.concurrent_mark().is_marked_in_next(target));
        assert_eq!(n1.load(), Some(target));
    }
}
