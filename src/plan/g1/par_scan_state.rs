use crossbeam::deque::{Steal, Stealer, Worker};
use enum_map::{Enum, EnumMap};

use super::closures::G1ScanEvacuatedObjClosure;
use super::G1CollectedHeap;
use crate::policy::region::{CSetState, Card, HeapRegion, RegionType};
use crate::util::mark_word::{mark_raw, set_mark_raw};
use crate::util::preserved_marks::PreservedMarks;
use crate::util::{memory, object_forwarding};
use crate::util::{Address, MarkWord, ObjectReference};
use crate::vm::slot::{AnySlot, Slot};
use crate::vm::{ObjectModel, Scanning, VMBinding};

/// Where an evacuated object is copied to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum G1Dest {
    Survivor,
    Old,
}

impl G1Dest {
    fn region_type(self) -> RegionType {
        match self {
            G1Dest::Survivor => RegionType::Survivor,
            G1Dest::Old => RegionType::Old,
        }
    }
}

/// The state of one worker during an evacuation pause.
///
/// The worker owns a queue of slots whose referents still have to be evacuated, and one GC
/// allocation region per destination. Other workers steal from the queue through
/// [`stealer`](Self::stealer) once their own queue runs dry.
pub struct G1ParScanThreadState<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    worker_id: usize,
    queue: Worker<AnySlot>,
    trim_target: usize,
    during_initial_mark: bool,
    tenuring_threshold: usize,
    alloc_regions: EnumMap<G1Dest, Option<&'h HeapRegion>>,
    used_regions: Vec<&'h HeapRegion>,
    deferred_cards: Vec<Card>,
    preserved_marks: PreservedMarks,
    bytes_copied: usize,
    objects_copied: usize,
    evacuation_failed: bool,
}

impl<'h, VM: VMBinding> G1ParScanThreadState<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>, worker_id: usize, during_initial_mark: bool) -> Self {
        Self {
            heap,
            worker_id,
            queue: Worker::new_lifo(),
            trim_target: heap.options().gc_drain_stack_target_size,
            during_initial_mark,
            tenuring_threshold: heap.options().max_tenuring_threshold,
            alloc_regions: EnumMap::default(),
            used_regions: vec![],
            deferred_cards: vec![],
            preserved_marks: PreservedMarks::new(),
            bytes_copied: 0,
            objects_copied: 0,
            evacuation_failed: false,
        }
    }

    pub fn heap(&self) -> &'h G1CollectedHeap<VM> {
        self.heap
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn during_initial_mark(&self) -> bool {
        self.during_initial_mark
    }

    pub fn stealer(&self) -> Stealer<AnySlot> {
        self.queue.stealer()
    }

    pub fn push_on_queue(&mut self, slot: AnySlot) {
        self.queue.push(slot);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn bytes_copied(&self) -> usize {
        self.bytes_copied
    }

    pub fn objects_copied(&self) -> usize {
        self.objects_copied
    }

    pub fn evacuation_failed(&self) -> bool {
        self.evacuation_failed
    }

    pub fn deferred_cards(&self) -> &[Card] {
        &self.deferred_cards
    }

    pub fn preserved_marks(&self) -> &PreservedMarks {
        &self.preserved_marks
    }

    /// Process queue entries until at most the drain target is left. Does nothing unless the
    /// queue holds more than twice the target, so the queue keeps some work to be stolen.
    pub fn trim_queue_partially(&mut self) {
        if self.queue.len() <= 2 * self.trim_target {
            return;
        }
        while self.queue.len() > self.trim_target {
            match self.queue.pop() {
                Some(slot) => self.dispatch_task(slot),
                None => break,
            }
        }
    }

    /// Process queue entries until the queue is empty.
    pub fn trim_queue(&mut self) {
        while let Some(slot) = self.queue.pop() {
            self.dispatch_task(slot);
        }
    }

    /// Steal a batch from some other worker and process it. Returns false if nothing could be
    /// stolen.
    pub fn steal_and_trim_queue(&mut self, stealers: &[Stealer<AnySlot>]) -> bool {
        let n = stealers.len();
        for i in 1..=n {
            let victim = &stealers[(self.worker_id + i) % n];
            loop {
                match victim.steal_batch_and_pop(&self.queue) {
                    Steal::Success(slot) => {
                        self.dispatch_task(slot);
                        self.trim_queue();
                        return true;
                    }
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        false
    }

    #[inline(always)]
    fn dispatch_task(&mut self, slot: AnySlot) {
        match slot {
            AnySlot::Wide(s) => self.do_oop_evac(s),
            AnySlot::Narrow(s) => self.do_oop_evac(s),
        }
    }

    /// Evacuate the referent of a queued slot, store the forwardee, and record the slot for
    /// remembered set insertion if it now holds a cross-region reference.
    fn do_oop_evac<S: Slot>(&mut self, slot: S) {
        let Some(mut object) = slot.load() else {
            return;
        };
        let state = self.heap.in_cset_state(object);
        if state.is_in_cset() {
            let mark = mark_raw(object);
            let forwardee = if mark.is_marked() {
                mark.decode_pointer()
            } else {
                self.copy_to_survivor_space(state, object, mark)
            };
            slot.store(forwardee);
            object = forwardee;
        } else if state.is_humongous() {
            self.heap.set_humongous_is_live(object);
        }

        let slot_addr = slot.as_address();
        if self.heap.is_in_reserved(slot_addr) && !self.heap.is_in_same_region(slot_addr, object) {
            let from = self.heap.region_of(slot_addr);
            self.update_rs(from, slot_addr, object);
        }
    }

    /// Record the card of `slot_addr` for insertion into the remembered set of `object`'s region
    /// after the pause. Slots in young regions are never recorded, and neither are references
    /// into regions that do not track their remembered set.
    pub fn update_rs(&mut self, from: &HeapRegion, slot_addr: Address, object: ObjectReference) {
        debug_assert!(
            !self.heap.is_in_same_region(slot_addr, object),
            "Caller should have filtered out intra-region references"
        );
        if from.is_young() {
            return;
        }
        if !self.heap.region_of_object(object).rem_set().is_tracked() {
            return;
        }
        let card = Card::of(slot_addr);
        if self.heap.card_table().mark_card_deferred(card) {
            self.deferred_cards.push(card);
        }
    }

    /// Copy `old`, whose header was `old_mark`, out of the collection set and install the
    /// forwarding pointer. If another worker forwarded `old` first, the copy is discarded and
    /// that worker's forwardee is returned.
    pub fn copy_to_survivor_space(
        &mut self,
        state: CSetState,
        old: ObjectReference,
        old_mark: MarkWord,
    ) -> ObjectReference {
        debug_assert!(state.is_in_cset());
        debug_assert!(!old_mark.is_marked());
        let size = VM::VMObjectModel::get_current_size(old);
        let age = if old_mark.is_unlocked() { old_mark.age() } else { 0 };
        let dest = if state.is_young() && age < self.tenuring_threshold {
            G1Dest::Survivor
        } else {
            G1Dest::Old
        };
        let Some((to, to_region)) = self.allocate_copy(dest, size) else {
            return self.handle_evacuation_failure_par(old, old_mark);
        };

        memory::copy_nonoverlapping(old.to_raw_address(), to, size);
        let new = VM::VMObjectModel::get_object_from_start_address(to);
        let new_mark = if to_region.is_survivor() {
            old_mark.incr_age()
        } else {
            old_mark
        };
        set_mark_raw(new, new_mark);

        match object_forwarding::forward_to_atomic(old, new, old_mark) {
            None => {
                self.bytes_copied += size;
                self.objects_copied += 1;
                let oops = self.heap.compressed_oops();
                let mut closure = G1ScanEvacuatedObjClosure::new(self, to_region);
                VM::VMScanning::scan_object(new, oops, &mut closure);
                new
            }
            Some(forwardee) => {
                self.undo_allocation(to_region, to, size);
                forwardee
            }
        }
    }

    /// Evacuation of `old` failed for lack of space: forward it to itself and scan it in place.
    fn handle_evacuation_failure_par(
        &mut self,
        old: ObjectReference,
        old_mark: MarkWord,
    ) -> ObjectReference {
        match object_forwarding::forward_to_atomic(old, old, old_mark) {
            None => {
                let heap = self.heap;
                let region = heap.region_of_object(old);
                if region.set_evacuation_failed() {
                    debug!("Evacuation failed in region {}", region.index());
                    probe!(g1closures, evacuation_failure, region.index());
                }
                self.evacuation_failed = true;
                self.preserved_marks.push_if_necessary(old, old_mark);
                let oops = heap.compressed_oops();
                let mut closure = G1ScanEvacuatedObjClosure::new(self, region);
                VM::VMScanning::scan_object(old, oops, &mut closure);
                old
            }
            Some(forwardee) => forwardee,
        }
    }

    fn allocate_copy(&mut self, dest: G1Dest, size: usize) -> Option<(Address, &'h HeapRegion)> {
        if let Some(region) = self.alloc_regions[dest] {
            if let Some(addr) = self.heap.allocate_in(region, size) {
                return Some((addr, region));
            }
        }
        if size > self.heap.geometry().region_size() {
            return None;
        }
        self.retire_alloc_region(dest);
        match self.heap.alloc_region(dest.region_type()) {
            Some(region) => {
                self.init_alloc_region(dest, region);
                self.heap.allocate_in(region, size).map(|addr| (addr, region))
            }
            // Out of survivor space: promote instead.
            None if dest == G1Dest::Survivor => self.allocate_copy(G1Dest::Old, size),
            None => None,
        }
    }

    fn init_alloc_region(&mut self, dest: G1Dest, region: &'h HeapRegion) {
        trace!("Worker {} allocates {:?} copies in {:?}", self.worker_id, dest, region);
        if self.during_initial_mark && dest == G1Dest::Old {
            // Copies into old regions are explicitly marked below TAMS. TAMS is lowered to the
            // final top when the region is retired.
            region.set_next_top_at_mark_start(region.end());
        }
        self.alloc_regions[dest] = Some(region);
        self.used_regions.push(region);
    }

    fn retire_alloc_region(&mut self, dest: G1Dest) {
        if let Some(region) = self.alloc_regions[dest].take() {
            if self.during_initial_mark && dest == G1Dest::Old {
                region.set_next_top_at_mark_start(region.top());
            }
        }
    }

    /// Give back the space of a copy that lost the forwarding race.
    fn undo_allocation(&self, region: &HeapRegion, start: Address, size: usize) {
        if region.top() == start + size {
            region.set_top(start);
        } else {
            VM::VMObjectModel::fill_with_dummy_object(start, size);
        }
    }

    /// End the pause for this worker: retire the allocation regions and re-dirty the deferred
    /// cards so refinement inserts them into remembered sets later.
    pub fn flush(&mut self) -> G1ParScanThreadStats<'h> {
        debug_assert!(self.queue.is_empty());
        self.retire_alloc_region(G1Dest::Survivor);
        self.retire_alloc_region(G1Dest::Old);
        let card_table = self.heap.card_table();
        let qset = self.heap.dirty_card_queue_set();
        let deferred = std::mem::take(&mut self.deferred_cards);
        for card in deferred.iter() {
            card_table.mark_dirty(*card);
        }
        for buffer in deferred.chunks(qset.buffer_size()) {
            qset.enqueue_completed_buffer(buffer.to_vec());
        }
        G1ParScanThreadStats {
            bytes_copied: self.bytes_copied,
            objects_copied: self.objects_copied,
            evacuation_failed: self.evacuation_failed,
            deferred_cards: deferred.len(),
            preserved_marks: std::mem::take(&mut self.preserved_marks),
            used_regions: std::mem::take(&mut self.used_regions),
        }
    }
}

/// What one worker did during a pause.
pub struct G1ParScanThreadStats<'h> {
    pub bytes_copied: usize,
    pub objects_copied: usize,
    pub evacuation_failed: bool,
    pub deferred_cards: usize,
    pub preserved_marks: PreservedMarks,
    pub used_regions: Vec<&'h HeapRegion>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::region::CardValue;
    use crate::util::object_forwarding;
    use crate::util::test_util::mock_vm::*;
    use crate::vm::slot::Slot;

    #[test]
    fn copy_forwards_and_ages() {
        let heap = new_heap();
        let eden = new_region(&heap, RegionType::Eden);
        let obj = alloc_object(&heap, eden, 1, 0);
        let target = alloc_object(&heap, eden, 0, 0);
        wide_field(obj, 0).store(target);
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        let new = pss.copy_to_survivor_space(CSetState::Young, obj, mark_raw(obj));
        assert_ne!(new, obj);
        assert!(heap.region_of_object(new).is_survivor());
        assert_eq!(object_forwarding::forwardee(obj), new);
        assert_eq!(mark_raw(new).age(), 1);
        assert_eq!(pss.objects_copied(), 1);
        // The copy's field was pushed for evacuation.
        assert_eq!(pss.queue_len(), 1);
        pss.trim_queue();
        let moved_target = wide_field(new, 0).load().unwrap();
        assert!(heap.region_of_object(moved_target).is_survivor());
        assert_eq!(object_forwarding::forwardee(target), moved_target);
    }

    #[test]
    fn old_objects_are_promoted() {
        let heap = new_heap_with(|o| o.max_tenuring_threshold = 0);
        let eden = new_region(&heap, RegionType::Eden);
        let obj = alloc_object(&heap, eden, 0, 0);
        heap.register_young_region_with_cset(eden);
        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        let new = pss.copy_to_survivor_space(CSetState::Young, obj, mark_raw(obj));
        assert!(heap.region_of_object(new).is_old());
        assert_eq!(mark_raw(new).age(), 0);
    }

    #[test]
    fn losing_copy_is_undone() {
        let heap = new_heap();
        let eden = new_region(&heap, RegionType::Eden);
        let obj = alloc_object(&heap, eden, 0, 0);
        let other = alloc_object(&heap, eden, 0, 0);
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        // Make the allocation region exist, then pretend another worker already forwarded `obj`.
        let first = pss.copy_to_survivor_space(CSetState::Young, other, mark_raw(other));
        let survivor = heap.region_of_object(first);
        let top = survivor.top();
        let mark = mark_raw(obj);
        object_forwarding::forward_to(obj, first);
        assert_eq!(pss.copy_to_survivor_space(CSetState::Young, obj, mark), first);
        assert_eq!(survivor.top(), top);
        assert_eq!(pss.objects_copied(), 1);
    }

    #[test]
    fn update_rs_defers_card_once() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let eden = new_region(&heap, RegionType::Eden);
        let untracked = new_region(&heap, RegionType::Old);
        let a = alloc_object(&heap, old, 2, 0);
        let y = alloc_object(&heap, eden, 0, 0);
        let u = alloc_object(&heap, untracked, 0, 0);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        let slot0 = wide_field(a, 0).as_address();
        let slot1 = wide_field(a, 1).as_address();
        pss.update_rs(old, slot0, y);
        pss.update_rs(old, slot1, y);
        pss.update_rs(old, slot0, u);
        assert_eq!(pss.deferred_cards(), &[Card::of(slot0)]);
        assert_eq!(heap.card_table().get(Card::of(slot0)), CardValue::Deferred);

        // Slots in young regions are never recorded.
        let b = alloc_object(&heap, eden, 1, 0);
        pss.update_rs(eden, wide_field(b, 0).as_address(), a);
        assert_eq!(pss.deferred_cards().len(), 1);

        let stats = pss.flush();
        assert_eq!(stats.deferred_cards, 1);
        assert!(heap.card_table().is_dirty(Card::of(slot0)));
        assert_eq!(heap.dirty_card_queue_set().num_cards(), 1);
    }

    #[test]
    fn evacuation_failure_self_forwards() {
        // No free region is left to copy into.
        let heap = new_heap_with(|o| o.heap_size = 2 * o.region_size);
        let eden = new_region(&heap, RegionType::Eden);
        let old = new_region(&heap, RegionType::Old);
        assert_eq!(heap.num_free_regions(), 0);
        let b = alloc_object(&heap, eden, 1, 0);
        let target = alloc_object(&heap, old, 0, 0);
        wide_field(b, 0).store(target);
        set_mark_raw(b, MarkWord::prototype().copy_set_hash(42));
        heap.register_young_region_with_cset(eden);

        let mut pss = G1ParScanThreadState::new(&heap, 0, false);
        let b_mark = mark_raw(b);
        let b2 = pss.copy_to_survivor_space(CSetState::Young, b, b_mark);
        assert_eq!(b2, b);
        assert!(object_forwarding::is_self_forwarded(b));
        assert!(eden.evacuation_failed());
        assert!(pss.evacuation_failed());
        assert_eq!(pss.preserved_marks().len(), 1);
        assert_eq!(pss.preserved_marks().original_mark(b), b_mark);
        // The object is scanned in place. Its field points to a non-collection-set region and
        // the slot is in a young region, so nothing is queued or recorded.
        assert!(pss.queue_is_empty());
        assert!(pss.deferred_cards().is_empty());

        // A second attempt sees the self-forwarding pointer.
        let again = pss.copy_to_survivor_space(CSetState::Young, b, b_mark);
        assert_eq!(again, b);
    }
}
