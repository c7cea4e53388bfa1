use super::G1CollectedHeap;
use crate::policy::region::Card;
use crate::util::{Address, ObjectReference};
use crate::vm::slot::Slot;
use crate::vm::{Scanning, SlotVisitor, VMBinding};

/// Collects the cross-region references not covered by the target's remembered set.
struct VerifyRemSetClosure<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    missing: Vec<(Address, ObjectReference)>,
}

impl<VM: VMBinding> SlotVisitor for VerifyRemSetClosure<'_, VM> {
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let heap = self.heap;
        let slot_addr = slot.as_address();
        if !heap.is_in_reserved(object.to_raw_address())
            || heap.is_in_same_region(slot_addr, object)
        {
            return;
        }
        let to = heap.region_of_object(object);
        if to.is_free() || !to.rem_set().is_tracked() {
            return;
        }
        // A dirty card is still waiting for refinement.
        if heap.card_table().is_dirty(Card::of(slot_addr)) {
            return;
        }
        if !to.rem_set().contains_reference(slot_addr) {
            self.missing.push((slot_addr, object));
        }
    }
}

/// Check that every cross-region reference out of a non-young region is known to the
/// remembered set of its target, or is on a dirty card. Returns the slots that are neither,
/// with their referents. Must not run concurrently with mutators or a pause.
pub fn verify_remembered_sets<VM: VMBinding>(
    heap: &G1CollectedHeap<VM>,
) -> Vec<(Address, ObjectReference)> {
    let oops = heap.compressed_oops();
    let mut closure = VerifyRemSetClosure {
        heap,
        missing: vec![],
    };
    for hr in heap.regions() {
        if hr.is_free() || hr.is_young() {
            continue;
        }
        hr.object_iterate::<VM, _>(|object| {
            VM::VMScanning::scan_object(object, oops, &mut closure);
        });
    }
    for (slot_addr, object) in closure.missing.iter() {
        warn!(
            "Slot {} refers to {} in region {} without a remembered set entry",
            slot_addr,
            object,
            heap.region_of_object(*object).index()
        );
    }
    closure.missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::region::RegionType;
    use crate::util::test_util::mock_vm::*;

    #[test]
    fn reports_unrecorded_references() {
        let heap = new_heap();
        let old = new_region(&heap, RegionType::Old);
        let eden = new_region(&heap, RegionType::Eden);
        let untracked = new_region(&heap, RegionType::Old);
        let a = alloc_object(&heap, old, 2, 0);
        let y = alloc_object(&heap, eden, 1, 0);
        let u = alloc_object(&heap, untracked, 0, 0);
        wide_field(a, 0).store(y);
        wide_field(a, 1).store(u);
        // Young regions are not checked.
        wide_field(y, 0).store(a);

        let slot = wide_field(a, 0).as_address();
        assert_eq!(verify_remembered_sets(&heap), vec![(slot, y)]);

        heap.card_table().mark_dirty(Card::of(slot));
        assert!(verify_remembered_sets(&heap).is_empty());

        heap.card_table().clear(Card::of(slot));
        eden.rem_set().add_reference(slot, 0);
        assert!(verify_remembered_sets(&heap).is_empty());
    }

    #[test]
    fn humongous_self_references_are_intra_region() {
        let heap = new_heap();
        let region_size = heap.geometry().region_size();
        let num_wide = region_size / 8;
        let h = alloc_humongous(&heap, num_wide, 0);
        wide_field(h, num_wide - 1).store(h);
        assert!(verify_remembered_sets(&heap).is_empty());
    }
}
