// Eager reclaim of humongous objects at the end of a young pause.

use super::mock_test_prelude::*;

/// A humongous object spanning two regions.
fn two_region_object(heap: &G1CollectedHeap<MockVM>) -> ObjectReference {
    let num_wide = heap.geometry().region_size() / 8;
    let object = alloc_humongous(heap, num_wide, 0);
    assert!(heap.region_at(heap.region_of_object(object).index() + 1).is_continues_humongous());
    object
}

fn evacuate(heap: &G1CollectedHeap<MockVM>, strong: &[AnySlot]) -> EvacuationInfo {
    G1EvacuationPause::new(heap).evacuate(
        G1Roots {
            strong,
            ..Default::default()
        },
        false,
    )
}

#[test]
pub fn unreachable_candidate_is_reclaimed() {
    let heap = new_heap();
    let free = heap.num_free_regions();
    let humongous = two_region_object(&heap);
    let hr = heap.region_of_object(humongous);
    assert!(heap.register_humongous_region_with_cset(hr));
    let info = evacuate(&heap, &[]);
    assert_eq!(info.regions_freed, 2);
    assert!(hr.is_free());
    assert_eq!(heap.num_free_regions(), free);
}

#[test]
pub fn root_referent_is_kept() {
    let heap = new_heap();
    let humongous = two_region_object(&heap);
    let hr = heap.region_of_object(humongous);
    assert!(heap.register_humongous_region_with_cset(hr));
    let roots = RootSlots::new(&[humongous]);
    let info = evacuate(&heap, &roots.slots());
    assert_eq!(info.regions_freed, 0);
    assert!(hr.is_starts_humongous());
    assert!(!hr.in_collection_set());
    // Humongous objects never move.
    assert_eq!(roots.get(0), Some(humongous));
}

#[test]
pub fn referent_of_a_dirty_card_is_kept() {
    let heap = new_heap();
    let old = new_region(&heap, RegionType::Old);
    let holder = alloc_object(&heap, old, 1, 0);
    let humongous = two_region_object(&heap);
    let slot = wide_field(holder, 0);
    slot.store(humongous);
    let mut dcq = DirtyCardQueue::new();
    heap.post_write_barrier(&mut dcq, slot.as_address(), Some(humongous));
    dcq.flush(heap.dirty_card_queue_set());

    let hr = heap.region_of_object(humongous);
    assert!(heap.register_humongous_region_with_cset(hr));
    let info = evacuate(&heap, &[]);
    assert_eq!(info.regions_freed, 0);
    assert!(hr.is_starts_humongous());
    // Updating the remembered sets recorded the reference.
    assert!(hr.rem_set().contains_reference(slot.as_address()));
    assert!(verify_remembered_sets(&heap).is_empty());
}

#[test]
pub fn referent_of_a_young_object_is_kept() {
    let heap = new_heap();
    let eden = new_region(&heap, RegionType::Eden);
    let young = alloc_object(&heap, eden, 1, 0);
    let humongous = two_region_object(&heap);
    wide_field(young, 0).store(humongous);
    heap.register_young_region_with_cset(eden);
    let hr = heap.region_of_object(humongous);
    assert!(heap.register_humongous_region_with_cset(hr));

    let roots = RootSlots::new(&[young]);
    let info = evacuate(&heap, &roots.slots());
    assert_eq!(info.objects_copied, 1);
    assert_eq!(info.regions_freed, 1);
    assert!(hr.is_starts_humongous());
    let copy = roots.get(0).unwrap();
    assert_eq!(wide_field(copy, 0).load(), Some(humongous));
}

#[test]
pub fn remembered_objects_are_not_candidates() {
    let heap = new_heap();
    let old = new_region(&heap, RegionType::Old);
    let holder = alloc_object(&heap, old, 1, 0);
    let humongous = two_region_object(&heap);
    let slot = wide_field(holder, 0);
    slot.store(humongous);
    let mut dcq = DirtyCardQueue::new();
    heap.post_write_barrier(&mut dcq, slot.as_address(), Some(humongous));
    dcq.flush(heap.dirty_card_queue_set());
    G1ConcurrentRefine::new(&heap).refine_all(1);

    let hr = heap.region_of_object(humongous);
    assert!(!hr.rem_set().is_empty());
    assert!(!heap.register_humongous_region_with_cset(hr));
    assert!(heap.humongous_reclaim_candidates().is_empty());
    assert_eq!(evacuate(&heap, &[]).regions_freed, 0);
}
