// Mutator threads store old-to-young references while refinement threads run.

use super::mock_test_prelude::*;
use crate::util::constants::{BYTES_IN_CARD, BYTES_IN_WORD};

const NUM_MUTATORS: usize = 2;
const HOLDERS_PER_MUTATOR: usize = 32;

#[test]
pub fn refinement_runs_alongside_mutators() {
    let heap = new_heap_with(|o| o.refinement_buffer_size = 2);
    // One holder per card. Each card is dirtied once, after its only store.
    let fields = BYTES_IN_CARD / BYTES_IN_WORD - HEADER_WORDS;
    let holders: Vec<Vec<ObjectReference>> = (0..NUM_MUTATORS)
        .map(|_| {
            let old = new_region(&heap, RegionType::Old);
            (0..HOLDERS_PER_MUTATOR)
                .map(|_| alloc_object(&heap, old, fields, 0))
                .collect()
        })
        .collect();
    assert_eq!(object_size(fields, 0), BYTES_IN_CARD);
    let eden = new_region(&heap, RegionType::Eden);
    let targets: Vec<ObjectReference> = (0..NUM_MUTATORS * HOLDERS_PER_MUTATOR)
        .map(|_| alloc_object(&heap, eden, 0, 0))
        .collect();

    let refine = G1ConcurrentRefine::new(&heap);
    let qset = heap.dirty_card_queue_set();
    std::thread::scope(|s| {
        let refinement = s.spawn(|| refine.run(2));
        let mutators: Vec<_> = holders
            .iter()
            .zip(targets.chunks(HOLDERS_PER_MUTATOR))
            .map(|(holders, targets)| {
                let heap = &heap;
                s.spawn(move || {
                    let mut dcq = DirtyCardQueue::new();
                    for (holder, target) in holders.iter().zip(targets.iter()) {
                        let slot = wide_field(*holder, 0);
                        slot.store(*target);
                        heap.post_write_barrier(&mut dcq, slot.as_address(), Some(*target));
                    }
                    dcq.flush(qset);
                })
            })
            .collect();
        for mutator in mutators {
            mutator.join().unwrap();
        }
        qset.shutdown();
        refinement.join().unwrap();
    });
    // Buffers below the wake-up threshold are left for the next pause, or for a final drain.
    refine.refine_all(1);
    assert!(qset.is_empty());

    let rem_set = eden.rem_set();
    for holder in holders.iter().flatten() {
        assert!(rem_set.contains_reference(wide_field(*holder, 0).as_address()));
    }
    assert_eq!(rem_set.occupied(), NUM_MUTATORS * HOLDERS_PER_MUTATOR);
    assert!(verify_remembered_sets(&heap).is_empty());
}
