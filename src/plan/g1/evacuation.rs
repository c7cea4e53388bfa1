use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

use crossbeam::deque::Stealer;
use spin::Mutex;

use super::closures::{
    G1Mark, G1MarkCLDClosure, G1MarkPromotedCLDClosure, G1MarkPromotedRootsClosure,
    G1MarkRootsClosure, G1ParCopyClosure, G1ScanCLDClosure, G1ScanRootsClosure, G1_BARRIER_CLD,
};
use super::par_scan_state::G1ParScanThreadStats;
use super::{G1CollectedHeap, G1ParScanThreadState, G1RemSet, G1RemSetScanState};
use crate::policy::region::{Card, HeapRegion};
use crate::util::mark_word::set_mark_raw;
use crate::util::object_forwarding;
use crate::util::MarkWord;
use crate::vm::slot::{AnySlot, Slot};
use crate::vm::{ClassLoaderData, ObjectModel, Scanning, SlotVisitor, VMBinding};

/// The number of dirty cards a worker claims at a time in the update phase.
const UPDATE_RS_CHUNK_SIZE: usize = 64;

/// Decides when the workers of a pause may stop: once every worker has offered termination
/// and all queues are empty.
///
/// A worker offers termination after its own queue is drained and stealing failed. While it
/// waits, it watches the queues of the others. If work shows up it retracts the offer and goes
/// back to stealing.
pub struct TaskTerminator {
    n_threads: usize,
    offered: AtomicUsize,
}

impl TaskTerminator {
    pub fn new(n_threads: usize) -> Self {
        Self {
            n_threads,
            offered: AtomicUsize::new(0),
        }
    }

    /// Returns true if all workers have terminated, or false if the caller should look for more
    /// work.
    pub fn offer_termination<T>(&self, stealers: &[Stealer<T>]) -> bool {
        self.offered.fetch_add(1, Ordering::SeqCst);
        loop {
            if self.offered.load(Ordering::SeqCst) == self.n_threads {
                return true;
            }
            if stealers.iter().any(|s| !s.is_empty()) {
                self.offered.fetch_sub(1, Ordering::SeqCst);
                return false;
            }
            std::thread::yield_now();
        }
    }
}

/// The roots of an evacuation pause.
///
/// Strong roots keep their referents alive for the next marking cycle, so during an initial
/// mark pause their referents are marked. Referents of weak roots are only marked if they had
/// to be copied.
#[derive(Default, Clone, Copy)]
pub struct G1Roots<'r> {
    pub strong: &'r [AnySlot],
    pub weak: &'r [AnySlot],
    pub strong_clds: &'r [&'r ClassLoaderData],
    pub weak_clds: &'r [&'r ClassLoaderData],
}

/// What an evacuation pause did.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct EvacuationInfo {
    pub bytes_copied: usize,
    pub objects_copied: usize,
    pub evacuation_failed: bool,
    /// Cards queued for remembered set insertion after the pause.
    pub deferred_cards: usize,
    pub regions_freed: usize,
    pub preserved_marks: usize,
}

/// A stop-the-world, parallel copying collection of the collection set.
///
/// Each worker first scans its share of the dirty cards and of the remembered sets of the
/// collection set regions, then copies the referents of its share of the roots, and finally
/// drains its queue and steals from the others until all queues are empty.
pub struct G1EvacuationPause<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    rem_set: G1RemSet<'h, VM>,
}

impl<'h, VM: VMBinding> G1EvacuationPause<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>) -> Self {
        Self {
            heap,
            rem_set: G1RemSet::new(heap),
        }
    }

    /// Evacuate the collection set registered with the heap. During an initial mark pause,
    /// marking starts: the referents of strong roots and every promoted object are marked, and
    /// the survivor regions become the root regions of concurrent marking.
    ///
    /// Only completed buffers in the heap's
    /// [`DirtyCardQueueSet`](super::DirtyCardQueueSet) are processed by Update-RS. Callers must
    /// flush every mutator [`DirtyCardQueue`](super::DirtyCardQueue) into that set before the
    /// pause, or the cards still buffered there are missed and their cross-region references are
    /// lost.
    pub fn evacuate(&self, roots: G1Roots<'_>, initial_mark: bool) -> EvacuationInfo {
        let heap = self.heap;
        let n_workers = heap.options().threads.max(1);
        let cset = heap.collection_set();
        probe!(g1closures, evacuation_begin, cset.len(), initial_mark as usize);
        debug!(
            "Evacuation pause starts: {} collection set regions, {} humongous candidates, {} workers{}",
            cset.len(),
            heap.humongous_reclaim_candidates().len(),
            n_workers,
            if initial_mark { " (initial mark)" } else { "" }
        );

        let cards: Vec<Card> = heap
            .dirty_card_queue_set()
            .take_all()
            .into_iter()
            .flatten()
            .collect();
        for hr in heap.regions() {
            hr.rem_set().reset_from_card_cache();
        }
        if initial_mark {
            heap.concurrent_mark().pre_initial_mark(heap);
        }
        let scan_state = G1RemSetScanState::new(heap);

        let states: Vec<G1ParScanThreadState<'h, VM>> = (0..n_workers)
            .map(|worker_id| G1ParScanThreadState::new(heap, worker_id, initial_mark))
            .collect();
        let stealers: Vec<Stealer<AnySlot>> = states.iter().map(|pss| pss.stealer()).collect();
        let terminator = TaskTerminator::new(n_workers);
        let update_done = Barrier::new(n_workers);
        let next_card = AtomicUsize::new(0);
        let next_region = AtomicUsize::new(0);
        let results: Mutex<Vec<G1ParScanThreadStats<'h>>> = Mutex::new(vec![]);

        std::thread::scope(|s| {
            for mut pss in states {
                let (cards, cset, scan_state) = (&cards, &cset, &scan_state);
                let (stealers, terminator, update_done) = (&stealers, &terminator, &update_done);
                let (next_card, next_region, results) = (&next_card, &next_region, &results);
                s.spawn(move || {
                    loop {
                        let start = next_card.fetch_add(UPDATE_RS_CHUNK_SIZE, Ordering::Relaxed);
                        if start >= cards.len() {
                            break;
                        }
                        let end = (start + UPDATE_RS_CHUNK_SIZE).min(cards.len());
                        self.rem_set
                            .update_rem_set(&mut pss, &cards[start..end], scan_state);
                    }
                    // Remembered set scanning skips the cards claimed above.
                    update_done.wait();

                    loop {
                        let i = next_region.fetch_add(1, Ordering::Relaxed);
                        let Some(&index) = cset.get(i) else {
                            break;
                        };
                        self.rem_set
                            .scan_rem_set(&mut pss, heap.region_at(index), scan_state);
                    }

                    self.process_roots(&mut pss, roots, n_workers, initial_mark);

                    pss.trim_queue();
                    loop {
                        if pss.steal_and_trim_queue(stealers) {
                            continue;
                        }
                        if terminator.offer_termination(stealers) {
                            break;
                        }
                    }
                    let stats = pss.flush();
                    results.lock().push(stats);
                });
            }
        });

        let mut info = EvacuationInfo::default();
        let mut preserved = vec![];
        let mut survivors = vec![];
        for stats in results.into_inner() {
            info.bytes_copied += stats.bytes_copied;
            info.objects_copied += stats.objects_copied;
            info.evacuation_failed |= stats.evacuation_failed;
            info.deferred_cards += stats.deferred_cards;
            info.preserved_marks += stats.preserved_marks.len();
            preserved.push(stats.preserved_marks);
            survivors.extend(stats.used_regions.into_iter().filter(|hr| hr.is_survivor()));
        }

        if info.evacuation_failed {
            for &index in cset.iter() {
                let hr = heap.region_at(index);
                if hr.evacuation_failed() {
                    info.deferred_cards += self.remove_self_forwarding_pointers(hr, initial_mark);
                }
            }
            for mut marks in preserved {
                marks.restore();
            }
        }
        if initial_mark {
            for hr in survivors {
                heap.concurrent_mark().add_root_region(hr);
            }
        }
        info.regions_freed = heap.free_collection_set();

        #[cfg(feature = "extreme_assertions")]
        {
            let missing = super::verify_remembered_sets(heap);
            assert!(
                missing.is_empty(),
                "Cross-region references without remembered set entries after the pause: {:?}",
                missing
            );
        }

        probe!(
            g1closures,
            evacuation_end,
            info.bytes_copied,
            info.evacuation_failed as usize
        );
        debug!("Evacuation pause ends: {:?}", info);
        info
    }

    /// Apply the copy closures of this pause to worker `pss`'s share of the roots.
    fn process_roots(
        &self,
        pss: &mut G1ParScanThreadState<'h, VM>,
        roots: G1Roots<'_>,
        n_workers: usize,
        initial_mark: bool,
    ) {
        let worker_id = pss.worker_id();
        if initial_mark {
            visit_roots(roots.strong, worker_id, n_workers, &mut G1MarkRootsClosure::new(pss));
            visit_roots(
                roots.weak,
                worker_id,
                n_workers,
                &mut G1MarkPromotedRootsClosure::new(pss),
            );
            visit_clds(
                roots.strong_clds,
                worker_id,
                n_workers,
                &mut G1MarkCLDClosure::new(pss),
            );
            visit_clds(
                roots.weak_clds,
                worker_id,
                n_workers,
                &mut G1MarkPromotedCLDClosure::new(pss),
            );
        } else {
            let mut closure = G1ScanRootsClosure::new(pss);
            visit_roots(roots.strong, worker_id, n_workers, &mut closure);
            visit_roots(roots.weak, worker_id, n_workers, &mut closure);
            drop(closure);
            let mut closure = G1ScanCLDClosure::new(pss);
            visit_clds(roots.strong_clds, worker_id, n_workers, &mut closure);
            visit_clds(roots.weak_clds, worker_id, n_workers, &mut closure);
        }
    }

    /// Undo the self-forwarding of the objects of a region that failed evacuation. The
    /// region stays in place: objects that were copied elsewhere or never reached are
    /// overwritten with filler, and the cross-region references of the remaining objects are
    /// queued for remembered set insertion. Returns the number of cards queued.
    fn remove_self_forwarding_pointers(&self, hr: &'h HeapRegion, initial_mark: bool) -> usize {
        let heap = self.heap;
        let cm = heap.concurrent_mark();
        let oops = heap.compressed_oops();
        let mut update_rs = UpdateRSetDeferred::new(heap);
        let mut live = 0;
        hr.object_iterate::<VM, _>(|object| {
            if object_forwarding::is_self_forwarded(object) {
                set_mark_raw(object, MarkWord::prototype());
                if initial_mark {
                    cm.mark_in_next_bitmap(0, hr, object);
                }
                VM::VMScanning::scan_object(object, oops, &mut update_rs);
                live += VM::VMObjectModel::get_current_size(object);
            } else {
                let size = VM::VMObjectModel::get_current_size(object);
                VM::VMObjectModel::fill_with_dummy_object(object.to_raw_address(), size);
            }
        });
        let cards = update_rs.flush();
        debug!(
            "Region {} failed evacuation: {} live bytes stay in place, {} cards deferred",
            hr.index(),
            live,
            cards
        );
        cards
    }
}

/// Visit `slots[worker_id]`, `slots[worker_id + n_workers]` and so on.
fn visit_roots<V: SlotVisitor>(
    slots: &[AnySlot],
    worker_id: usize,
    n_workers: usize,
    visitor: &mut V,
) {
    for slot in slots.iter().skip(worker_id).step_by(n_workers) {
        slot.accept(visitor);
    }
}

/// Visit this worker's share of the class loaders with a closure running the CLD barrier.
fn visit_clds<'p, VM: VMBinding, const MARK: G1Mark>(
    clds: &[&'p ClassLoaderData],
    worker_id: usize,
    n_workers: usize,
    closure: &mut G1ParCopyClosure<'p, '_, VM, G1_BARRIER_CLD, MARK>,
) {
    for &cld in clds.iter().skip(worker_id).step_by(n_workers) {
        closure.set_scanned_cld(Some(cld));
        cld.oops_do(closure);
    }
    closure.set_scanned_cld(None);
}

/// Records the cross-region references of objects that stayed in place after evacuation
/// failure. The cards are dirtied and queued for refinement, like the deferred cards of the
/// workers.
struct UpdateRSetDeferred<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    cards: Vec<Card>,
}

impl<'h, VM: VMBinding> UpdateRSetDeferred<'h, VM> {
    fn new(heap: &'h G1CollectedHeap<VM>) -> Self {
        Self { heap, cards: vec![] }
    }

    fn flush(&mut self) -> usize {
        let card_table = self.heap.card_table();
        let qset = self.heap.dirty_card_queue_set();
        let cards = std::mem::take(&mut self.cards);
        for card in cards.iter() {
            card_table.mark_dirty(*card);
        }
        for buffer in cards.chunks(qset.buffer_size()) {
            qset.enqueue_completed_buffer(buffer.to_vec());
        }
        cards.len()
    }
}

impl<VM: VMBinding> SlotVisitor for UpdateRSetDeferred<'_, VM> {
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        let Some(object) = slot.load() else {
            return;
        };
        let slot_addr = slot.as_address();
        if self.heap.is_in_same_region(slot_addr, object)
            || !self.heap.is_in_reserved(object.to_raw_address())
        {
            return;
        }
        if !self.heap.region_of_object(object).rem_set().is_tracked() {
            return;
        }
        let card = Card::of(slot_addr);
        if self.heap.card_table().mark_card_deferred(card) {
            self.cards.push(card);
        }
    }
}
