use std::sync::atomic::{AtomicUsize, Ordering};

use super::closures::{
    G1ConcurrentRefineOopClosure, G1RebuildRemSetClosure, G1ScanObjsDuringScanRSClosure,
    G1ScanObjsDuringUpdateRSClosure,
};
use super::{G1CollectedHeap, G1ParScanThreadState};
use crate::policy::region::{Card, HeapGeometry, HeapRegion};
use crate::util::constants::{BITS_IN_WORD, LOG_BITS_IN_WORD};
use crate::util::Address;
use crate::vm::{ObjectModel, Scanning, SlotVisitor, VMBinding};

/// Old regions whose live bytes after marking exceed this share of the region size are not
/// worth evacuating, so their remembered sets are not rebuilt.
const MIXED_GC_LIVE_THRESHOLD_PERCENT: usize = 85;

/// Per-pause bookkeeping for the card scanning phases of an evacuation pause.
///
/// Each card is scanned at most once per pause, whether it was found dirty in the update phase
/// or through a remembered set. Scanning of a region stops at the top it had when the pause
/// started, so that objects copied into old regions during the pause are never scanned as
/// card contents.
pub struct G1RemSetScanState {
    geometry: HeapGeometry,
    claimed_cards: Box<[AtomicUsize]>,
    scan_top: Box<[Address]>,
}

impl G1RemSetScanState {
    pub fn new<VM: VMBinding>(heap: &G1CollectedHeap<VM>) -> Self {
        let geometry = heap.geometry();
        Self {
            geometry,
            claimed_cards: (0..geometry.num_cards().div_ceil(BITS_IN_WORD))
                .map(|_| AtomicUsize::new(0))
                .collect(),
            scan_top: heap
                .regions()
                .iter()
                .map(|hr| {
                    if hr.is_old() || hr.is_humongous() {
                        hr.top()
                    } else {
                        hr.bottom()
                    }
                })
                .collect(),
        }
    }

    #[inline(always)]
    fn entry(&self, card: Card) -> (&AtomicUsize, usize) {
        let index = self.geometry.card_index(card.start());
        (
            &self.claimed_cards[index >> LOG_BITS_IN_WORD],
            1usize << (index & (BITS_IN_WORD - 1)),
        )
    }

    /// Claim `card` for scanning. Returns false if some worker claimed it before.
    pub fn claim_card(&self, card: Card) -> bool {
        let (entry, mask) = self.entry(card);
        if entry.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        entry.fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    pub fn is_claimed(&self, card: Card) -> bool {
        let (entry, mask) = self.entry(card);
        entry.load(Ordering::Relaxed) & mask != 0
    }

    /// The limit of card scanning in region `index`. Young and free regions have nothing to
    /// scan.
    pub fn scan_top(&self, index: usize) -> Address {
        self.scan_top[index]
    }
}

/// The card-based traversals: refinement of dirty cards, the remembered set phases of an
/// evacuation pause, and the rebuild of remembered sets after marking.
pub struct G1RemSet<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
}

impl<'h, VM: VMBinding> G1RemSet<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>) -> Self {
        Self { heap }
    }

    /// Apply `visitor` to the slots on `card` of every object that intersects the card, up to
    /// `limit_top`. Returns false if there was nothing to scan.
    fn scan_card<V: SlotVisitor>(&self, card: Card, limit_top: Address, visitor: &mut V) -> bool {
        let limit = card.end().min(limit_top);
        if limit <= card.start() {
            return false;
        }
        let Some(start) = self.heap.block_offset_table().block_start(card) else {
            return false;
        };
        let oops = self.heap.compressed_oops();
        let mut cursor = start;
        while cursor < limit {
            let object = VM::VMObjectModel::get_object_from_start_address(cursor);
            VM::VMScanning::scan_object_bounded(object, oops, card.start()..limit, visitor);
            cursor = VM::VMObjectModel::get_object_end_address(object);
        }
        true
    }

    /// Refine one card outside a pause: clean it, then record every cross-region reference on
    /// it in the remembered set of the target region. Returns true if the card was scanned.
    ///
    /// Cards of young regions are never refined: all their references are found when the
    /// region is evacuated. Cards of free regions may still be queued from before the region
    /// was freed.
    pub fn refine_card_concurrently(&self, card: Card, worker_id: usize) -> bool {
        let heap = self.heap;
        if !heap.is_in_reserved(card.start()) {
            return false;
        }
        let hr = heap.region_of(card.start());
        if !(hr.is_old() || hr.is_humongous()) || hr.in_collection_set() {
            return false;
        }
        // Read top before cleaning. Objects allocated after this are not scanned.
        let scan_limit = hr.top();
        if !heap.card_table().clean_card_if_dirty(card) {
            return false;
        }
        let mut closure = G1ConcurrentRefineOopClosure::new(heap, worker_id);
        self.scan_card(card, scan_limit, &mut closure)
    }

    /// The update phase of a pause: scan the dirty cards left over from refinement. References
    /// into the collection set are queued for evacuation, and other cross-region references
    /// are recorded. Returns the number of cards scanned.
    pub fn update_rem_set(
        &self,
        pss: &mut G1ParScanThreadState<'h, VM>,
        cards: &[Card],
        scan_state: &G1RemSetScanState,
    ) -> usize {
        let heap = self.heap;
        let mut scanned = 0;
        for &card in cards {
            if !heap.is_in_reserved(card.start()) {
                continue;
            }
            let hr = heap.region_of(card.start());
            if hr.in_collection_set() || hr.is_young() || hr.is_free() {
                continue;
            }
            if !heap.card_table().clean_card_if_dirty(card) {
                continue;
            }
            if !scan_state.claim_card(card) {
                continue;
            }
            let limit = scan_state.scan_top(hr.index());
            let mut closure = G1ScanObjsDuringUpdateRSClosure::new(pss);
            if self.scan_card(card, limit, &mut closure) {
                scanned += 1;
            }
            pss.trim_queue_partially();
        }
        trace!("Worker {} updated {} cards", pss.worker_id(), scanned);
        scanned
    }

    /// The scan phase of a pause for the collection set region `hr`: every card of its
    /// remembered set that lies outside the collection set is scanned for references into
    /// the collection set. Returns the number of cards scanned.
    pub fn scan_rem_set(
        &self,
        pss: &mut G1ParScanThreadState<'h, VM>,
        hr: &HeapRegion,
        scan_state: &G1RemSetScanState,
    ) -> usize {
        debug_assert!(hr.in_collection_set(), "{:?} is not in the collection set", hr);
        let heap = self.heap;
        let mut cards = vec![];
        hr.rem_set().iterate_cards(|card| cards.push(card));
        let mut scanned = 0;
        for card in cards {
            let from = heap.region_of(card.start());
            // Collection set regions are scanned as a whole when their objects are copied.
            if from.in_collection_set() {
                continue;
            }
            if !scan_state.claim_card(card) {
                continue;
            }
            let limit = scan_state.scan_top(from.index());
            let mut closure = G1ScanObjsDuringScanRSClosure::new(pss);
            if self.scan_card(card, limit, &mut closure) {
                scanned += 1;
            }
            pss.trim_queue_partially();
        }
        trace!(
            "Worker {} scanned {} remembered set cards of region {}",
            pss.worker_id(),
            scanned,
            hr.index()
        );
        scanned
    }

    /// Add the cross-region references of the live objects of `hr` to remembered sets. An
    /// object is live if it is marked in the next bitmap, or if it was allocated after marking
    /// started. Returns the number of objects scanned.
    pub fn rebuild_rem_set_in_region(&self, hr: &HeapRegion, worker_id: usize) -> usize {
        if hr.is_free() || hr.is_young() || hr.is_continues_humongous() {
            return 0;
        }
        let heap = self.heap;
        let cm = heap.concurrent_mark();
        let tams = hr.next_top_at_mark_start();
        let oops = heap.compressed_oops();
        let mut closure = G1RebuildRemSetClosure::new(heap, worker_id);
        let mut scanned = 0;
        hr.object_iterate::<VM, _>(|object| {
            if object.to_raw_address() >= tams || cm.is_marked_in_next(object) {
                VM::VMScanning::scan_object(object, oops, &mut closure);
                scanned += 1;
            }
        });
        scanned
    }

    /// Select the old regions worth evacuating later and rebuild their remembered sets from
    /// the results of marking, with `num_workers` threads. Returns the number of regions that
    /// started tracking.
    pub fn rebuild_rem_sets(&self, num_workers: usize) -> usize {
        let heap = self.heap;
        let cm = heap.concurrent_mark();
        let threshold = heap.geometry().region_size() * MIXED_GC_LIVE_THRESHOLD_PERCENT / 100;
        let mut selected = 0;
        for hr in heap.regions() {
            if hr.is_old() && !hr.rem_set().is_tracked() && cm.live_bytes(hr.index()) <= threshold
            {
                hr.rem_set().set_state_updating();
                selected += 1;
            }
        }
        debug!("Rebuilding the remembered sets of {} regions", selected);

        let next = AtomicUsize::new(0);
        let scanned = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for worker_id in 0..num_workers {
                let (next, scanned) = (&next, &scanned);
                s.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= heap.regions().len() {
                        break;
                    }
                    let n = self.rebuild_rem_set_in_region(heap.region_at(index), worker_id);
                    scanned.fetch_add(n, Ordering::Relaxed);
                });
            }
        });

        for hr in heap.regions() {
            if hr.rem_set().is_updating() {
                hr.rem_set().set_state_complete();
            }
        }
        debug!(
            "Rebuilt remembered sets from {} live objects",
            scanned.into_inner()
        );
        selected
    }
}
