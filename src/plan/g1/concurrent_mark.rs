use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use atomic_refcell::AtomicRefCell;
use spin::Mutex;

use super::closures::{G1CMOopClosure, G1RootRegionScanClosure};
use super::G1CollectedHeap;
use crate::policy::region::{HeapGeometry, HeapRegion, MarkBitmap};
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};
use crate::vm::slot::Slot;
use crate::vm::{ObjectModel, Scanning, VMBinding};

const NO_REGION: usize = usize::MAX;

/// A small direct-mapped cache of per-region live byte counts, owned by one marking worker.
///
/// Marking adds the size of every newly marked object to the liveness of its region. Most
/// consecutive marks hit the same few regions, so they are summed here and only written to the
/// shared per-region counters when an entry is evicted.
pub struct G1RegionMarkStatsCache {
    entries: Box<[(usize, usize)]>,
    mask: usize,
    hits: usize,
    misses: usize,
}

impl G1RegionMarkStatsCache {
    pub fn new(num_entries: usize) -> Self {
        debug_assert!(num_entries.is_power_of_two());
        Self {
            entries: vec![(NO_REGION, 0); num_entries].into_boxed_slice(),
            mask: num_entries - 1,
            hits: 0,
            misses: 0,
        }
    }

    /// Add `bytes` to the liveness of `region`. A conflicting entry is written back to `target`.
    #[inline(always)]
    pub fn add_live_bytes(&mut self, region: usize, bytes: usize, target: &[AtomicUsize]) {
        let entry = &mut self.entries[region & self.mask];
        if entry.0 == region {
            self.hits += 1;
        } else {
            self.misses += 1;
            if entry.0 != NO_REGION && entry.1 != 0 {
                target[entry.0].fetch_add(entry.1, Ordering::Relaxed);
            }
            *entry = (region, 0);
        }
        entry.1 += bytes;
    }

    /// Write back every entry.
    pub fn evict_all(&mut self, target: &[AtomicUsize]) {
        for entry in self.entries.iter_mut() {
            if entry.0 != NO_REGION && entry.1 != 0 {
                target[entry.0].fetch_add(entry.1, Ordering::Relaxed);
            }
            *entry = (NO_REGION, 0);
        }
    }

    /// Drop every entry without writing it back.
    pub fn reset(&mut self) {
        self.entries.fill((NO_REGION, 0));
        self.hits = 0;
        self.misses = 0;
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// The concurrent marker: the previous and next mark bitmaps, per-region liveness, and the root
/// regions of the current cycle.
///
/// Objects at or above a region's next top-at-mark-start (TAMS) were allocated after marking
/// started. They are implicitly live and never get a bit in the next bitmap.
pub struct G1ConcurrentMark<VM: VMBinding> {
    geometry: HeapGeometry,
    bitmaps: [MarkBitmap; 2],
    /// Index into `bitmaps` of the next bitmap.
    next: AtomicUsize,
    live_bytes: Box<[AtomicUsize]>,
    mark_stats_caches: Box<[AtomicRefCell<G1RegionMarkStatsCache>]>,
    root_regions: Mutex<Vec<usize>>,
    /// The index of the next region to be claimed by a marking task.
    finger: AtomicUsize,
    _p: PhantomData<VM>,
}

impl<VM: VMBinding> G1ConcurrentMark<VM> {
    pub fn new(geometry: HeapGeometry, options: &Options) -> Self {
        let num_workers = options.threads.max(options.conc_refinement_threads);
        Self {
            geometry,
            bitmaps: [
                MarkBitmap::new(geometry.start(), geometry.end()),
                MarkBitmap::new(geometry.start(), geometry.end()),
            ],
            next: AtomicUsize::new(0),
            live_bytes: (0..geometry.num_regions())
                .map(|_| AtomicUsize::new(0))
                .collect(),
            mark_stats_caches: (0..num_workers)
                .map(|_| {
                    AtomicRefCell::new(G1RegionMarkStatsCache::new(
                        options.region_mark_stats_cache_size,
                    ))
                })
                .collect(),
            root_regions: Mutex::new(vec![]),
            finger: AtomicUsize::new(0),
            _p: PhantomData,
        }
    }

    pub fn next_mark_bitmap(&self) -> &MarkBitmap {
        &self.bitmaps[self.next.load(Ordering::Acquire)]
    }

    pub fn prev_mark_bitmap(&self) -> &MarkBitmap {
        &self.bitmaps[1 - self.next.load(Ordering::Acquire)]
    }

    /// The next bitmap becomes the previous one, and the old previous bitmap is reused for the
    /// next cycle.
    pub fn swap_mark_bitmaps(&self) {
        self.next.fetch_xor(1, Ordering::AcqRel);
    }

    pub fn is_marked_in_next(&self, object: ObjectReference) -> bool {
        self.next_mark_bitmap().is_marked(object)
    }

    pub fn is_marked_in_prev(&self, object: ObjectReference) -> bool {
        self.prev_mark_bitmap().is_marked(object)
    }

    pub fn clear_range_in_next_bitmap(&self, start: Address, end: Address) {
        self.next_mark_bitmap().clear_range(start, end);
    }

    /// Mark `object`, which lives in `hr`, in the next bitmap. Returns true if this call set the
    /// bit. Objects allocated since marking started are not marked.
    #[inline(always)]
    pub fn mark_in_next_bitmap(
        &self,
        worker_id: usize,
        hr: &HeapRegion,
        object: ObjectReference,
    ) -> bool {
        if !self.try_mark(hr, object) {
            return false;
        }
        let size = VM::VMObjectModel::get_current_size(object);
        self.add_to_liveness(worker_id, hr.index(), size);
        true
    }

    /// Like [`mark_in_next_bitmap`](Self::mark_in_next_bitmap), with the size given by the
    /// caller. Used when `object` may still be written by another thread.
    #[inline(always)]
    pub fn mark_in_next_bitmap_with_size(
        &self,
        worker_id: usize,
        hr: &HeapRegion,
        object: ObjectReference,
        size: usize,
    ) -> bool {
        if !self.try_mark(hr, object) {
            return false;
        }
        self.add_to_liveness(worker_id, hr.index(), size);
        true
    }

    #[inline(always)]
    fn try_mark(&self, hr: &HeapRegion, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        debug_assert!(hr.is_in_reserved(addr), "{} is not in {:?}", object, hr);
        debug_assert!(
            !hr.is_continues_humongous(),
            "{} is marked through a humongous continuation",
            object
        );
        if addr >= hr.next_top_at_mark_start() {
            return false;
        }
        self.next_mark_bitmap().par_mark(addr)
    }

    fn add_to_liveness(&self, worker_id: usize, region: usize, size: usize) {
        if let Some(cache) = self.mark_stats_caches.get(worker_id) {
            if let Ok(mut cache) = cache.try_borrow_mut() {
                cache.add_live_bytes(region, size, &self.live_bytes);
                return;
            }
        }
        self.live_bytes[region].fetch_add(size, Ordering::Relaxed);
    }

    /// Write every worker's cached liveness back to the per-region totals. Must not run
    /// concurrently with marking.
    pub fn flush_mark_stats_caches(&self) {
        let mut hits = 0;
        let mut misses = 0;
        for cache in self.mark_stats_caches.iter() {
            let mut cache = cache.borrow_mut();
            hits += cache.hits();
            misses += cache.misses();
            cache.evict_all(&self.live_bytes);
        }
        debug!("Mark stats cache: {} hits, {} misses", hits, misses);
    }

    /// The number of bytes marked live in region `index`, as of the last flush.
    pub fn live_bytes(&self, index: usize) -> usize {
        self.live_bytes[index].load(Ordering::Relaxed)
    }

    /// Start a marking cycle at the beginning of an initial mark pause. Every allocated region
    /// gets TAMS = top; the next bitmap and liveness start out empty.
    pub fn pre_initial_mark(&self, heap: &G1CollectedHeap<VM>) {
        self.next_mark_bitmap().clear_all();
        for hr in heap.regions() {
            hr.set_next_top_at_mark_start(if hr.is_free() { hr.bottom() } else { hr.top() });
        }
        for live in self.live_bytes.iter() {
            live.store(0, Ordering::Relaxed);
        }
        for cache in self.mark_stats_caches.iter() {
            cache.borrow_mut().reset();
        }
        self.root_regions.lock().clear();
        self.finger.store(0, Ordering::Release);
        debug!("Marking starts on {} regions", self.geometry.num_regions());
    }

    /// Record a survivor region of the initial mark pause. Its objects are below no TAMS, so
    /// their referents must be marked before concurrent marking starts.
    pub fn add_root_region(&self, hr: &HeapRegion) {
        debug_assert!(hr.is_survivor(), "{:?} is not a survivor region", hr);
        self.root_regions.lock().push(hr.index());
    }

    pub fn root_regions(&self) -> Vec<usize> {
        self.root_regions.lock().clone()
    }

    /// Mark the referents of every object in `hr`.
    pub fn scan_root_region(&self, heap: &G1CollectedHeap<VM>, hr: &HeapRegion, worker_id: usize) {
        trace!("Worker {} scans root region {:?}", worker_id, hr);
        let oops = heap.compressed_oops();
        let mut closure = G1RootRegionScanClosure::new(heap, worker_id);
        hr.object_iterate::<VM, _>(|object| {
            VM::VMScanning::scan_object(object, oops, &mut closure);
        });
    }

    /// Scan all root regions with `num_workers` threads, then forget them.
    pub fn scan_root_regions(&self, heap: &G1CollectedHeap<VM>, num_workers: usize) {
        let regions = self.root_regions();
        let next = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for worker_id in 0..num_workers {
                let (regions, next) = (&regions, &next);
                s.spawn(move || loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(&index) = regions.get(i) else {
                        break;
                    };
                    self.scan_root_region(heap, heap.region_at(index), worker_id);
                });
            }
        });
        self.root_regions.lock().clear();
        debug!("Scanned {} root regions", regions.len());
    }

    /// The bottom of the first region no marking task has claimed yet.
    pub fn global_finger(&self) -> Address {
        let index = self.finger.load(Ordering::Acquire);
        if index >= self.geometry.num_regions() {
            self.geometry.end()
        } else {
            self.geometry.region_bottom(index)
        }
    }

    fn claim_region<'h>(&self, heap: &'h G1CollectedHeap<VM>) -> Option<&'h HeapRegion> {
        loop {
            let index = self.finger.fetch_add(1, Ordering::AcqRel);
            if index >= self.geometry.num_regions() {
                return None;
            }
            let hr = heap.region_at(index);
            if !hr.is_free() && !hr.is_continues_humongous() {
                return Some(hr);
            }
        }
    }

    /// Trace the heap from the objects already marked in the next bitmap, with `num_workers`
    /// tasks. Returns the number of references the tasks visited.
    pub fn mark_from_roots(&self, heap: &G1CollectedHeap<VM>, num_workers: usize) -> usize {
        self.finger.store(0, Ordering::Release);
        let refs_reached = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for worker_id in 0..num_workers {
                let refs_reached = &refs_reached;
                s.spawn(move || {
                    let mut task = G1CMTask::new(heap, worker_id);
                    task.do_marking_step();
                    refs_reached.fetch_add(task.refs_reached(), Ordering::Relaxed);
                });
            }
        });
        self.flush_mark_stats_caches();
        let refs_reached = refs_reached.into_inner();
        debug!("Marking visited {} references", refs_reached);
        refs_reached
    }
}

/// One marking worker.
///
/// The task walks the marked objects of the regions it claims in address order. An object it
/// greys is pushed on its own stack only if the walk has already passed it: otherwise the walk
/// of its region will find it in the bitmap.
pub struct G1CMTask<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    worker_id: usize,
    mark_stack: Vec<ObjectReference>,
    /// The walk position in the current region.
    finger: Option<Address>,
    region_limit: Address,
    refs_reached: usize,
}

impl<'h, VM: VMBinding> G1CMTask<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>, worker_id: usize) -> Self {
        Self {
            heap,
            worker_id,
            mark_stack: vec![],
            finger: None,
            region_limit: Address::ZERO,
            refs_reached: 0,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn refs_reached(&self) -> usize {
        self.refs_reached
    }

    pub fn mark_stack_len(&self) -> usize {
        self.mark_stack.len()
    }

    /// Mark the referent of `slot`, and push it if it still has to be scanned.
    #[inline(always)]
    pub fn deal_with_reference<S: Slot>(&mut self, slot: S) {
        self.refs_reached += 1;
        let Some(object) = slot.load_volatile() else {
            return;
        };
        self.make_reference_grey(object);
    }

    fn make_reference_grey(&mut self, object: ObjectReference) {
        let heap = self.heap;
        if !heap.is_in_reserved(object.to_raw_address()) {
            return;
        }
        let hr = heap.region_of_object(object);
        if !heap
            .concurrent_mark()
            .mark_in_next_bitmap(self.worker_id, hr, object)
        {
            return;
        }
        if self.is_below_finger(object, heap.concurrent_mark().global_finger()) {
            self.mark_stack.push(object);
        }
    }

    fn is_below_finger(&self, object: ObjectReference, global_finger: Address) -> bool {
        let addr = object.to_raw_address();
        if let Some(finger) = self.finger {
            if addr < finger {
                return true;
            } else if addr < self.region_limit {
                return false;
            }
        }
        addr < global_finger
    }

    pub fn scan_object(&mut self, object: ObjectReference) {
        let oops = self.heap.compressed_oops();
        let mut closure = G1CMOopClosure::new(self);
        VM::VMScanning::scan_object(object, oops, &mut closure);
    }

    pub fn drain_local_queue(&mut self) {
        while let Some(object) = self.mark_stack.pop() {
            self.scan_object(object);
        }
    }

    /// Claim regions until none is left, scanning the marked objects below TAMS of each.
    pub fn do_marking_step(&mut self) {
        let heap = self.heap;
        let cm = heap.concurrent_mark();
        while let Some(hr) = cm.claim_region(heap) {
            let limit = hr.next_top_at_mark_start();
            self.region_limit = limit;
            hr.object_iterate::<VM, _>(|object| {
                let addr = object.to_raw_address();
                if addr >= limit {
                    return;
                }
                self.finger = Some(addr);
                if cm.is_marked_in_next(object) {
                    self.scan_object(object);
                    self.drain_local_queue();
                }
            });
            self.finger = None;
        }
        debug_assert!(self.mark_stack.is_empty());
    }
}
