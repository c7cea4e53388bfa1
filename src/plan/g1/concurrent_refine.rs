use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use super::{G1CollectedHeap, G1RemSet};
use crate::policy::region::Card;
use crate::vm::VMBinding;

/// Refinement threads are woken once more than this many completed buffers are waiting.
const PROCESS_COMPLETED_THRESHOLD: usize = 5;

struct QueueSetState {
    completed: Vec<Vec<Card>>,
    shutdown: bool,
}

/// The shared set of completed dirty card buffers.
///
/// Mutators fill a private [`DirtyCardQueue`] from the post-write barrier and hand it over here
/// when it is full. Evacuation pauses hand over the cards they deferred. Refinement threads
/// sleep until enough buffers have accumulated, and the next pause takes whatever is left.
pub struct DirtyCardQueueSet {
    buffer_size: usize,
    state: Mutex<QueueSetState>,
    cond: Condvar,
    num_cards: AtomicUsize,
}

impl DirtyCardQueueSet {
    pub fn new(buffer_size: usize) -> Self {
        debug_assert!(buffer_size > 0);
        Self {
            buffer_size,
            state: Mutex::new(QueueSetState {
                completed: vec![],
                shutdown: false,
            }),
            cond: Condvar::new(),
            num_cards: AtomicUsize::new(0),
        }
    }

    /// The number of cards a thread-local queue holds before it is handed over.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn enqueue_completed_buffer(&self, buffer: Vec<Card>) {
        if buffer.is_empty() {
            return;
        }
        self.num_cards.fetch_add(buffer.len(), Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.completed.push(buffer);
        if state.completed.len() > PROCESS_COMPLETED_THRESHOLD {
            self.cond.notify_all();
        }
    }

    /// Take one completed buffer, if any.
    pub fn take_completed_buffer(&self) -> Option<Vec<Card>> {
        let buffer = self.state.lock().unwrap().completed.pop()?;
        self.num_cards.fetch_sub(buffer.len(), Ordering::Relaxed);
        Some(buffer)
    }

    /// Block until more than the threshold number of buffers are waiting. Returns false once
    /// the set has been shut down.
    pub fn wait_for_completed_buffers(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return false;
            }
            if state.completed.len() > PROCESS_COMPLETED_THRESHOLD {
                return true;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Take every completed buffer.
    pub fn take_all(&self) -> Vec<Vec<Card>> {
        let buffers = std::mem::take(&mut self.state.lock().unwrap().completed);
        self.num_cards.store(0, Ordering::Relaxed);
        buffers
    }

    pub fn num_completed_buffers(&self) -> usize {
        self.state.lock().unwrap().completed.len()
    }

    /// The number of cards in completed buffers.
    pub fn num_cards(&self) -> usize {
        self.num_cards.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.num_completed_buffers() == 0
    }

    /// Wake every waiting refinement thread and make them return.
    pub fn shutdown(&self) {
        self.state.lock().unwrap().shutdown = true;
        self.cond.notify_all();
    }

    /// Accept waiting refinement threads again after a shutdown.
    pub fn restart(&self) {
        self.state.lock().unwrap().shutdown = false;
    }
}

/// A thread-local buffer of dirty cards, filled by the post-write barrier.
#[derive(Debug, Default)]
pub struct DirtyCardQueue {
    buffer: Vec<Card>,
}

impl DirtyCardQueue {
    pub fn new() -> Self {
        Self { buffer: vec![] }
    }

    pub fn enqueue(&mut self, qset: &DirtyCardQueueSet, card: Card) {
        if self.buffer.is_empty() {
            self.buffer.reserve(qset.buffer_size());
        }
        self.buffer.push(card);
        if self.buffer.len() >= qset.buffer_size() {
            qset.enqueue_completed_buffer(std::mem::take(&mut self.buffer));
        }
    }

    /// Hand over a partially filled buffer, e.g. when the owning thread stops for a pause.
    pub fn flush(&mut self, qset: &DirtyCardQueueSet) {
        if !self.buffer.is_empty() {
            qset.enqueue_completed_buffer(std::mem::take(&mut self.buffer));
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// The concurrent refinement threads: they turn dirty cards into remembered set entries while
/// mutators run.
pub struct G1ConcurrentRefine<'h, VM: VMBinding> {
    heap: &'h G1CollectedHeap<VM>,
    rem_set: G1RemSet<'h, VM>,
    abort: AtomicBool,
}

impl<'h, VM: VMBinding> G1ConcurrentRefine<'h, VM> {
    pub fn new(heap: &'h G1CollectedHeap<VM>) -> Self {
        Self {
            heap,
            rem_set: G1RemSet::new(heap),
            abort: AtomicBool::new(false),
        }
    }

    /// Make refinement threads stop after their current card. Unprocessed cards go back to the
    /// queue set.
    pub fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.abort.store(false, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Refine the cards of `buffer`. Returns false if refinement was aborted, in which case the
    /// remaining cards have been handed back to the queue set.
    pub fn refine_buffer(&self, buffer: Vec<Card>, worker_id: usize) -> bool {
        probe!(g1closures, refine_buffer, worker_id, buffer.len());
        for (i, card) in buffer.iter().enumerate() {
            if self.is_aborted() {
                self.heap
                    .dirty_card_queue_set()
                    .enqueue_completed_buffer(buffer[i..].to_vec());
                return false;
            }
            self.rem_set.refine_card_concurrently(*card, worker_id);
        }
        true
    }

    /// Refine completed buffers until none is left or refinement is aborted. Returns the number
    /// of buffers fully refined.
    pub fn refine_until_empty(&self, worker_id: usize) -> usize {
        let qset = self.heap.dirty_card_queue_set();
        let mut buffers = 0;
        while !self.is_aborted() {
            let Some(buffer) = qset.take_completed_buffer() else {
                break;
            };
            if !self.refine_buffer(buffer, worker_id) {
                break;
            }
            buffers += 1;
        }
        buffers
    }

    /// Run `num_threads` refinement threads until the queue set is shut down. Each thread sleeps
    /// until enough buffers are waiting, then drains the queue set.
    pub fn run(&self, num_threads: usize) {
        let qset = self.heap.dirty_card_queue_set();
        std::thread::scope(|s| {
            for worker_id in 0..num_threads {
                s.spawn(move || {
                    debug!("Refinement thread {} started", worker_id);
                    while qset.wait_for_completed_buffers() {
                        let buffers = self.refine_until_empty(worker_id);
                        trace!("Refinement thread {} refined {} buffers", worker_id, buffers);
                    }
                    debug!("Refinement thread {} stopped", worker_id);
                });
            }
        });
    }

    /// Refine every completed buffer with `num_threads` threads and wait for them. Returns the
    /// number of buffers refined.
    pub fn refine_all(&self, num_threads: usize) -> usize {
        let total = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for worker_id in 0..num_threads {
                let total = &total;
                s.spawn(move || {
                    total.fetch_add(self.refine_until_empty(worker_id), Ordering::Relaxed);
                });
            }
        });
        total.into_inner()
    }
}
