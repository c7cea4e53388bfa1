//! A region-based, generational, mostly-concurrent collector.
//!
//! * [`closures`]: the per-reference closures.
//! * [`G1CollectedHeap`]: regions, card table, block offset table and collection set.
//! * [`G1ParScanThreadState`]: the per-worker state of an evacuation pause.
//! * [`G1ConcurrentMark`] and [`G1CMTask`]: the mark bitmaps and the marker.
//! * [`G1RemSet`]: card refinement, remembered set scanning and rebuilding.
//! * [`DirtyCardQueueSet`] and [`G1ConcurrentRefine`]: the post-barrier queues and the threads
//!   that drain them.
//! * [`G1EvacuationPause`]: the parallel, stop-the-world copying collection.

pub mod closures;
mod concurrent_mark;
mod concurrent_refine;
mod evacuation;
mod heap;
mod par_scan_state;
mod rem_set;
mod verify;

pub use self::concurrent_mark::{G1CMTask, G1ConcurrentMark, G1RegionMarkStatsCache};
pub use self::concurrent_refine::{DirtyCardQueue, DirtyCardQueueSet, G1ConcurrentRefine};
pub use self::evacuation::{EvacuationInfo, G1EvacuationPause, G1Roots, TaskTerminator};
pub use self::heap::G1CollectedHeap;
pub use self::par_scan_state::{G1Dest, G1ParScanThreadState};
pub use self::rem_set::{G1RemSet, G1RemSetScanState};
pub use self::verify::verify_remembered_sets;
