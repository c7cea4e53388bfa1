//! Per-reference closures for a region-based, generational, mostly-concurrent garbage collector.
//!
//! The heap is divided into fixed-size regions. Each collection selects a collection set (CSet)
//! of regions whose live objects are evacuated, while per-region remembered sets (RSets) record
//! incoming cross-region references so that evacuation does not need to scan the whole heap. A
//! concurrent marker maintains a pair of mark bitmaps used to choose the next collection set.
//!
//! The core of this crate is [`plan::g1::closures`]: a family of small visitors, each invoked once
//! for every reference slot found by a traversal (root scanning, object scanning, card scanning,
//! remembered set scanning, mark stack draining). Each visitor encodes one policy for the slot:
//! copy and forward, enqueue for later, add to a remembered set, mark in a bitmap, or ignore.
//!
//! The remaining modules provide the collaborators the closures consume: the region heap
//! ([`plan::g1::G1CollectedHeap`]), the remembered sets and card table ([`policy::region`]), the
//! mark bitmaps and marker ([`plan::g1::G1ConcurrentMark`]), the per-worker scan state
//! ([`plan::g1::G1ParScanThreadState`]), and the drivers that construct closures and feed them
//! slots ([`plan::g1::G1RemSet`], [`plan::g1::G1EvacuationPause`]).
//!
//! A VM plugs in through [`vm::VMBinding`], which tells the collector how large objects are and
//! how to enumerate their reference slots. Slots can be wide (a full-word pointer) or narrow (a
//! 32-bit compressed offset from the heap base); both encodings coexist in one heap.

#[cfg(any(test, feature = "test_private"))]
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate probe;

#[macro_use]
pub mod util;
pub mod plan;
pub mod policy;
pub mod vm;

pub use crate::plan::g1::G1CollectedHeap;
pub use crate::util::options::Options;
