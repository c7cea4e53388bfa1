//! Collection algorithms.
//!
//! [`g1`] holds the heap, the per-reference closures, and the pause and concurrent drivers that
//! apply them.

pub mod g1;
