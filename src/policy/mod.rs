//! Heap organization policies.

/// Fixed-size heap regions with their remembered sets, card table and mark bitmaps.
pub mod region;
