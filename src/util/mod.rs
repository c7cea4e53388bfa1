//! Utilities shared by the heap, the closures and their drivers.

/// Address and object reference types.
pub mod address;
/// Constants about sizes of data types and heap geometry.
pub mod constants;
/// Alignment and unit conversion helpers.
pub mod conversions;
/// Logger initialization.
pub mod logger;
/// The object header word and its forwarding encoding.
pub mod mark_word;
/// Raw memory reservation for the heap.
pub mod memory;
/// Forwarding pointers in object headers.
pub mod object_forwarding;
/// Collector options.
#[macro_use]
pub mod options;
/// Hardware prefetch hints.
pub mod prefetch;
/// Saving and restoring object headers clobbered by self-forwarding.
pub mod preserved_marks;

#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
pub use self::mark_word::MarkWord;
