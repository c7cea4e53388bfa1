//! This module provides the trait [`Slot`] and the two slot encodings the collector understands:
//! [`WideSlot`], a word that holds the raw address of an object, and [`NarrowSlot`], a 32-bit
//! compressed offset from the heap base. Both may appear in the same heap, even in the same
//! object.
//!
//! # Plain and volatile loads
//!
//! Closures that run inside a pause, while mutators are stopped, use [`Slot::load`]. Closures
//! that run concurrently with mutators (refinement, root region scanning, marking, remembered set
//! rebuilding) use [`Slot::load_volatile`], because a mutator may store to the same slot at any
//! time. The value returned by a volatile load may be stale as soon as it is returned.
//!
//! # Null
//!
//! Both encodings use the all-zero value as null. [`Slot::is_null`] checks the encoded value
//! without decoding it, so a null slot never touches the heap.

use std::fmt::Debug;
use std::hash::Hash;

use atomic::{Atomic, Ordering};

use crate::util::constants::{BYTES_IN_PAGE, LOG_MIN_OBJECT_ALIGNMENT};
use crate::util::{Address, ObjectReference};

/// `Slot` is an abstraction for the collector to load and update object references in memory.
///
/// A `Slot` value *points to* a slot, and is not the slot itself. Copies of a `Slot` point to
/// the same slot.
///
/// The methods of this trait are called on the hottest paths of the collector. Every closure is
/// instantiated once per implementation, so there is no dispatch on the encoding inside a closure.
pub trait Slot: Copy + Send + Debug + PartialEq + Eq + Hash + Into<AnySlot> {
    /// The raw in-memory representation of a reference in this kind of slot.
    type Encoded: Copy + Debug + PartialEq;

    /// The address of the slot itself.
    fn as_address(&self) -> Address;

    /// Load the raw value of the slot.
    fn load_encoded(&self) -> Self::Encoded;

    /// Load the raw value of the slot, tolerating concurrent stores by mutators.
    fn load_encoded_volatile(&self) -> Self::Encoded;

    /// Does `encoded` represent null?
    fn is_null(encoded: Self::Encoded) -> bool;

    /// Decode a non-null raw value into an object reference.
    fn decode_not_null(&self, encoded: Self::Encoded) -> ObjectReference;

    /// Store the object reference `object` into the slot.
    fn store(&self, object: ObjectReference);

    /// Load the object reference in the slot, or `None` if the slot holds null.
    #[inline(always)]
    fn load(&self) -> Option<ObjectReference> {
        let encoded = self.load_encoded();
        if Self::is_null(encoded) {
            None
        } else {
            Some(self.decode_not_null(encoded))
        }
    }

    /// Like [`Slot::load`], but may run concurrently with mutator stores to the slot.
    #[inline(always)]
    fn load_volatile(&self) -> Option<ObjectReference> {
        let encoded = self.load_encoded_volatile();
        if Self::is_null(encoded) {
            None
        } else {
            Some(self.decode_not_null(encoded))
        }
    }
}

/// A word-sized slot which holds the raw address of an `ObjectReference`, or 0 if it is holding
/// a null reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct WideSlot {
    slot_addr: *mut Atomic<Address>,
}

unsafe impl Send for WideSlot {}

impl WideSlot {
    /// Create a wide slot from the address of a word that holds an object reference.
    pub fn from_address(address: Address) -> Self {
        debug_assert!(
            address.is_aligned_to(std::mem::size_of::<Address>()),
            "unaligned wide slot {}",
            address
        );
        Self {
            slot_addr: address.to_mut_ptr(),
        }
    }
}

impl Slot for WideSlot {
    type Encoded = Address;

    #[inline(always)]
    fn as_address(&self) -> Address {
        Address::from_mut_ptr(self.slot_addr)
    }

    #[inline(always)]
    fn load_encoded(&self) -> Address {
        unsafe { (*self.slot_addr).load(Ordering::Relaxed) }
    }

    #[inline(always)]
    fn load_encoded_volatile(&self) -> Address {
        unsafe { (*self.slot_addr).load(Ordering::Acquire) }
    }

    #[inline(always)]
    fn is_null(encoded: Address) -> bool {
        encoded.is_zero()
    }

    #[inline(always)]
    fn decode_not_null(&self, encoded: Address) -> ObjectReference {
        debug_assert!(!encoded.is_zero());
        unsafe { ObjectReference::from_raw_address_unchecked(encoded) }
    }

    #[inline(always)]
    fn store(&self, object: ObjectReference) {
        unsafe { (*self.slot_addr).store(object.to_raw_address(), Ordering::Release) }
    }
}

/// The compressed reference encoding of a heap: a reference is stored as the 32-bit value
/// `(object - base) >> shift`, and 0 is null.
///
/// The base lies one page below the heap start, so no object in the heap encodes to 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompressedOops {
    base: Address,
    shift: u8,
}

impl CompressedOops {
    /// The encoding for a heap that starts at `heap_start`.
    pub fn for_heap(heap_start: Address) -> Self {
        Self {
            base: heap_start - BYTES_IN_PAGE,
            shift: LOG_MIN_OBJECT_ALIGNMENT,
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// The highest address an object can have and still be encodable.
    pub fn max_address(&self) -> Address {
        self.base + ((u32::MAX as usize) << self.shift)
    }

    #[inline(always)]
    pub fn encode(&self, object: ObjectReference) -> u32 {
        let addr = object.to_raw_address();
        debug_assert!(
            addr > self.base && addr <= self.max_address(),
            "{} cannot be encoded with base {}",
            object,
            self.base
        );
        debug_assert!(addr.is_aligned_to(1 << self.shift));
        ((addr - self.base) >> self.shift as usize) as u32
    }

    #[inline(always)]
    pub fn decode_not_null(&self, narrow: u32) -> ObjectReference {
        debug_assert_ne!(narrow, 0);
        let addr = self.base + ((narrow as usize) << self.shift);
        unsafe { ObjectReference::from_raw_address_unchecked(addr) }
    }

    /// A narrow slot at `address` using this encoding.
    pub fn slot(&self, address: Address) -> NarrowSlot {
        NarrowSlot::new(address, *self)
    }
}

/// A 32-bit slot holding a compressed reference. The slot carries the encoding it is decoded
/// with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NarrowSlot {
    slot_addr: *mut Atomic<u32>,
    oops: CompressedOops,
}

unsafe impl Send for NarrowSlot {}

impl NarrowSlot {
    pub fn new(address: Address, oops: CompressedOops) -> Self {
        debug_assert!(
            address.is_aligned_to(std::mem::size_of::<u32>()),
            "unaligned narrow slot {}",
            address
        );
        Self {
            slot_addr: address.to_mut_ptr(),
            oops,
        }
    }
}

impl Slot for NarrowSlot {
    type Encoded = u32;

    #[inline(always)]
    fn as_address(&self) -> Address {
        Address::from_mut_ptr(self.slot_addr)
    }

    #[inline(always)]
    fn load_encoded(&self) -> u32 {
        unsafe { (*self.slot_addr).load(Ordering::Relaxed) }
    }

    #[inline(always)]
    fn load_encoded_volatile(&self) -> u32 {
        unsafe { (*self.slot_addr).load(Ordering::Acquire) }
    }

    #[inline(always)]
    fn is_null(encoded: u32) -> bool {
        encoded == 0
    }

    #[inline(always)]
    fn decode_not_null(&self, encoded: u32) -> ObjectReference {
        self.oops.decode_not_null(encoded)
    }

    #[inline(always)]
    fn store(&self, object: ObjectReference) {
        let narrow = self.oops.encode(object);
        unsafe { (*self.slot_addr).store(narrow, Ordering::Release) }
    }
}

/// Either kind of slot. This is what the per-worker scan queue holds, so that slots of both
/// encodings can share one queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnySlot {
    Wide(WideSlot),
    Narrow(NarrowSlot),
}

unsafe impl Send for AnySlot {}
// Root arrays are shared by the workers of a pause. A slot is only an address.
unsafe impl Sync for AnySlot {}

impl AnySlot {
    pub fn as_address(&self) -> Address {
        match self {
            AnySlot::Wide(s) => s.as_address(),
            AnySlot::Narrow(s) => s.as_address(),
        }
    }

    pub fn load(&self) -> Option<ObjectReference> {
        match self {
            AnySlot::Wide(s) => s.load(),
            AnySlot::Narrow(s) => s.load(),
        }
    }

    pub fn store(&self, object: ObjectReference) {
        match self {
            AnySlot::Wide(s) => s.store(object),
            AnySlot::Narrow(s) => s.store(object),
        }
    }

    /// Hand the slot to `visitor` with its concrete encoding.
    #[inline(always)]
    pub fn accept<V: crate::vm::SlotVisitor>(self, visitor: &mut V) {
        match self {
            AnySlot::Wide(s) => visitor.visit_slot(s),
            AnySlot::Narrow(s) => visitor.visit_slot(s),
        }
    }
}

impl From<WideSlot> for AnySlot {
    fn from(slot: WideSlot) -> Self {
        AnySlot::Wide(slot)
    }
}

impl From<NarrowSlot> for AnySlot {
    fn from(slot: NarrowSlot) -> Self {
        AnySlot::Narrow(slot)
    }
}

static_assertions::assert_eq_size!(WideSlot, usize);
static_assertions::const_assert!(std::mem::size_of::<AnySlot>() <= 4 * std::mem::size_of::<usize>());
