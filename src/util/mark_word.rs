use atomic::Atomic;
use bytemuck::NoUninit;
use std::fmt;
use std::sync::atomic::Ordering;

use crate::util::{Address, ObjectReference};

/// The header word of an object.
///
/// The low two bits are the lock bits. Depending on them, the rest of the word holds either the
/// identity hash and age of an unlocked object, a pointer to a displaced header or monitor, or
/// (when both lock bits are set) a forwarding pointer to the object's to-space copy.
///
/// ```text
///  64 bits:  [ unused:25 | hash:31 | unused:1 | age:4 | unused:1 | lock:2 ]  unlocked object
///            [ pointer to to-space copy                          | lock:2 ]  forwarded object
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, NoUninit)]
pub struct MarkWord(usize);

impl MarkWord {
    const LOCK_BITS: usize = 2;
    const LOCK_MASK: usize = (1 << Self::LOCK_BITS) - 1;
    const AGE_BITS: usize = 4;
    const AGE_SHIFT: usize = Self::LOCK_BITS + 1;
    const AGE_MASK: usize = (1 << Self::AGE_BITS) - 1;
    const HASH_SHIFT: usize = Self::AGE_SHIFT + Self::AGE_BITS + 1;
    #[cfg(target_pointer_width = "64")]
    const HASH_BITS: usize = 31;
    #[cfg(target_pointer_width = "32")]
    const HASH_BITS: usize = 32 - Self::HASH_SHIFT;
    const HASH_MASK: usize = (1 << Self::HASH_BITS) - 1;

    const LOCKED_VALUE: usize = 0b00;
    const UNLOCKED_VALUE: usize = 0b01;
    const MONITOR_VALUE: usize = 0b10;
    const MARKED_VALUE: usize = 0b11;

    /// The header of a freshly allocated object: unlocked, no hash, age zero.
    pub const fn prototype() -> Self {
        MarkWord(Self::UNLOCKED_VALUE)
    }

    pub const fn from_raw(value: usize) -> Self {
        MarkWord(value)
    }

    pub const fn value(self) -> usize {
        self.0
    }

    /// Both lock bits set: the object is forwarded (or self-forwarded after evacuation failure).
    pub const fn is_marked(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::MARKED_VALUE
    }

    pub const fn is_unlocked(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::UNLOCKED_VALUE
    }

    pub const fn is_locked(self) -> bool {
        self.0 & Self::LOCK_MASK != Self::UNLOCKED_VALUE
    }

    pub const fn has_monitor(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::MONITOR_VALUE
    }

    pub const fn is_stack_locked(self) -> bool {
        self.0 & Self::LOCK_MASK == Self::LOCKED_VALUE
    }

    pub const fn hash(self) -> usize {
        (self.0 >> Self::HASH_SHIFT) & Self::HASH_MASK
    }

    pub const fn has_no_hash(self) -> bool {
        self.hash() == 0
    }

    pub const fn copy_set_hash(self, hash: usize) -> Self {
        let cleared = self.0 & !(Self::HASH_MASK << Self::HASH_SHIFT);
        MarkWord(cleared | ((hash & Self::HASH_MASK) << Self::HASH_SHIFT))
    }

    pub const fn age(self) -> usize {
        (self.0 >> Self::AGE_SHIFT) & Self::AGE_MASK
    }

    /// The same header with the age incremented, saturating at the largest age the header can
    /// hold. Only unlocked headers carry an age.
    pub const fn incr_age(self) -> Self {
        if !self.is_unlocked() || self.age() == Self::AGE_MASK {
            return self;
        }
        MarkWord(self.0 + (1 << Self::AGE_SHIFT))
    }

    /// A header that a full collection or evacuation failure cannot regenerate from the
    /// prototype: a locked object or one with an identity hash.
    pub const fn must_be_preserved(self) -> bool {
        !self.is_unlocked() || !self.has_no_hash()
    }

    /// Encode `object` as a forwarding pointer.
    pub fn encode_pointer_as_mark(object: ObjectReference) -> Self {
        let addr = object.to_raw_address().as_usize();
        debug_assert_eq!(addr & Self::LOCK_MASK, 0, "{} is not aligned", object);
        MarkWord(addr | Self::MARKED_VALUE)
    }

    /// Decode the forwarding pointer of a marked header.
    pub fn decode_pointer(self) -> ObjectReference {
        debug_assert!(self.is_marked(), "{:?} is not a forwarding pointer", self);
        let addr = unsafe { Address::from_usize(self.0 & !Self::LOCK_MASK) };
        unsafe { ObjectReference::from_raw_address_unchecked(addr) }
    }
}

impl fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MarkWord({:#x})", self.0)
    }
}

fn header_of(object: ObjectReference) -> &'static Atomic<MarkWord> {
    unsafe { object.header_address().as_ref::<Atomic<MarkWord>>() }
}

/// Load the header of `object`.
///
/// This is the only read of the header on the evacuation path. The acquire pairs with the
/// release of the forwarding install so that a reader that sees a forwarding pointer also sees
/// the to-space address stored into it.
pub fn mark_raw(object: ObjectReference) -> MarkWord {
    header_of(object).load(Ordering::Acquire)
}

/// Overwrite the header of `object`.
pub fn set_mark_raw(object: ObjectReference, mark: MarkWord) {
    header_of(object).store(mark, Ordering::Release)
}

/// Compare and swap the header of `object`. Returns the header witnessed before the swap, which
/// equals `compare` if and only if the swap happened.
pub fn cas_set_mark_raw(object: ObjectReference, new: MarkWord, compare: MarkWord) -> MarkWord {
    match header_of(object).compare_exchange(compare, new, Ordering::AcqRel, Ordering::Acquire) {
        Ok(old) => old,
        Err(witness) => witness,
    }
}
