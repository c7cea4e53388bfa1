//! Forwarding pointers installed in the header word during evacuation.
//!
//! During an evacuation pause the header of a collection set object is written exactly once:
//! by the worker that wins the compare-and-swap installing the forwarding pointer. The pointer
//! either points to the to-space copy, or to the object itself when evacuation failed.

use crate::util::mark_word::{self, MarkWord};
use crate::util::ObjectReference;

/// Is `object` forwarded (possibly to itself)?
pub fn is_forwarded(object: ObjectReference) -> bool {
    mark_word::mark_raw(object).is_marked()
}

/// Read the forwarding pointer of a forwarded object.
pub fn forwardee(object: ObjectReference) -> ObjectReference {
    let mark = mark_word::mark_raw(object);
    debug_assert!(
        mark.is_marked(),
        "forwardee() called for object {} that is not forwarded: {:?}",
        object,
        mark
    );
    mark.decode_pointer()
}

/// Is `object` forwarded to itself, i.e. did its evacuation fail?
pub fn is_self_forwarded(object: ObjectReference) -> bool {
    let mark = mark_word::mark_raw(object);
    mark.is_marked() && mark.decode_pointer() == object
}

/// Attempt to install a forwarding pointer to `new_object` in the header of `object`, expecting
/// the header to still be `compare`.
///
/// Returns `None` if this call installed the pointer. Otherwise another worker won the race, and
/// the forwardee it installed is returned.
pub fn forward_to_atomic(
    object: ObjectReference,
    new_object: ObjectReference,
    compare: MarkWord,
) -> Option<ObjectReference> {
    let forwarding = MarkWord::encode_pointer_as_mark(new_object);
    let witness = mark_word::cas_set_mark_raw(object, forwarding, compare);
    if witness == compare {
        None
    } else {
        debug_assert!(
            witness.is_marked(),
            "The header of {} changed to {:?} but is not a forwarding pointer",
            object,
            witness
        );
        Some(witness.decode_pointer())
    }
}

/// Forward `object` to `new_object` without synchronization. Only used when a single thread owns
/// the object, such as in tests and serial phases.
pub fn forward_to(object: ObjectReference, new_object: ObjectReference) {
    mark_word::set_mark_raw(object, MarkWord::encode_pointer_as_mark(new_object));
}
