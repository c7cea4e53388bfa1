use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// The collector's view of an object's shape.
///
/// An object reference points at the first word of the object, which is the header word
/// ([`crate::util::MarkWord`]). Objects are contiguous, aligned to
/// [`crate::util::constants::MIN_OBJECT_ALIGNMENT`], and laid out back to back from the bottom
/// of a region, so a region can be walked by repeatedly adding [`ObjectModel::get_current_size`].
pub trait ObjectModel<VM: VMBinding> {
    /// The size of `object` in bytes, including its header.
    ///
    /// During an evacuation pause this must only be called on from-space objects, or on to-space
    /// copies made by the calling thread. Another worker's to-space copy may be half written.
    fn get_current_size(object: ObjectReference) -> usize;

    /// Overwrite `[start, start + size)` with an object that has no reference slots, so the
    /// range stays walkable after the object that occupied it died. `size` is at least the size
    /// of some object that was allocated there.
    fn fill_with_dummy_object(start: Address, size: usize);

    /// The object that starts at `start`. The default layout has no offset between the start of
    /// an object and its reference.
    fn get_object_from_start_address(start: Address) -> ObjectReference {
        debug_assert!(!start.is_zero());
        unsafe { ObjectReference::from_raw_address_unchecked(start) }
    }

    /// The first address past the end of `object`.
    fn get_object_end_address(object: ObjectReference) -> Address {
        object.to_raw_address() + Self::get_current_size(object)
    }
}
