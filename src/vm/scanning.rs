use std::ops::Range;

use crate::util::{Address, ObjectReference};
use crate::vm::slot::{CompressedOops, Slot};
use crate::vm::VMBinding;

/// Callback trait of scanning functions that report slots.
///
/// The method is generic over the slot encoding, so a visitor is statically instantiated once
/// for wide slots and once for narrow slots. Drivers hand slots to a visitor one at a time.
pub trait SlotVisitor {
    /// Call this function for each slot.
    fn visit_slot<S: Slot>(&mut self, slot: S);
}

/// Forwards only the slots whose address lies within `range` to the wrapped visitor. Card
/// scanning uses this to restrict an object that straddles a card boundary to the part on
/// the card.
pub struct BoundedSlotVisitor<'a, V: SlotVisitor> {
    range: Range<Address>,
    inner: &'a mut V,
}

impl<'a, V: SlotVisitor> BoundedSlotVisitor<'a, V> {
    pub fn new(range: Range<Address>, inner: &'a mut V) -> Self {
        Self { range, inner }
    }
}

impl<V: SlotVisitor> SlotVisitor for BoundedSlotVisitor<'_, V> {
    #[inline(always)]
    fn visit_slot<S: Slot>(&mut self, slot: S) {
        if self.range.contains(&slot.as_address()) {
            self.inner.visit_slot(slot);
        }
    }
}

/// VM-specific methods for enumerating the reference slots of objects.
pub trait Scanning<VM: VMBinding> {
    /// Report every reference slot of `object` to `visitor`.
    ///
    /// Arguments:
    /// * `object`: The object to be scanned.
    /// * `oops`: The encoding of narrow slots in this heap, if narrow slots are in use.
    /// * `visitor`: Called once for each reference slot, wide or narrow.
    fn scan_object<V: SlotVisitor>(
        object: ObjectReference,
        oops: Option<CompressedOops>,
        visitor: &mut V,
    );

    /// Report the reference slots of `object` whose address lies within `range`.
    fn scan_object_bounded<V: SlotVisitor>(
        object: ObjectReference,
        oops: Option<CompressedOops>,
        range: Range<Address>,
        visitor: &mut V,
    ) {
        let mut bounded = BoundedSlotVisitor::new(range, visitor);
        Self::scan_object(object, oops, &mut bounded);
    }
}
