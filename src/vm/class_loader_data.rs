use std::sync::atomic::{AtomicBool, Ordering};

use crate::vm::slot::AnySlot;
use crate::vm::SlotVisitor;

/// The holder of the roots that belong to one class loader.
///
/// Class loader roots are only scanned in pauses when the class loader data says some of its
/// slots may point into the young generation. The evacuation pause records that by setting
/// `has_modified_oops` whenever a slot of this holder is updated to point to a young object.
#[derive(Debug, Default)]
pub struct ClassLoaderData {
    roots: Vec<AnySlot>,
    has_modified_oops: AtomicBool,
}

impl ClassLoaderData {
    pub fn new(roots: Vec<AnySlot>) -> Self {
        Self {
            roots,
            has_modified_oops: AtomicBool::new(false),
        }
    }

    pub fn roots(&self) -> &[AnySlot] {
        &self.roots
    }

    pub fn record_modified_oops(&self) {
        self.has_modified_oops.store(true, Ordering::Relaxed);
    }

    pub fn has_modified_oops(&self) -> bool {
        self.has_modified_oops.load(Ordering::Relaxed)
    }

    pub fn clear_modified_oops(&self) {
        self.has_modified_oops.store(false, Ordering::Relaxed);
    }

    /// Apply `visitor` to every root slot.
    pub fn oops_do<V: SlotVisitor>(&self, visitor: &mut V) {
        for slot in self.roots.iter() {
            slot.accept(visitor);
        }
    }
}
