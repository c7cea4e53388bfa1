use crate::util::mark_word::{mark_raw, set_mark_raw};
use crate::util::object_forwarding;
use crate::util::{MarkWord, ObjectReference};

/// A stack of object headers that were overwritten by a forwarding pointer and cannot be
/// rebuilt from the prototype header.
///
/// Evacuation failure self-forwards objects in place, which clobbers locked headers and headers
/// carrying an identity hash. Each worker keeps its own stack and the pause restores all of them
/// once the objects are unforwarded.
#[derive(Default, Debug)]
pub struct PreservedMarks {
    stack: Vec<(ObjectReference, MarkWord)>,
}

impl PreservedMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: ObjectReference, mark: MarkWord) {
        self.stack.push((object, mark));
    }

    /// Push `mark` only if it could not be recreated from the prototype.
    pub fn push_if_necessary(&mut self, object: ObjectReference, mark: MarkWord) {
        if mark.must_be_preserved() {
            self.push(object, mark);
        }
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Retarget every entry whose object has been moved to the object's new location, so that a
    /// later [`restore`](Self::restore) writes the header at the copy.
    pub fn adjust_during_full_gc(&mut self) {
        for (object, _) in self.stack.iter_mut() {
            if object_forwarding::is_forwarded(*object) {
                *object = object_forwarding::forwardee(*object);
            }
        }
    }

    /// Write every preserved header back and empty the stack.
    pub fn restore(&mut self) {
        trace!("Restoring {} preserved marks", self.stack.len());
        while let Some((object, mark)) = self.stack.pop() {
            set_mark_raw(object, mark);
        }
    }

    /// The preserved header of `object`, or its current header if none was preserved.
    pub fn original_mark(&self, object: ObjectReference) -> MarkWord {
        self.stack
            .iter()
            .rev()
            .find(|(o, _)| *o == object)
            .map(|(_, m)| *m)
            .unwrap_or_else(|| mark_raw(object))
    }
}
