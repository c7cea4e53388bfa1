//! The interface a language runtime implements to host the collector.
//!
//! A binding tells the collector two things: how large an object is ([`ObjectModel`]) and where
//! its reference slots are ([`Scanning`]). Everything else, including the object header and the
//! slot encodings, is fixed by the collector.

mod class_loader_data;
mod object_model;
mod scanning;
pub mod slot;
#[cfg(test)]
mod tests;

pub use self::class_loader_data::ClassLoaderData;
pub use self::object_model::ObjectModel;
pub use self::scanning::BoundedSlotVisitor;
pub use self::scanning::Scanning;
pub use self::scanning::SlotVisitor;

/// The `VMBinding` trait associates the VM-specific traits with each other.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    type VMObjectModel: ObjectModel<Self>;
    type VMScanning: Scanning<Self>;
}
