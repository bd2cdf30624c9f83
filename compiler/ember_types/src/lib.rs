//! Canonical type context for the Ember middle end.
//!
//! Every type of a compilation unit lives in one interned [`Pool`] and is
//! referenced by a 32-bit [`Idx`]; two types are equal iff their indices
//! are equal. The pool also carries the resolver-populated nominal side
//! tables — class names, parent links, finalized [`LayoutDescriptor`]s —
//! so subtype queries and layout lookups need no other context.

pub mod layout;

mod flags;
mod idx;
mod item;
mod pool;
mod tag;

pub use flags::TypeFlags;
pub use idx::Idx;
pub use item::Item;
pub use layout::{FieldLayout, LayoutDescriptor, OBJECT_HEADER_SIZE, POINTER_SIZE};
pub use pool::{FnEffects, Pool};
pub use tag::Tag;
