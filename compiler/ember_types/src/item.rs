//! Compact type item storage.
//!
//! Each type in the pool is stored as an `Item` with a tag and data field.
//! The interpretation of `data` depends on the tag.

use crate::{Idx, Tag};

/// A single type item in the pool.
///
/// - `tag`: identifies the type kind (see [`Tag`])
/// - `data`: tag-dependent (child index, extra index, class id, or
///   parameter index)
#[derive(Copy, Clone, Debug)]
#[repr(C)]
pub struct Item {
    /// Type kind discriminant.
    pub tag: Tag,
    /// Tag-dependent data field.
    pub data: u32,
}

impl Item {
    /// Create a new item with the given tag and data.
    #[inline]
    pub const fn new(tag: Tag, data: u32) -> Self {
        Self { tag, data }
    }

    /// Create a primitive type item.
    #[inline]
    pub const fn primitive(tag: Tag) -> Self {
        Self { tag, data: 0 }
    }

    /// Create a simple container item (Array, Channel, Future).
    ///
    /// `child` is stored directly in the data field.
    #[inline]
    pub const fn simple_container(tag: Tag, child: Idx) -> Self {
        Self {
            tag,
            data: child.raw(),
        }
    }

    /// Create an item that references the extra array.
    #[inline]
    pub const fn with_extra(tag: Tag, extra_idx: u32) -> Self {
        Self {
            tag,
            data: extra_idx,
        }
    }

    /// Get the child index for simple container types.
    ///
    /// Only valid for Array, Channel, Future.
    #[inline]
    pub const fn child(self) -> Idx {
        Idx::from_raw(self.data)
    }

    /// Get the extra array index for complex types.
    ///
    /// Only valid for GenericInstance, Function, Hash, Tuple, Block.
    #[inline]
    pub const fn extra_idx(self) -> usize {
        self.data as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_layout_is_small() {
        assert!(std::mem::size_of::<Item>() <= 8);
    }

    #[test]
    fn container_child_roundtrip() {
        let item = Item::simple_container(Tag::Array, Idx::I64);
        assert_eq!(item.child(), Idx::I64);
        assert_eq!(item.tag, Tag::Array);
    }
}
