//! Byte layout computation for class instances.
//!
//! The resolver feeds each class's full field list (inherited fields
//! first) through [`compute`] and stores the result in the pool, where
//! codegen reads it back for field offsets and barrier decisions.

use ember_ir::ast::LayoutKind;

use crate::{Idx, Pool};

/// Size of the object header on GC-managed classes: a pointer to the
/// class descriptor followed by a word of GC mark/age bits.
pub const OBJECT_HEADER_SIZE: u32 = 16;

/// Pointer size of all supported targets.
pub const POINTER_SIZE: u32 = 8;

/// Placement of one field slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldLayout {
    /// Byte offset from the start of the allocation (header included for
    /// `object` classes).
    pub offset: u32,
    pub size: u32,
    pub align: u32,
    /// Reference-typed slot: the collector scans it and stores through it
    /// get a write barrier. `intptr` slots are never marked.
    pub is_reference: bool,
}

/// Finalized byte layout of a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutDescriptor {
    pub kind: LayoutKind,
    /// 16 for `object` classes, 0 otherwise.
    pub header_size: u32,
    /// Total allocation size, padded to `align`.
    pub size: u32,
    pub align: u32,
    /// One entry per field slot, declaration order (inherited first).
    pub fields: Vec<FieldLayout>,
}

impl LayoutDescriptor {
    /// True when instances carry an object header and are GC-managed.
    #[inline]
    pub fn is_gc_managed(&self) -> bool {
        self.kind == LayoutKind::Object
    }
}

/// Value size and alignment of one type.
///
/// Generic parameters are erased to boxed pointers, so every
/// non-primitive (and `nil`/`intptr`) occupies one pointer-sized slot.
pub fn size_align_of(idx: Idx) -> (u32, u32) {
    match idx {
        Idx::I1 | Idx::I8 => (1, 1),
        Idx::I32 | Idx::F32 => (4, 4),
        Idx::I64 | Idx::F64 => (8, 8),
        _ => (POINTER_SIZE, POINTER_SIZE),
    }
}

/// Compute the layout of a class from its full field type list.
pub fn compute(pool: &Pool, kind: LayoutKind, field_types: &[Idx]) -> LayoutDescriptor {
    match kind {
        LayoutKind::Object => sequential(pool, kind, field_types, OBJECT_HEADER_SIZE, true),
        LayoutKind::Struct => sequential(pool, kind, field_types, 0, true),
        LayoutKind::Packed => sequential(pool, kind, field_types, 0, false),
        LayoutKind::Union => union_layout(pool, field_types),
    }
}

/// Place fields one after another, aligning each when `natural` is set.
fn sequential(
    pool: &Pool,
    kind: LayoutKind,
    field_types: &[Idx],
    header_size: u32,
    natural: bool,
) -> LayoutDescriptor {
    let mut offset = header_size;
    // Object instances always hold a pointer-aligned header.
    let mut max_align = if header_size > 0 { POINTER_SIZE } else { 1 };
    let mut fields = Vec::with_capacity(field_types.len());

    for &ty in field_types {
        let (size, natural_align) = size_align_of(ty);
        let align = if natural { natural_align } else { 1 };
        offset = align_up(offset, align);
        fields.push(FieldLayout {
            offset,
            size,
            align,
            is_reference: pool.is_reference(ty),
        });
        offset += size;
        max_align = max_align.max(align);
    }

    LayoutDescriptor {
        kind,
        header_size,
        size: align_up(offset, max_align),
        align: max_align,
        fields,
    }
}

/// All fields at offset 0; size is the largest field.
fn union_layout(pool: &Pool, field_types: &[Idx]) -> LayoutDescriptor {
    let mut size = 0;
    let mut align = 1;
    let mut fields = Vec::with_capacity(field_types.len());

    for &ty in field_types {
        let (field_size, field_align) = size_align_of(ty);
        fields.push(FieldLayout {
            offset: 0,
            size: field_size,
            align: field_align,
            is_reference: pool.is_reference(ty),
        });
        size = size.max(field_size);
        align = align.max(field_align);
    }

    LayoutDescriptor {
        kind: LayoutKind::Union,
        header_size: 0,
        size: align_up(size, align),
        align,
        fields,
    }
}

/// Round `value` up to a multiple of `align` (a power of two).
#[inline]
fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn object_layout_has_header_and_alignment() {
        let pool = Pool::new();
        // { i8, i64, i32 }
        let layout = compute(&pool, LayoutKind::Object, &[Idx::I8, Idx::I64, Idx::I32]);
        assert_eq!(layout.header_size, OBJECT_HEADER_SIZE);
        assert_eq!(layout.fields[0].offset, 16);
        assert_eq!(layout.fields[1].offset, 24); // aligned past the i8
        assert_eq!(layout.fields[2].offset, 32);
        assert_eq!(layout.size, 40); // 36 rounded to 8
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn struct_layout_has_no_header() {
        let pool = Pool::new();
        let layout = compute(&pool, LayoutKind::Struct, &[Idx::I32, Idx::I8]);
        assert_eq!(layout.header_size, 0);
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 4);
        assert_eq!(layout.size, 8); // 5 rounded to 4
        assert_eq!(layout.align, 4);
    }

    #[test]
    fn packed_layout_has_no_padding() {
        let pool = Pool::new();
        let layout = compute(&pool, LayoutKind::Packed, &[Idx::I8, Idx::I64, Idx::I32]);
        assert_eq!(layout.fields[0].offset, 0);
        assert_eq!(layout.fields[1].offset, 1);
        assert_eq!(layout.fields[2].offset, 9);
        assert_eq!(layout.size, 13);
        assert_eq!(layout.align, 1);
    }

    #[test]
    fn union_layout_overlaps_fields() {
        let pool = Pool::new();
        let layout = compute(&pool, LayoutKind::Union, &[Idx::I8, Idx::I64, Idx::F32]);
        assert!(layout.fields.iter().all(|f| f.offset == 0));
        assert_eq!(layout.size, 8);
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn reference_fields_are_marked() {
        let mut pool = Pool::new();
        let arr = pool.array(Idx::I64);
        let layout = compute(&pool, LayoutKind::Object, &[arr, Idx::I64, Idx::INTPTR]);
        assert!(layout.fields[0].is_reference);
        assert!(!layout.fields[1].is_reference);
        // intptr is a raw integer, never scanned
        assert!(!layout.fields[2].is_reference);
    }

    #[test]
    fn erased_generic_layouts_are_identical() {
        let mut pool = Pool::new();
        let t = pool.type_param(0);
        // A Box[T] body laid out with T erased matches the layout of any
        // instantiation: one pointer slot.
        let layout = compute(&pool, LayoutKind::Object, &[t]);
        let (size, align) = size_align_of(t);
        assert_eq!((size, align), (POINTER_SIZE, POINTER_SIZE));
        assert_eq!(layout.fields[0].offset, 16);
        assert!(layout.fields[0].is_reference);
    }
}
