use ember_ir::{ClassId, Name};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::FnEffects;

#[test]
fn primitives_at_correct_indices() {
    let pool = Pool::new();

    assert_eq!(pool.tag(Idx::I1), Tag::I1);
    assert_eq!(pool.tag(Idx::I8), Tag::I8);
    assert_eq!(pool.tag(Idx::I32), Tag::I32);
    assert_eq!(pool.tag(Idx::I64), Tag::I64);
    assert_eq!(pool.tag(Idx::F32), Tag::F32);
    assert_eq!(pool.tag(Idx::F64), Tag::F64);
    assert_eq!(pool.tag(Idx::NIL), Tag::Nil);
    assert_eq!(pool.tag(Idx::INTPTR), Tag::IntPtr);
}

#[test]
fn pool_starts_with_reserved_range() {
    let pool = Pool::new();
    assert_eq!(pool.len(), Idx::FIRST_DYNAMIC as usize);
    assert!(pool.is_empty());
}

#[test]
fn primitive_flags_correct() {
    let pool = Pool::new();

    let i64_flags = pool.flags(Idx::I64);
    assert!(i64_flags.contains(TypeFlags::IS_PRIMITIVE));
    assert!(!i64_flags.contains(TypeFlags::IS_REFERENCE));

    // nil is the null reference
    assert!(pool.is_reference(Idx::NIL));
    // intptr is a raw integer the GC never scans
    assert!(!pool.is_reference(Idx::INTPTR));
}

#[test]
fn interning_deduplicates() {
    let mut pool = Pool::new();
    let a = pool.class(ClassId::new(3));
    let b = pool.class(ClassId::new(3));
    let c = pool.class(ClassId::new(4));
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn generic_instances_dedupe_by_args() {
    let mut pool = Pool::new();
    let class = ClassId::new(7);
    let a = pool.generic_instance(class, &[Idx::I64]);
    let b = pool.generic_instance(class, &[Idx::I64]);
    let c = pool.generic_instance(class, &[Idx::F64]);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(pool.class_id(a), class);
    assert_eq!(pool.generic_args(c), vec![Idx::F64]);
}

#[test]
fn type_param_flags_mark_erasure() {
    let mut pool = Pool::new();
    let t = pool.type_param(0);
    assert!(pool.flags(t).contains(TypeFlags::HAS_TYPE_PARAM));
    assert!(pool.is_reference(t));

    // A field of type [T] also needs erased access.
    let arr = pool.array(t);
    assert!(pool.flags(arr).contains(TypeFlags::HAS_TYPE_PARAM));
}

// ── Subtyping ───────────────────────────────────────────────────────

/// animal <- dog <- puppy, cat <- animal, all under a root.
fn hierarchy(pool: &mut Pool) -> (ClassId, ClassId, ClassId, ClassId, ClassId) {
    let root = ClassId::new(0);
    let animal = ClassId::new(1);
    let dog = ClassId::new(2);
    let puppy = ClassId::new(3);
    let cat = ClassId::new(4);
    pool.register_class(root, Name::EMPTY, None);
    pool.register_class(animal, Name::EMPTY, Some(root));
    pool.register_class(dog, Name::EMPTY, Some(animal));
    pool.register_class(puppy, Name::EMPTY, Some(dog));
    pool.register_class(cat, Name::EMPTY, Some(animal));
    let root_idx = pool.class(root);
    pool.set_root_class(root_idx);
    (root, animal, dog, puppy, cat)
}

#[test]
fn class_subtyping_walks_parents() {
    let mut pool = Pool::new();
    let (root, animal, dog, puppy, cat) = hierarchy(&mut pool);

    let animal_t = pool.class(animal);
    let dog_t = pool.class(dog);
    let puppy_t = pool.class(puppy);
    let cat_t = pool.class(cat);
    let root_t = pool.class(root);

    assert!(pool.subtype_of(dog_t, animal_t));
    assert!(pool.subtype_of(puppy_t, animal_t));
    assert!(pool.subtype_of(puppy_t, root_t));
    assert!(!pool.subtype_of(animal_t, dog_t));
    assert!(!pool.subtype_of(cat_t, dog_t));
}

#[test]
fn nil_subtypes_references_only() {
    let mut pool = Pool::new();
    let (_, animal, ..) = hierarchy(&mut pool);
    let animal_t = pool.class(animal);
    let arr = pool.array(Idx::I64);

    assert!(pool.subtype_of(Idx::NIL, animal_t));
    assert!(pool.subtype_of(Idx::NIL, arr));
    assert!(!pool.subtype_of(Idx::NIL, Idx::I64));
    assert!(!pool.subtype_of(Idx::NIL, Idx::INTPTR));
}

#[test]
fn primitives_subtype_only_themselves() {
    let pool = Pool::new();
    assert!(pool.subtype_of(Idx::I32, Idx::I32));
    assert!(!pool.subtype_of(Idx::I32, Idx::I64));
    assert!(!pool.subtype_of(Idx::INTPTR, Idx::I64));
    assert!(!pool.subtype_of(Idx::I64, Idx::INTPTR));
}

#[test]
fn generic_subtyping_requires_exact_args() {
    let mut pool = Pool::new();
    let (_, animal, dog, ..) = hierarchy(&mut pool);

    let dog_idx = pool.class(dog);
    let animal_idx = pool.class(animal);
    let box_dog = pool.generic_instance(ClassId::new(9), &[dog_idx]);
    let box_dog2 = pool.generic_instance(ClassId::new(9), &[dog_idx]);
    let box_animal = pool.generic_instance(ClassId::new(9), &[animal_idx]);

    assert!(pool.subtype_of(box_dog, box_dog2));
    // Generic arguments are invariant.
    assert!(!pool.subtype_of(box_dog, box_animal));
}

#[test]
fn common_super_finds_shared_ancestor() {
    let mut pool = Pool::new();
    let (root, animal, dog, puppy, cat) = hierarchy(&mut pool);

    let animal_t = pool.class(animal);
    let dog_t = pool.class(dog);
    let puppy_t = pool.class(puppy);
    let cat_t = pool.class(cat);
    let root_t = pool.class(root);

    assert_eq!(pool.common_super(dog_t, puppy_t), dog_t);
    assert_eq!(pool.common_super(dog_t, cat_t), animal_t);
    assert_eq!(pool.common_super(dog_t, dog_t), dog_t);
    assert_eq!(pool.common_super(root_t, cat_t), root_t);
    // Mixed primitives have no common supertype.
    assert_eq!(pool.common_super(Idx::I64, Idx::F64), Idx::NONE);
}

// ── Properties ──────────────────────────────────────────────────────

proptest! {
    /// Interning the same structure twice always yields the same index.
    #[test]
    fn intern_is_idempotent(class in 0u32..64, arg in 0u32..6) {
        let mut pool = Pool::new();
        let arg = Idx::from_raw(arg);
        let a = pool.generic_instance(ClassId::new(class), &[arg]);
        let b = pool.generic_instance(ClassId::new(class), &[arg]);
        prop_assert_eq!(a, b);
    }

    /// Function types propagate type-param presence from any position.
    #[test]
    fn function_flags_propagate(param_idx in 0u32..4) {
        let mut pool = Pool::new();
        let t = pool.type_param(param_idx);
        let f = pool.function(&[Idx::I64, t], Idx::I1, FnEffects::default());
        prop_assert!(pool.flags(f).contains(TypeFlags::HAS_TYPE_PARAM));
    }
}
