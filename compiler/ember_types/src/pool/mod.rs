//! Unified type pool - single source of truth for all types.
//!
//! The Pool stores every type of a compilation unit in one interned
//! universe:
//! - Types are referenced by [`Idx`] (32-bit indices)
//! - Each type is an [`Item`] with tag and data
//! - Complex types use an extra array for variable-length data
//! - Pre-computed [`TypeFlags`] enable O(1) property queries
//!
//! Hash-based deduplication ensures each unique type exists once, so type
//! equality is index equality. Primitives are pre-interned at fixed
//! indices. Structural cycles cannot be constructed: compound types are
//! interned bottom-up, and the only legal back-reference is the nominal
//! `Class` tag, which carries a class id rather than a type index.

mod construct;
mod format;

pub use construct::FnEffects;

use ember_ir::{ClassId, Name};
use rustc_hash::FxHashMap;

use crate::{Idx, Item, Tag, TypeFlags};

/// The unified type pool.
///
/// Owns all [`Item`]s plus the resolver-populated nominal side tables:
/// class names, parent links, and layouts. Handles (`Idx`) are copyable
/// lightweight tokens into this pool.
pub struct Pool {
    // === Core Storage (parallel arrays) ===
    /// All type items (tag + data).
    items: Vec<Item>,
    /// Pre-computed flags for each item (flags[i] corresponds to items[i]).
    flags: Vec<TypeFlags>,
    /// Stable hashes for each item (hashes[i] corresponds to items[i]).
    hashes: Vec<u64>,

    // === Extra Data ===
    /// Variable-length data for complex types.
    /// Layout depends on tag (see documentation on each tag).
    extra: Vec<u32>,

    // === Deduplication ===
    /// Hash -> Idx mapping for deduplication.
    intern_map: FxHashMap<u64, Idx>,

    // === Nominal side tables (populated by the resolver) ===
    /// Class display names.
    class_names: FxHashMap<u32, Name>,
    /// Class parent links (absent = no parent).
    class_parents: FxHashMap<u32, u32>,
    /// Finalized class layouts.
    layouts: FxHashMap<u32, crate::LayoutDescriptor>,
    /// Interned `Class` idx of the root object class, once registered.
    root_class: Idx,
}

impl Pool {
    /// Upper bound on parent-chain walks. Real hierarchies are shallow;
    /// the limit only bounds damage from a corrupted parent table.
    const MAX_SUPER_DEPTH: u32 = 64;

    /// Create a new pool with pre-interned primitives.
    pub fn new() -> Self {
        let mut pool = Self {
            items: Vec::with_capacity(256),
            flags: Vec::with_capacity(256),
            hashes: Vec::with_capacity(256),
            extra: Vec::with_capacity(1024),
            intern_map: FxHashMap::default(),
            class_names: FxHashMap::default(),
            class_parents: FxHashMap::default(),
            layouts: FxHashMap::default(),
            root_class: Idx::NONE,
        };
        pool.intern_primitives();
        pool
    }

    /// Pre-intern all primitive types at their fixed indices.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "primitive count is a small constant, always fits u32"
    )]
    fn intern_primitives(&mut self) {
        // Primitives must be interned in exact order to match Idx constants
        self.intern_primitive_at(Tag::I1, Idx::I1);
        self.intern_primitive_at(Tag::I8, Idx::I8);
        self.intern_primitive_at(Tag::I32, Idx::I32);
        self.intern_primitive_at(Tag::I64, Idx::I64);
        self.intern_primitive_at(Tag::F32, Idx::F32);
        self.intern_primitive_at(Tag::F64, Idx::F64);
        self.intern_primitive_at(Tag::Nil, Idx::NIL);
        self.intern_primitive_at(Tag::IntPtr, Idx::INTPTR);

        // Pad the reserved range so dynamic indices start at FIRST_DYNAMIC
        while (self.items.len() as u32) < Idx::FIRST_DYNAMIC {
            self.items.push(Item::primitive(Tag::Nil));
            self.flags.push(TypeFlags::empty());
            self.hashes.push(0);
        }

        debug_assert_eq!(self.items.len() as u32, Idx::FIRST_DYNAMIC);
    }

    /// Intern a primitive type at a specific index.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "items.len() always fits u32 - pool indices are u32"
    )]
    fn intern_primitive_at(&mut self, tag: Tag, expected_idx: Idx) {
        let idx = Idx::from_raw(self.items.len() as u32);
        debug_assert_eq!(idx, expected_idx, "primitive index mismatch for {tag:?}");

        let hash = Self::compute_hash(tag, 0, &[]);
        self.items.push(Item::primitive(tag));
        self.flags.push(Self::primitive_flags(tag));
        self.hashes.push(hash);
        self.intern_map.insert(hash, idx);
    }

    /// Flags for a primitive tag.
    fn primitive_flags(tag: Tag) -> TypeFlags {
        match tag {
            // nil is the null reference: primitive, but stores into
            // nil-typed slots still look like reference stores.
            Tag::Nil => TypeFlags::IS_PRIMITIVE | TypeFlags::IS_REFERENCE,
            _ => TypeFlags::IS_PRIMITIVE,
        }
    }

    // === Query Methods ===

    /// Get the tag for a type index.
    #[inline]
    pub fn tag(&self, idx: Idx) -> Tag {
        self.items[idx.raw() as usize].tag
    }

    /// Get the data field for a type index.
    #[inline]
    pub fn data(&self, idx: Idx) -> u32 {
        self.items[idx.raw() as usize].data
    }

    /// Get the flags for a type index.
    #[inline]
    pub fn flags(&self, idx: Idx) -> TypeFlags {
        self.flags[idx.raw() as usize]
    }

    /// True when values of `idx` are GC-scanned references.
    #[inline]
    pub fn is_reference(&self, idx: Idx) -> bool {
        self.flags(idx).contains(TypeFlags::IS_REFERENCE)
    }

    /// Get the number of types in the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the pool is empty (only has primitives).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.len() <= Idx::FIRST_DYNAMIC as usize
    }

    // === Interning Methods ===

    /// Intern a simple type (no extra data).
    ///
    /// Returns the canonical index for this type.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "items.len() always fits u32 - pool indices are u32"
    )]
    pub fn intern(&mut self, tag: Tag, data: u32) -> Idx {
        let hash = Self::compute_hash(tag, data, &[]);

        if let Some(&idx) = self.intern_map.get(&hash) {
            return idx;
        }

        let idx = Idx::from_raw(self.items.len() as u32);
        let flags = self.compute_flags(tag, data, &[]);

        self.items.push(Item::new(tag, data));
        self.flags.push(flags);
        self.hashes.push(hash);
        self.intern_map.insert(hash, idx);

        idx
    }

    /// Intern a complex type with extra data.
    ///
    /// The `extra_data` slice is copied into the extra array.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "items.len() and extra.len() always fit u32 - pool storage is u32-indexed"
    )]
    pub fn intern_complex(&mut self, tag: Tag, extra_data: &[u32]) -> Idx {
        let hash = Self::compute_hash(tag, 0, extra_data);

        if let Some(&idx) = self.intern_map.get(&hash) {
            return idx;
        }

        let extra_idx = self.extra.len() as u32;
        self.extra.extend_from_slice(extra_data);

        let idx = Idx::from_raw(self.items.len() as u32);
        let flags = self.compute_flags(tag, extra_idx, extra_data);

        self.items.push(Item::with_extra(tag, extra_idx));
        self.flags.push(flags);
        self.hashes.push(hash);
        self.intern_map.insert(hash, idx);

        idx
    }

    /// Compute hash for interning.
    fn compute_hash(tag: Tag, data: u32, extra: &[u32]) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();

        (tag as u8).hash(&mut hasher);
        data.hash(&mut hasher);
        extra.hash(&mut hasher);

        hasher.finish()
    }

    /// Compute flags for a newly interned type.
    fn compute_flags(&self, tag: Tag, data: u32, extra: &[u32]) -> TypeFlags {
        let child_flags = |raw: u32| TypeFlags::propagate_from(self.flags[raw as usize]);

        match tag {
            Tag::I1
            | Tag::I8
            | Tag::I32
            | Tag::I64
            | Tag::F32
            | Tag::F64
            | Tag::Nil
            | Tag::IntPtr => Self::primitive_flags(tag),

            Tag::Class => TypeFlags::IS_CLASS | TypeFlags::IS_REFERENCE,

            // Erased slots are boxed pointers at runtime.
            Tag::TypeParam => TypeFlags::HAS_TYPE_PARAM | TypeFlags::IS_REFERENCE,

            Tag::GenericInstance => {
                // extra layout: [class_id, argc, args…]
                let argc = extra[1] as usize;
                let mut flags = TypeFlags::IS_CLASS | TypeFlags::IS_REFERENCE;
                for &arg in &extra[2..2 + argc] {
                    flags |= child_flags(arg);
                }
                flags
            }

            Tag::Function => {
                // extra layout: [paramc, params…, ret, effects]
                let paramc = extra[0] as usize;
                let mut flags = TypeFlags::IS_FUNCTION;
                for &p in &extra[1..1 + paramc] {
                    flags |= child_flags(p);
                }
                flags |= child_flags(extra[1 + paramc]);
                let effects = FnEffects::from_bits(extra[2 + paramc]);
                if effects.throws {
                    flags |= TypeFlags::MAY_THROW;
                }
                if effects.is_async {
                    flags |= TypeFlags::IS_ASYNC;
                }
                flags
            }

            Tag::Array | Tag::Channel | Tag::Future => {
                TypeFlags::IS_CONTAINER | TypeFlags::IS_REFERENCE | child_flags(data)
            }

            Tag::Range => TypeFlags::IS_CONTAINER | TypeFlags::IS_REFERENCE,

            Tag::Hash => {
                // extra layout: [key, value]
                TypeFlags::IS_CONTAINER
                    | TypeFlags::IS_REFERENCE
                    | child_flags(extra[0])
                    | child_flags(extra[1])
            }

            Tag::Tuple => {
                // extra layout: [elemc, elems…]
                let elemc = extra[0] as usize;
                let mut flags = TypeFlags::IS_REFERENCE;
                for &e in &extra[1..1 + elemc] {
                    flags |= child_flags(e);
                }
                flags
            }

            Tag::Block => {
                // extra layout: [paramc, params…, ret, capture_shape]
                let paramc = extra[0] as usize;
                let mut flags = TypeFlags::IS_BLOCK | TypeFlags::IS_REFERENCE;
                for &p in &extra[1..1 + paramc] {
                    flags |= child_flags(p);
                }
                flags |= child_flags(extra[1 + paramc]);
                flags
            }
        }
    }

    // === Extra Array Accessors ===

    /// Element type of an array/channel/future.
    ///
    /// # Panics
    /// Panics if `idx` is not a simple container type.
    pub fn elem(&self, idx: Idx) -> Idx {
        debug_assert!(matches!(
            self.tag(idx),
            Tag::Array | Tag::Channel | Tag::Future
        ));
        Idx::from_raw(self.data(idx))
    }

    /// Hash key type.
    ///
    /// # Panics
    /// Panics if `idx` is not a Hash type.
    pub fn hash_key(&self, idx: Idx) -> Idx {
        debug_assert_eq!(self.tag(idx), Tag::Hash);
        Idx::from_raw(self.extra[self.data(idx) as usize])
    }

    /// Hash value type.
    ///
    /// # Panics
    /// Panics if `idx` is not a Hash type.
    pub fn hash_value(&self, idx: Idx) -> Idx {
        debug_assert_eq!(self.tag(idx), Tag::Hash);
        Idx::from_raw(self.extra[self.data(idx) as usize + 1])
    }

    /// Class id of a `Class` or `GenericInstance` type.
    ///
    /// # Panics
    /// Panics if `idx` is neither.
    pub fn class_id(&self, idx: Idx) -> ClassId {
        match self.tag(idx) {
            Tag::Class => ClassId::new(self.data(idx)),
            Tag::GenericInstance => {
                let extra_idx = self.data(idx) as usize;
                ClassId::new(self.extra[extra_idx])
            }
            tag => panic!("class_id on non-class type (tag {tag:?})"),
        }
    }

    /// Type arguments of a `GenericInstance`.
    ///
    /// # Panics
    /// Panics if `idx` is not a GenericInstance type.
    pub fn generic_args(&self, idx: Idx) -> Vec<Idx> {
        debug_assert_eq!(self.tag(idx), Tag::GenericInstance);
        let extra_idx = self.data(idx) as usize;
        let argc = self.extra[extra_idx + 1] as usize;
        (0..argc)
            .map(|i| Idx::from_raw(self.extra[extra_idx + 2 + i]))
            .collect()
    }

    /// Parameter index of a `TypeParam`.
    ///
    /// # Panics
    /// Panics if `idx` is not a TypeParam type.
    pub fn type_param_index(&self, idx: Idx) -> u32 {
        debug_assert_eq!(self.tag(idx), Tag::TypeParam);
        self.data(idx)
    }

    /// Function parameter types.
    ///
    /// # Panics
    /// Panics if `idx` is not a Function type.
    pub fn function_params(&self, idx: Idx) -> Vec<Idx> {
        debug_assert_eq!(self.tag(idx), Tag::Function);
        let extra_idx = self.data(idx) as usize;
        let paramc = self.extra[extra_idx] as usize;
        (0..paramc)
            .map(|i| Idx::from_raw(self.extra[extra_idx + 1 + i]))
            .collect()
    }

    /// Function return type.
    ///
    /// # Panics
    /// Panics if `idx` is not a Function type.
    pub fn function_return(&self, idx: Idx) -> Idx {
        debug_assert_eq!(self.tag(idx), Tag::Function);
        let extra_idx = self.data(idx) as usize;
        let paramc = self.extra[extra_idx] as usize;
        Idx::from_raw(self.extra[extra_idx + 1 + paramc])
    }

    /// Function effects.
    ///
    /// # Panics
    /// Panics if `idx` is not a Function type.
    pub fn function_effects(&self, idx: Idx) -> FnEffects {
        debug_assert_eq!(self.tag(idx), Tag::Function);
        let extra_idx = self.data(idx) as usize;
        let paramc = self.extra[extra_idx] as usize;
        FnEffects::from_bits(self.extra[extra_idx + 2 + paramc])
    }

    /// Tuple element types.
    ///
    /// # Panics
    /// Panics if `idx` is not a Tuple type.
    pub fn tuple_elems(&self, idx: Idx) -> Vec<Idx> {
        debug_assert_eq!(self.tag(idx), Tag::Tuple);
        let extra_idx = self.data(idx) as usize;
        let elemc = self.extra[extra_idx] as usize;
        (0..elemc)
            .map(|i| Idx::from_raw(self.extra[extra_idx + 1 + i]))
            .collect()
    }

    /// Block parameter types.
    ///
    /// # Panics
    /// Panics if `idx` is not a Block type.
    pub fn block_params(&self, idx: Idx) -> Vec<Idx> {
        debug_assert_eq!(self.tag(idx), Tag::Block);
        let extra_idx = self.data(idx) as usize;
        let paramc = self.extra[extra_idx] as usize;
        (0..paramc)
            .map(|i| Idx::from_raw(self.extra[extra_idx + 1 + i]))
            .collect()
    }

    /// Block return type.
    ///
    /// # Panics
    /// Panics if `idx` is not a Block type.
    pub fn block_return(&self, idx: Idx) -> Idx {
        debug_assert_eq!(self.tag(idx), Tag::Block);
        let extra_idx = self.data(idx) as usize;
        let paramc = self.extra[extra_idx] as usize;
        Idx::from_raw(self.extra[extra_idx + 1 + paramc])
    }

    // === Nominal Registration (resolver-populated) ===

    /// Record a class's display name and parent link.
    ///
    /// Called once per class by the resolver before any subtype query
    /// involving the class.
    pub fn register_class(&mut self, class: ClassId, name: Name, parent: Option<ClassId>) {
        self.class_names.insert(class.raw(), name);
        if let Some(parent) = parent {
            self.class_parents.insert(class.raw(), parent.raw());
        }
    }

    /// Record the root object class (ancestor of every parentless class).
    pub fn set_root_class(&mut self, idx: Idx) {
        debug_assert_eq!(self.tag(idx), Tag::Class);
        self.root_class = idx;
    }

    /// The interned `Class` idx of the root object class.
    pub fn root_class(&self) -> Idx {
        self.root_class
    }

    /// Display name of a registered class.
    pub fn class_name(&self, class: ClassId) -> Option<Name> {
        self.class_names.get(&class.raw()).copied()
    }

    /// Parent of a registered class.
    pub fn class_parent(&self, class: ClassId) -> Option<ClassId> {
        self.class_parents.get(&class.raw()).copied().map(ClassId::new)
    }

    /// Store a finalized layout for a class.
    pub fn set_layout(&mut self, class: ClassId, layout: crate::LayoutDescriptor) {
        self.layouts.insert(class.raw(), layout);
    }

    /// Finalized layout of a class, if the resolver has produced one.
    pub fn layout_of(&self, class: ClassId) -> Option<&crate::LayoutDescriptor> {
        self.layouts.get(&class.raw())
    }

    // === Subtyping ===

    /// Nominal subtype check with exact generic arguments.
    ///
    /// - Every type is a subtype of itself.
    /// - `nil` is a subtype of any reference-typed slot.
    /// - A class is a subtype of its ancestors.
    /// - A generic instance is a subtype of another iff the classes are
    ///   related and the arguments are identical; of a bare class iff the
    ///   classes are related (the erased view).
    /// - Primitives are subtypes only of themselves; `intptr` converts
    ///   to nothing.
    pub fn subtype_of(&self, a: Idx, b: Idx) -> bool {
        if a == b {
            return true;
        }
        if self.tag(a) == Tag::Nil {
            return self.is_reference(b) && self.tag(b) != Tag::Nil;
        }

        match (self.tag(a), self.tag(b)) {
            (Tag::Class, Tag::Class) => self.class_subtype(self.class_id(a), self.class_id(b)),
            (Tag::GenericInstance, Tag::Class) => {
                self.class_subtype(self.class_id(a), self.class_id(b))
            }
            (Tag::GenericInstance, Tag::GenericInstance) => {
                self.generic_args(a) == self.generic_args(b)
                    && self.class_subtype(self.class_id(a), self.class_id(b))
            }
            // Synthesized closure classes flow into block-typed slots;
            // their `call` signature was checked at creation.
            (Tag::Class | Tag::GenericInstance, Tag::Block) => true,
            _ => false,
        }
    }

    /// Walk the parent chain from `child` looking for `ancestor`.
    pub fn class_subtype(&self, child: ClassId, ancestor: ClassId) -> bool {
        let mut current = child;
        for _ in 0..Self::MAX_SUPER_DEPTH {
            if current == ancestor {
                return true;
            }
            match self.class_parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// Nearest common supertype.
    ///
    /// Returns the more general of the two when they are related, the
    /// nearest common class ancestor for unrelated classes (falling back
    /// to the registered root class), and `Idx::NONE` when no common
    /// supertype exists (e.g. mixed primitive kinds).
    pub fn common_super(&self, a: Idx, b: Idx) -> Idx {
        if a == b {
            return a;
        }
        if self.subtype_of(a, b) {
            return b;
        }
        if self.subtype_of(b, a) {
            return a;
        }

        let class_like = |idx: Idx| matches!(self.tag(idx), Tag::Class | Tag::GenericInstance);
        if class_like(a) && class_like(b) {
            // Walk a's ancestor chain; return the first ancestor that is
            // also an ancestor of b.
            let mut current = self.class_id(a);
            for _ in 0..Self::MAX_SUPER_DEPTH {
                if self.class_subtype(self.class_id(b), current) {
                    if let Some(idx) = self.lookup_class(current) {
                        return idx;
                    }
                    break;
                }
                match self.class_parent(current) {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
            return self.root_class;
        }

        Idx::NONE
    }

    /// Find the already-interned `Class` idx for a class id, if any.
    fn lookup_class(&self, class: ClassId) -> Option<Idx> {
        let hash = Self::compute_hash(Tag::Class, class.raw(), &[]);
        self.intern_map.get(&hash).copied()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
