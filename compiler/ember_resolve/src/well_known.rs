//! Runtime prelude classes the middle end references by name.
//!
//! The front end includes these in every compilation unit; the resolver
//! records their handles so lowering can emit traps, boxes, and string
//! operations without name lookups.

use ember_ir::ast::Module;
use ember_ir::{ClassId, StringInterner};

use crate::ResolveError;

/// Handles to the prelude classes.
#[derive(Copy, Clone, Debug)]
pub struct WellKnown {
    /// Root of the class hierarchy; every parentless class implicitly
    /// descends from it.
    pub object: ClassId,
    /// The string class.
    pub string: ClassId,
    /// Root of the exception hierarchy.
    pub exception: ClassId,
    /// Raised by integer division by zero.
    pub division_by_zero: ClassId,
    /// Raised by out-of-range array/hash access.
    pub index_out_of_bounds: ClassId,
    /// Raised by member access through `nil`.
    pub null_reference: ClassId,
    /// Raised by a non-exhaustive match with no arm taken.
    pub match_error: ClassId,
    /// Raised by `from_json` on missing or mismatched fields.
    pub serialization_error: ClassId,
    /// Boxed primitive wrapper used at generic boundaries.
    pub boxed: ClassId,
}

/// Prelude class names in the order the front end declares them.
pub const PRELUDE_CLASS_NAMES: &[&str] = &[
    "Object",
    "String",
    "Exception",
    "DivisionByZeroError",
    "IndexOutOfBoundsError",
    "NullReferenceError",
    "MatchError",
    "SerializationError",
    "Boxed",
];

impl WellKnown {
    /// Locate the prelude classes in a module by name.
    pub fn locate(module: &Module, interner: &StringInterner) -> Result<Self, Vec<ResolveError>> {
        let find = |name: &'static str| -> Result<ClassId, ResolveError> {
            let interned = interner
                .get(name)
                .ok_or(ResolveError::MissingRuntimeClass { name })?;
            module
                .classes
                .iter()
                .position(|c| c.name == interned)
                .map(|i| {
                    #[allow(
                        clippy::cast_possible_truncation,
                        reason = "class count is bounded by u32 ids"
                    )]
                    ClassId::new(i as u32)
                })
                .ok_or(ResolveError::MissingRuntimeClass { name })
        };

        let mut errors = Vec::new();
        let mut get = |name| match find(name) {
            Ok(id) => id,
            Err(e) => {
                errors.push(e);
                ClassId::new(u32::MAX)
            }
        };

        let well_known = WellKnown {
            object: get("Object"),
            string: get("String"),
            exception: get("Exception"),
            division_by_zero: get("DivisionByZeroError"),
            index_out_of_bounds: get("IndexOutOfBoundsError"),
            null_reference: get("NullReferenceError"),
            match_error: get("MatchError"),
            serialization_error: get("SerializationError"),
            boxed: get("Boxed"),
        };

        if errors.is_empty() {
            Ok(well_known)
        } else {
            Err(errors)
        }
    }
}
