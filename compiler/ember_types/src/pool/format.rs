//! Human-readable rendering of pooled types.
//!
//! Used by diagnostics and the Anvil dump. Output is deterministic for a
//! given pool + interner pair.

use ember_ir::StringInterner;

use crate::{Idx, Pool, Tag};

impl Pool {
    /// Render a type for display.
    ///
    /// Class names come from the resolver-registered name table;
    /// unregistered classes render as `class#N`.
    pub fn format(&self, idx: Idx, interner: &StringInterner) -> String {
        if idx.is_none() {
            return "<none>".to_owned();
        }
        if let Some(name) = idx.name() {
            return name.to_owned();
        }

        match self.tag(idx) {
            Tag::Class => self.format_class_name(idx, interner),
            Tag::GenericInstance => {
                let base = self.format_class_name(idx, interner);
                let args = self
                    .generic_args(idx)
                    .iter()
                    .map(|&a| self.format(a, interner))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{base}[{args}]")
            }
            Tag::TypeParam => format!("T{}", self.type_param_index(idx)),
            Tag::Function => {
                let params = self
                    .function_params(idx)
                    .iter()
                    .map(|&p| self.format(p, interner))
                    .collect::<Vec<_>>()
                    .join(", ");
                let ret = self.format(self.function_return(idx), interner);
                let effects = self.function_effects(idx);
                let mut out = format!("fn({params}) -> {ret}");
                if effects.is_async {
                    out.push_str(" async");
                }
                if effects.throws {
                    out.push_str(" throws");
                }
                out
            }
            Tag::Array => format!("[{}]", self.format(self.elem(idx), interner)),
            Tag::Hash => format!(
                "{{{}: {}}}",
                self.format(self.hash_key(idx), interner),
                self.format(self.hash_value(idx), interner)
            ),
            Tag::Range => "range".to_owned(),
            Tag::Tuple => {
                let elems = self
                    .tuple_elems(idx)
                    .iter()
                    .map(|&e| self.format(e, interner))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({elems})")
            }
            Tag::Block => {
                let params = self
                    .block_params(idx)
                    .iter()
                    .map(|&p| self.format(p, interner))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "block({params}) -> {}",
                    self.format(self.block_return(idx), interner)
                )
            }
            Tag::Channel => format!("channel[{}]", self.format(self.elem(idx), interner)),
            Tag::Future => format!("future[{}]", self.format(self.elem(idx), interner)),
            // Primitives are handled by the fixed-index fast path above.
            tag => tag.to_string(),
        }
    }

    fn format_class_name(&self, idx: Idx, interner: &StringInterner) -> String {
        let class = self.class_id(idx);
        match self.class_name(class) {
            Some(name) => interner.lookup(name).to_owned(),
            None => format!("class#{}", class.raw()),
        }
    }
}
