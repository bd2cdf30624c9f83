//! Sharded string interner for identifier storage.
//!
//! Provides O(1) interning and lookup with thread-safe concurrent access
//! via per-shard locking. The middle end itself is single-threaded, but the
//! interner is shared with the front end and must stay `Sync`.

// Arc is needed here for SharedInterner - the interner is created by the
// front end and shared with every middle-end phase.
use crate::Name;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Member names the lowerer synthesizes calls to.
///
/// Pre-interned at construction so lowering always hits the read-lock fast
/// path when it needs one of these.
pub mod well_known {
    /// Member names the middle end references by convention.
    pub const NAMES: &[&str] = &[
        "initialize",
        "iterator",
        "has_next",
        "next",
        "resume",
        "dispose",
        "call",
        "to_string",
        "to_json",
        "from_json",
        "value",
        "state",
        "main",
        "message",
    ];
}

/// Per-shard storage for interned strings.
struct InternShard {
    /// Map from string content to local index.
    map: FxHashMap<&'static str, u32>,
    /// Storage for string contents.
    strings: Vec<&'static str>,
}

impl InternShard {
    fn new() -> Self {
        Self {
            map: FxHashMap::default(),
            strings: Vec::with_capacity(256),
        }
    }

    fn with_empty() -> Self {
        let mut shard = Self::new();
        // Pre-intern empty string at index 0
        let empty: &'static str = "";
        shard.map.insert(empty, 0);
        shard.strings.push(empty);
        shard
    }
}

/// Sharded string interner for concurrent access.
///
/// Provides O(1) lookup and equality comparison for interned strings.
///
/// # Thread Safety
/// Uses `RwLock` per shard for concurrent read/write access.
/// Can be wrapped in Arc for sharing across threads.
pub struct StringInterner {
    shards: [RwLock<InternShard>; Name::NUM_SHARDS],
    /// Total count of interned strings across all shards (O(1) `len()`).
    total_count: AtomicUsize,
}

impl StringInterner {
    /// Create a new interner with pre-interned well-known member names.
    pub fn new() -> Self {
        let shards = std::array::from_fn(|i| {
            if i == 0 {
                RwLock::new(InternShard::with_empty())
            } else {
                RwLock::new(InternShard::new())
            }
        });

        // Start with 1 for the empty string pre-interned in shard 0
        let interner = Self {
            shards,
            total_count: AtomicUsize::new(1),
        };
        for name in well_known::NAMES {
            interner.intern(name);
        }
        interner
    }

    /// Compute shard for a string based on its hash.
    #[inline]
    fn shard_for(s: &str) -> usize {
        let mut hash = 0u32;
        for byte in s.bytes().take(8) {
            hash = hash.wrapping_mul(31).wrapping_add(u32::from(byte));
        }
        (hash as usize) % Name::NUM_SHARDS
    }

    /// Intern a string, returning its `Name`.
    ///
    /// # Panics
    /// Panics if a shard exceeds `Name::MAX_LOCAL` strings.
    pub fn intern(&self, s: &str) -> Name {
        let shard_idx = Self::shard_for(s);

        // Fast path: read lock, check for existing
        {
            let shard = self.shards[shard_idx].read();
            if let Some(&local) = shard.map.get(s) {
                return Name::new(shard_idx as u32, local);
            }
        }

        // Slow path: write lock, insert
        let mut shard = self.shards[shard_idx].write();
        // Re-check after acquiring write lock (another thread may have won)
        if let Some(&local) = shard.map.get(s) {
            return Name::new(shard_idx as u32, local);
        }

        let local = shard.strings.len();
        assert!(
            local <= Name::MAX_LOCAL as usize,
            "interner shard {shard_idx} exceeded capacity: {local} strings"
        );

        // Leak the string to get a 'static reference. Interned strings
        // live for the whole compilation; there is no un-interning.
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let local = local as u32;
        shard.map.insert(leaked, local);
        shard.strings.push(leaked);
        self.total_count.fetch_add(1, Ordering::Relaxed);

        Name::new(shard_idx as u32, local)
    }

    /// Look up the string for a `Name`.
    ///
    /// # Panics
    /// Panics if the name was not produced by this interner.
    pub fn lookup(&self, name: Name) -> &'static str {
        let shard = self.shards[name.shard()].read();
        shard.strings[name.local()]
    }

    /// Look up a string without interning it.
    pub fn get(&self, s: &str) -> Option<Name> {
        let shard_idx = Self::shard_for(s);
        let shard = self.shards[shard_idx].read();
        shard
            .map
            .get(s)
            .map(|&local| Name::new(shard_idx as u32, local))
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.total_count.load(Ordering::Relaxed)
    }

    /// True if only the empty string is interned.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to a `StringInterner`.
pub type SharedInterner = Arc<StringInterner>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_same_name() {
        let interner = StringInterner::new();
        let a = interner.intern("speak");
        let b = interner.intern("speak");
        assert_eq!(a, b);
    }

    #[test]
    fn lookup_roundtrip() {
        let interner = StringInterner::new();
        let name = interner.intern("Animal");
        assert_eq!(interner.lookup(name), "Animal");
    }

    #[test]
    fn distinct_strings_distinct_names() {
        let interner = StringInterner::new();
        assert_ne!(interner.intern("x"), interner.intern("y"));
    }

    #[test]
    fn well_known_pre_interned() {
        let interner = StringInterner::new();
        let before = interner.len();
        for s in well_known::NAMES {
            let _ = interner.intern(s);
        }
        // Re-interning well-known names must not grow the interner.
        assert_eq!(interner.len(), before);
    }

    #[test]
    fn get_does_not_intern() {
        let interner = StringInterner::new();
        assert_eq!(interner.get("never_seen"), None);
        let name = interner.intern("never_seen");
        assert_eq!(interner.get("never_seen"), Some(name));
    }
}
