//! Session cache
//!
//! Maps keys to the last known state of their entity. A `None` value is a
//! tombstone: the entity is known not to exist, and a lookup answers "absent"
//! without an RPC. Deleting through a context overwrites a cached entry with a
//! tombstone rather than removing it.

use rustc_hash::FxHashMap;
use stratus_core::{Entity, Key};

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Nothing cached for the key
    Unknown,
    /// Tombstoned: the entity is known to be absent
    Absent,
    /// Cached entity
    Present(Entity),
}

impl Lookup {
    /// The cached answer, or `None` when nothing is cached
    pub fn known(self) -> Option<Option<Entity>> {
        match self {
            Lookup::Unknown => None,
            Lookup::Absent => Some(None),
            Lookup::Present(entity) => Some(Some(entity)),
        }
    }
}

/// Key to entity-or-tombstone map
#[derive(Debug, Clone, Default)]
pub struct Cache {
    entries: FxHashMap<Key, Option<Entity>>,
}

impl Cache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`
    pub fn lookup(&self, key: &Key) -> Lookup {
        match self.entries.get(key) {
            None => Lookup::Unknown,
            Some(None) => Lookup::Absent,
            Some(Some(entity)) => Lookup::Present(entity.clone()),
        }
    }

    /// Cache `value` for `key`; `None` stores a tombstone
    pub fn insert(&mut self, key: Key, value: Option<Entity>) {
        self.entries.insert(key, value);
    }

    /// Replace a cached entry with a tombstone. Returns false and leaves the
    /// cache untouched when nothing was cached for `key`.
    pub fn tombstone_if_present(&mut self, key: &Key) -> bool {
        match self.entries.get_mut(key) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    /// Merge `other` into this cache, its entries winning
    pub fn merge(&mut self, other: Cache) {
        self.entries.extend(other.entries);
    }

    /// Number of entries, tombstones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
