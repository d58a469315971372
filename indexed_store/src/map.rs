//! Pluggable map implementations.
//!
//! The primary set and every secondary index sit on top of the `KeyMap`
//! capability trait rather than a fixed collection type. Two backends ship
//! with the crate and are selectable at runtime through `MapKind`:
//!
//! - `MapKind::Hash`: `std::collections::HashMap`, expected O(1) operations
//! - `MapKind::BTree`: `std::collections::BTreeMap`, O(log n) operations,
//!   iterates in key order
//!
//! Any other map can be plugged into a single index with
//! `IndexDefinition::with_map` as long as it implements `KeyMap`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Bounds a value must satisfy to be used as an index key.
///
/// Keys need both `Hash` and `Ord` so that either built-in backend can be
/// chosen at runtime; `Debug` is used when reporting duplicate keys.
pub trait IndexKey: Hash + Ord + Clone + fmt::Debug + 'static {}

impl<K> IndexKey for K where K: Hash + Ord + Clone + fmt::Debug + 'static {}

/// Minimal capability contract for a map backing the store.
pub trait KeyMap<K, V> {
    /// Insert `value` under `key`, returning the previous value if any.
    fn insert(&mut self, key: K, value: V) -> Option<V>;

    /// Get the value stored under `key`.
    fn get(&self, key: &K) -> Option<&V>;

    /// Get mutable access to the value stored under `key`.
    fn get_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Remove and return the value stored under `key`.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the map has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all entries.
    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_>;

    /// Remove all entries.
    fn clear(&mut self);

    /// Whether `iter` yields entries in ascending key order.
    ///
    /// An unordered primary map makes the store track insertion order in a
    /// separate handle set.
    fn iterates_in_key_order(&self) -> bool {
        false
    }
}

impl<K, V, S> KeyMap<K, V> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        Self::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<&V> {
        Self::get(self, key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        Self::get_mut(self, key)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        Self::remove(self, key)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(Self::iter(self))
    }

    fn clear(&mut self) {
        Self::clear(self);
    }
}

impl<K, V> KeyMap<K, V> for BTreeMap<K, V>
where
    K: Ord,
{
    fn insert(&mut self, key: K, value: V) -> Option<V> {
        Self::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<&V> {
        Self::get(self, key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        Self::get_mut(self, key)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        Self::remove(self, key)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(Self::iter(self))
    }

    fn clear(&mut self) {
        Self::clear(self);
    }

    fn iterates_in_key_order(&self) -> bool {
        true
    }
}

/// Runtime selector for one of the built-in map backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    /// `std::collections::HashMap`.
    #[default]
    #[serde(alias = "hashmap")]
    Hash,
    /// `std::collections::BTreeMap`.
    #[serde(alias = "btreemap")]
    BTree,
}

impl MapKind {
    /// Create an empty map of this kind.
    #[must_use]
    pub fn create<K, V>(self) -> Box<dyn KeyMap<K, V>>
    where
        K: Hash + Ord + 'static,
        V: 'static,
    {
        self.factory()()
    }

    /// Constructor for empty maps of this kind.
    #[must_use]
    pub fn factory<K, V>(self) -> fn() -> Box<dyn KeyMap<K, V>>
    where
        K: Hash + Ord + 'static,
        V: 'static,
    {
        match self {
            Self::Hash => || -> Box<dyn KeyMap<K, V>> { Box::new(HashMap::<K, V>::new()) },
            Self::BTree => || -> Box<dyn KeyMap<K, V>> { Box::new(BTreeMap::<K, V>::new()) },
        }
    }

    /// The lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::BTree => "btree",
        }
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown map kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMapKindError(String);

impl fmt::Display for ParseMapKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown map kind '{}' (expected 'hash' or 'btree')", self.0)
    }
}

impl std::error::Error for ParseMapKindError {}

impl FromStr for MapKind {
    type Err = ParseMapKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" | "hashmap" => Ok(Self::Hash),
            "btree" | "btreemap" => Ok(Self::BTree),
            _ => Err(ParseMapKindError(s.to_string())),
        }
    }
}
