//! Index definitions and secondary indexes.
//!
//! A secondary index maps an extracted key to the bucket of handles whose
//! objects produced that key. It also remembers, per handle, the key it was
//! last filed under, so removal never has to re-run the extractor against an
//! object that may have changed since.
//!
//! # Two-phase mutation
//!
//! Inserts and updates go through `stage` on every index before any of them
//! is changed. Only when all indexes staged successfully does the store call
//! `commit`; otherwise it calls `abort` and nothing moves. `commit` cannot
//! fail.
//!
//! # Invariants
//!
//! - A bucket that exists is non-empty.
//! - `handle` is in the bucket for `k` iff the recorded key for `handle` is `k`.
//! - A unique index never holds more than one handle per bucket.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::error::StoreError;
use crate::handle::Handle;
use crate::map::{IndexKey, KeyMap, MapKind};

/// The set of handles filed under one key.
///
/// Ordered by handle, which is insertion order.
pub type Bucket = BTreeSet<Handle>;

type Extractor<T, K> = Rc<dyn Fn(&T) -> Option<K>>;

type MapFactory<K> = fn() -> Box<dyn KeyMap<K, Bucket>>;

/// Which map backs an index.
enum MapChoice<K> {
    /// Use the store's default map kind.
    Inherit,
    Kind(MapKind),
    Custom(MapFactory<K>),
}

/// Definition of one index: a name and a way to compute a key from an object.
///
/// ```
/// use indexed_store::{IndexDefinition, MapKind};
///
/// struct User {
///     id: u32,
///     email: Option<String>,
/// }
///
/// let by_id = IndexDefinition::new("id", |u: &User| u.id).unique();
/// let by_email = IndexDefinition::partial("email", |u: &User| u.email.clone())
///     .sparse()
///     .map_kind(MapKind::BTree);
/// assert_eq!(by_id.name(), "id");
/// assert_eq!(by_email.name(), "email");
/// ```
pub struct IndexDefinition<T, K> {
    name: String,
    extractor: Extractor<T, K>,
    unique: bool,
    sparse: bool,
    map: MapChoice<K>,
}

impl<T, K> IndexDefinition<T, K>
where
    T: 'static,
    K: IndexKey,
{
    /// Define an index whose extractor always produces a key.
    pub fn new<F>(name: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&T) -> K + 'static,
    {
        Self::partial(name, move |object: &T| Some(extractor(object)))
    }

    /// Define an index whose extractor may fail to produce a key.
    ///
    /// Returning `None` rejects the insert or update with
    /// `StoreError::Extraction`, unless the index is `sparse`.
    pub fn partial<F>(name: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&T) -> Option<K> + 'static,
    {
        Self {
            name: name.into(),
            extractor: Rc::new(extractor),
            unique: false,
            sparse: false,
            map: MapChoice::Inherit,
        }
    }

    /// Allow at most one object per key.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Leave objects without a key out of this index instead of rejecting them.
    #[must_use]
    pub const fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Back this index with a built-in map kind instead of the store default.
    #[must_use]
    pub fn map_kind(mut self, kind: MapKind) -> Self {
        self.map = MapChoice::Kind(kind);
        self
    }

    /// Back this index with a custom map implementation.
    #[must_use]
    pub fn with_map<M>(mut self) -> Self
    where
        M: KeyMap<K, Bucket> + Default + 'static,
    {
        self.map = MapChoice::Custom(|| -> Box<dyn KeyMap<K, Bucket>> { Box::new(M::default()) });
        self
    }

    /// Name of the index.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn build(self, default_map: MapKind) -> SecondaryIndex<T, K> {
        let (create, backend) = match self.map {
            MapChoice::Inherit => (default_map.factory(), default_map.as_str()),
            MapChoice::Kind(kind) => (kind.factory(), kind.as_str()),
            MapChoice::Custom(create) => (create, "custom"),
        };
        SecondaryIndex {
            name: self.name,
            extractor: self.extractor,
            unique: self.unique,
            sparse: self.sparse,
            backend,
            create,
            buckets: create(),
            recorded: HashMap::new(),
            staged: None,
        }
    }
}

/// An index definition with its key type erased.
///
/// Lets definitions with different key types share one list.
pub struct AnyIndexDefinition<T> {
    name: String,
    build: Box<dyn FnOnce(MapKind) -> Box<dyn ErasedIndex<T>>>,
}

impl<T> AnyIndexDefinition<T> {
    /// Name of the index.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn build(self, default_map: MapKind) -> Box<dyn ErasedIndex<T>> {
        (self.build)(default_map)
    }
}

impl<T, K> From<IndexDefinition<T, K>> for AnyIndexDefinition<T>
where
    T: 'static,
    K: IndexKey,
{
    fn from(definition: IndexDefinition<T, K>) -> Self {
        Self {
            name: definition.name.to_string(),
            build: Box::new(move |default_map: MapKind| -> Box<dyn ErasedIndex<T>> {
                Box::new(definition.build(default_map))
            }),
        }
    }
}

/// Key-type-independent view of a secondary index, as used by the store.
pub(crate) trait ErasedIndex<T> {
    fn name(&self) -> &str;

    fn key_type_name(&self) -> &'static str;

    /// Compute and validate the key for `handle` without changing the index.
    fn stage(&mut self, handle: Handle, object: &T) -> Result<(), StoreError>;

    /// Apply the staged key. A no-op when nothing is staged.
    fn commit(&mut self);

    /// Drop the staged key.
    fn abort(&mut self);

    /// Remove `handle` from the bucket of its recorded key.
    fn remove(&mut self, handle: Handle) -> bool;

    fn clear(&mut self);

    /// Whether `handle` is filed under some key.
    fn contains(&self, handle: Handle) -> bool;

    /// Copy this index for the store `store_id`, rewriting every handle to
    /// belong to that store. Sequence numbers are kept.
    fn copy_for(&self, store_id: u64) -> Box<dyn ErasedIndex<T>>;

    fn as_any(&self) -> &dyn Any;

    /// Handles currently filed in this index.
    #[cfg(test)]
    fn indexed_handles(&self) -> Vec<Handle>;

    /// Describe every broken invariant of this index.
    #[cfg(test)]
    fn violations(&self) -> Vec<String>;
}

struct Staged<K> {
    handle: Handle,
    key: Option<K>,
}

/// A secondary index with a concrete key type.
pub(crate) struct SecondaryIndex<T, K> {
    name: String,
    extractor: Extractor<T, K>,
    unique: bool,
    sparse: bool,
    backend: &'static str,
    create: MapFactory<K>,
    buckets: Box<dyn KeyMap<K, Bucket>>,
    /// Key each handle was last filed under.
    recorded: HashMap<Handle, K>,
    staged: Option<Staged<K>>,
}

impl<T, K> SecondaryIndex<T, K>
where
    K: IndexKey,
{
    pub(crate) fn bucket(&self, key: &K) -> Option<&Bucket> {
        self.buckets.get(key)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &K> {
        self.buckets.iter().map(|(key, _)| key)
    }

    pub(crate) fn buckets(&self) -> impl Iterator<Item = (&K, &Bucket)> {
        self.buckets.iter()
    }

    pub(crate) fn recorded_key(&self, handle: Handle) -> Option<&K> {
        self.recorded.get(&handle)
    }

    fn detach(&mut self, handle: Handle, key: &K) {
        let emptied = self.buckets.get_mut(key).is_some_and(|bucket| {
            bucket.remove(&handle);
            bucket.is_empty()
        });
        if emptied {
            self.buckets.remove(key);
        }
    }

    #[allow(clippy::disallowed_methods)] // Key is held by both the bucket map and the reverse map
    fn attach(&mut self, handle: Handle, key: K) {
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.insert(handle);
        } else {
            self.buckets.insert(key.clone(), BTreeSet::from([handle]));
        }
        self.recorded.insert(handle, key);
    }
}

impl<T, K> ErasedIndex<T> for SecondaryIndex<T, K>
where
    T: 'static,
    K: IndexKey,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn key_type_name(&self) -> &'static str {
        std::any::type_name::<K>()
    }

    fn stage(&mut self, handle: Handle, object: &T) -> Result<(), StoreError> {
        let key = (self.extractor)(object);
        if key.is_none() && !self.sparse {
            return Err(StoreError::Extraction {
                index: self.name.to_string(),
                handle: Some(handle),
            });
        }

        if self.unique {
            if let Some(key) = &key {
                let taken = self
                    .buckets
                    .get(key)
                    .is_some_and(|bucket| bucket.iter().any(|other| *other != handle));
                if taken {
                    return Err(StoreError::DuplicateKey {
                        index: self.name.to_string(),
                        key: format!("{key:?}"),
                    });
                }
            }
        }

        self.staged = Some(Staged { handle, key });
        Ok(())
    }

    fn commit(&mut self) {
        let Some(Staged { handle, key }) = self.staged.take() else {
            return;
        };
        if self.recorded.get(&handle) == key.as_ref() {
            return;
        }

        tracing::trace!(
            "index '{}' ({}): moving {} from {:?} to {:?}",
            self.name,
            self.backend,
            handle,
            self.recorded.get(&handle),
            key
        );

        if let Some(old) = self.recorded.remove(&handle) {
            self.detach(handle, &old);
        }
        if let Some(new) = key {
            self.attach(handle, new);
        }
    }

    fn abort(&mut self) {
        self.staged = None;
    }

    fn remove(&mut self, handle: Handle) -> bool {
        match self.recorded.remove(&handle) {
            Some(key) => {
                self.detach(handle, &key);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.recorded.clear();
        self.staged = None;
    }

    fn contains(&self, handle: Handle) -> bool {
        self.recorded.contains_key(&handle)
    }

    #[allow(clippy::disallowed_methods)] // Keys are copied into the new index; the extractor is shared
    fn copy_for(&self, store_id: u64) -> Box<dyn ErasedIndex<T>> {
        let rebase = |handle: &Handle| Handle::new(store_id, handle.sequence());
        let mut buckets = (self.create)();
        for (key, bucket) in self.buckets.iter() {
            buckets.insert(key.clone(), bucket.iter().map(rebase).collect());
        }
        Box::new(Self {
            name: self.name.to_string(),
            extractor: Rc::clone(&self.extractor),
            unique: self.unique,
            sparse: self.sparse,
            backend: self.backend,
            create: self.create,
            buckets,
            recorded: self
                .recorded
                .iter()
                .map(|(handle, key)| (rebase(handle), key.clone()))
                .collect(),
            staged: None,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    #[cfg(test)]
    fn indexed_handles(&self) -> Vec<Handle> {
        self.recorded.keys().copied().collect()
    }

    #[cfg(test)]
    fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for (key, bucket) in self.buckets.iter() {
            if bucket.is_empty() {
                violations.push(format!("index '{}': empty bucket for {key:?}", self.name));
            }
            if self.unique && bucket.len() > 1 {
                violations.push(format!(
                    "index '{}': unique key {key:?} held by {} objects",
                    self.name,
                    bucket.len()
                ));
            }
            for handle in bucket {
                if self.recorded.get(handle) != Some(key) {
                    violations.push(format!(
                        "index '{}': {handle} filed under {key:?} but recorded as {:?}",
                        self.name,
                        self.recorded.get(handle)
                    ));
                }
            }
        }
        for (handle, key) in &self.recorded {
            if !self.buckets.get(key).is_some_and(|b| b.contains(handle)) {
                violations.push(format!(
                    "index '{}': {handle} recorded as {key:?} but missing from bucket",
                    self.name
                ));
            }
        }
        if self.staged.is_some() {
            violations.push(format!("index '{}': staged key left behind", self.name));
        }
        violations
    }
}
