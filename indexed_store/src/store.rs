//! The multi-index store.
//!
//! `IndexedStore` owns every stored object in its primary set and keeps one
//! secondary index per configured property. Secondary indexes only hold
//! handles into the primary set, never copies of objects.
//!
//! # Consistency
//!
//! The store never looks at an object on its own. When an object changes
//! after insertion (through `get_mut`, interior mutability, or shared
//! ownership such as `Rc<RefCell<_>>`), its index entries stay where they were
//! until the caller calls `update` or `modify`. Removal always uses the keys
//! last recorded by the store.
//!
//! # Atomicity
//!
//! `insert`, `insert_all` and `update` validate every extractor before any
//! structure is touched. A failed call leaves the store exactly as it was.
//!
//! # Copies
//!
//! `Clone` copies the primary set and every index into a store with a new
//! store ID. Objects keep their sequence numbers, so `counterpart` maps a
//! handle of one store onto the same object in the other. Cloning a store of
//! `Rc<RefCell<_>>` objects shares them between both stores.
//!
//! # Concurrency
//!
//! The store is a plain single-threaded data structure. Sharing one store
//! between threads requires external locking around every call.

use std::any::type_name;
use std::collections::{BTreeSet, btree_set};

use crate::config::StoreConfig;
use crate::error::{ConfigurationError, InsertError, StoreError};
use crate::handle::{Handle, next_store_id};
use crate::index::{AnyIndexDefinition, Bucket, ErasedIndex, IndexDefinition, SecondaryIndex};
use crate::map::{IndexKey, KeyMap};

/// An in-memory collection of objects indexed by several properties.
///
/// ```
/// use indexed_store::{IndexDefinition, IndexedStore};
///
/// struct User {
///     id: u32,
///     category: &'static str,
/// }
///
/// let mut store = IndexedStore::builder()
///     .index(IndexDefinition::new("id", |u: &User| u.id).unique())
///     .index(IndexDefinition::new("category", |u: &User| u.category))
///     .build()?;
///
/// let first = store.insert(User { id: 1, category: "a" })?;
/// store.insert(User { id: 2, category: "a" })?;
/// assert_eq!(store.lookup("category", &"a")?.len(), 2);
///
/// store.modify(first, |u| u.category = "b")?;
/// assert_eq!(store.lookup("category", &"a")?.len(), 1);
/// assert_eq!(store.find("category", &"b")?.map(|(h, _)| h), Some(first));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct IndexedStore<T> {
    store_id: u64,
    next_sequence: u64,
    config: StoreConfig,
    primary: Box<dyn KeyMap<Handle, T>>,
    /// Live handles, kept only when the primary map is unordered.
    order: Option<BTreeSet<Handle>>,
    indexes: Vec<Box<dyn ErasedIndex<T>>>,
}

/// Builder for `IndexedStore`.
pub struct StoreBuilder<T> {
    config: StoreConfig,
    definitions: Vec<AnyIndexDefinition<T>>,
}

impl<T: 'static> StoreBuilder<T> {
    /// Add an index. Indexes keep their declaration order.
    #[must_use]
    pub fn index<K: IndexKey>(mut self, definition: IndexDefinition<T, K>) -> Self {
        self.definitions.push(definition.into());
        self
    }

    /// Use `config` for map kinds.
    #[must_use]
    pub const fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if no index was added or two indexes share a name.
    pub fn build(self) -> Result<IndexedStore<T>, ConfigurationError> {
        IndexedStore::with_config(self.definitions, self.config)
    }
}

impl<T: 'static> IndexedStore<T> {
    /// Start building a store with the default configuration.
    #[must_use]
    pub fn builder() -> StoreBuilder<T> {
        StoreBuilder {
            config: StoreConfig::default(),
            definitions: Vec::new(),
        }
    }

    /// Create an empty store from an ordered list of index definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if `definitions` is empty or contains a duplicate name.
    pub fn new<I>(definitions: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = AnyIndexDefinition<T>>,
    {
        Self::with_config(definitions, StoreConfig::default())
    }

    /// Create an empty store with explicit map configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `definitions` is empty or contains a duplicate name.
    pub fn with_config<I>(definitions: I, config: StoreConfig) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = AnyIndexDefinition<T>>,
    {
        let definitions: Vec<_> = definitions.into_iter().collect();
        if definitions.is_empty() {
            return Err(ConfigurationError::NoIndices);
        }
        for (position, definition) in definitions.iter().enumerate() {
            if definitions[..position]
                .iter()
                .any(|earlier| earlier.name() == definition.name())
            {
                return Err(ConfigurationError::DuplicateIndexName(
                    definition.name().to_string(),
                ));
            }
        }

        let indexes: Vec<_> = definitions
            .into_iter()
            .map(|definition| definition.build(config.default_map))
            .collect();
        let store_id = next_store_id();

        tracing::debug!(
            "created store {} with indexes [{}] (default map: {}, primary map: {})",
            store_id,
            indexes
                .iter()
                .map(|index| index.name())
                .collect::<Vec<_>>()
                .join(", "),
            config.default_map,
            config.primary_map
        );

        let primary = config.primary_map.create();
        let order = (!primary.iterates_in_key_order()).then(BTreeSet::new);
        Ok(Self {
            store_id,
            next_sequence: 0,
            config,
            primary,
            order,
            indexes,
        })
    }

    /// The configuration the store was built with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Names of the configured indexes, in declaration order.
    pub fn index_names(&self) -> impl Iterator<Item = &str> {
        self.indexes.iter().map(|index| index.name())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Whether `handle` names an object currently in the store.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.primary.get(&handle).is_some()
    }

    /// Get the object named by `handle`.
    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.primary.get(&handle)
    }

    /// Get mutable access to the object named by `handle`.
    ///
    /// Changing an indexed property through this reference does not move the
    /// object between buckets; call `update` afterwards.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.primary.get_mut(&handle)
    }

    /// Insert `object` under every configured index.
    ///
    /// # Errors
    ///
    /// Returns the object together with `StoreError::Extraction` if an
    /// extractor produced no key, or `StoreError::DuplicateKey` if a unique
    /// index already holds the key. The store is unchanged in both cases.
    pub fn insert(&mut self, object: T) -> Result<Handle, InsertError<T>> {
        let handle = Handle::new(self.store_id, self.next_sequence);
        if let Err(error) = self.stage_all(handle, &object) {
            let error = match error {
                StoreError::Extraction { index, .. } => StoreError::Extraction {
                    index,
                    handle: None,
                },
                other => other,
            };
            tracing::warn!("store {}: rejected insert: {}", self.store_id, error);
            return Err(InsertError { object, error });
        }

        self.next_sequence += 1;
        self.commit_all();
        self.primary.insert(handle, object);
        if let Some(order) = &mut self.order {
            order.insert(handle);
        }
        tracing::debug!("store {}: inserted {}", self.store_id, handle);
        Ok(handle)
    }

    /// Insert every object of `objects`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first insert error. Objects of the batch inserted before
    /// the failure are removed again and dropped, along with the rest of the
    /// batch.
    pub fn insert_all<I>(&mut self, objects: I) -> Result<Vec<Handle>, StoreError>
    where
        I: IntoIterator<Item = T>,
    {
        let mut handles = Vec::new();
        for object in objects {
            match self.insert(object) {
                Ok(handle) => handles.push(handle),
                Err(rejected) => {
                    for handle in handles {
                        self.discard(handle);
                    }
                    return Err(rejected.into());
                }
            }
        }
        Ok(handles)
    }

    /// Remove the object named by `handle` and return it.
    ///
    /// Index entries are removed under the keys last recorded for the object,
    /// not keys recomputed from its current state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the handle is not in the store.
    pub fn remove(&mut self, handle: Handle) -> Result<T, StoreError> {
        let object = self
            .primary
            .remove(&handle)
            .ok_or(StoreError::NotFound(handle))?;
        if let Some(order) = &mut self.order {
            order.remove(&handle);
        }
        for index in &mut self.indexes {
            index.remove(handle);
        }
        tracing::debug!("store {}: removed {}", self.store_id, handle);
        Ok(object)
    }

    /// Remove the object named by `handle` if it is present.
    pub fn discard(&mut self, handle: Handle) -> Option<T> {
        self.remove(handle).ok()
    }

    /// Re-index the object named by `handle` from its current state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown handle, and
    /// `StoreError::Extraction` or `StoreError::DuplicateKey` if the new keys
    /// are invalid. On error every index keeps its previous entry.
    pub fn update(&mut self, handle: Handle) -> Result<(), StoreError> {
        let object = self
            .primary
            .get(&handle)
            .ok_or(StoreError::NotFound(handle))?;

        if let Err(error) = stage_into(&mut self.indexes, handle, object) {
            tracing::warn!("store {}: rejected update of {}: {}", self.store_id, handle, error);
            return Err(error);
        }
        self.commit_all();
        tracing::debug!("store {}: updated {}", self.store_id, handle);
        Ok(())
    }

    /// Apply `f` to the object named by `handle`, then re-index it.
    ///
    /// # Errors
    ///
    /// Same as `update`. If re-indexing fails the change made by `f` stays on
    /// the object but its index entries keep their previous keys.
    pub fn modify<R>(&mut self, handle: Handle, f: impl FnOnce(&mut T) -> R) -> Result<R, StoreError> {
        let object = self
            .primary
            .get_mut(&handle)
            .ok_or(StoreError::NotFound(handle))?;
        let result = f(object);
        self.update(handle)?;
        Ok(result)
    }

    /// Remove every object. Index definitions are kept.
    pub fn clear(&mut self) {
        self.primary.clear();
        if let Some(order) = &mut self.order {
            order.clear();
        }
        for index in &mut self.indexes {
            index.clear();
        }
        tracing::debug!("store {}: cleared", self.store_id);
    }

    /// Objects recorded under `key` in the named index, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownIndex` if no index has this name, and
    /// `StoreError::KeyType` if the index uses a different key type.
    pub fn lookup<K: IndexKey>(&self, index: &str, key: &K) -> Result<Vec<(Handle, &T)>, StoreError> {
        let index = self.typed_index::<K>(index)?;
        Ok(index.bucket(key).map(|bucket| self.resolve(bucket)).unwrap_or_default())
    }

    /// First object recorded under `key` in the named index.
    ///
    /// Mostly useful with unique indexes.
    ///
    /// # Errors
    ///
    /// Same as `lookup`.
    pub fn find<K: IndexKey>(&self, index: &str, key: &K) -> Result<Option<(Handle, &T)>, StoreError> {
        let index = self.typed_index::<K>(index)?;
        Ok(index
            .bucket(key)
            .and_then(|bucket| bucket.first())
            .and_then(|handle| self.primary.get(handle).map(|object| (*handle, object))))
    }

    /// Whether any object is recorded under `key` in the named index.
    ///
    /// # Errors
    ///
    /// Same as `lookup`.
    pub fn contains_key<K: IndexKey>(&self, index: &str, key: &K) -> Result<bool, StoreError> {
        Ok(self.typed_index::<K>(index)?.bucket(key).is_some())
    }

    /// All keys of the named index. Order depends on the index's map kind.
    ///
    /// # Errors
    ///
    /// Same as `lookup`.
    pub fn keys<K: IndexKey>(&self, index: &str) -> Result<Vec<&K>, StoreError> {
        Ok(self.typed_index::<K>(index)?.keys().collect())
    }

    /// Every key of the named index with the objects filed under it.
    ///
    /// Keys come in the order of the index's map kind; the objects of one key
    /// in insertion order. Objects a sparse index left out do not appear.
    ///
    /// # Errors
    ///
    /// Same as `lookup`.
    pub fn entries<K: IndexKey>(&self, index: &str) -> Result<Vec<(&K, Vec<(Handle, &T)>)>, StoreError> {
        let index = self.typed_index::<K>(index)?;
        Ok(index
            .buckets()
            .map(|(key, bucket)| (key, self.resolve(bucket)))
            .collect())
    }

    /// Objects filed under some key of the named index, in insertion order.
    ///
    /// Differs from `iter` only for sparse indexes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownIndex` if no index has this name.
    pub fn values(&self, index: &str) -> Result<impl Iterator<Item = (Handle, &T)>, StoreError> {
        let index = self.erased_index(index)?;
        Ok(self.iter().filter(move |(handle, _)| index.contains(*handle)))
    }

    /// The key the named index last recorded for `handle`.
    ///
    /// `None` when a sparse index left the object out.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` for an unknown handle, otherwise same as
    /// `lookup`.
    pub fn recorded_key<K: IndexKey>(&self, index: &str, handle: Handle) -> Result<Option<&K>, StoreError> {
        let index = self.typed_index::<K>(index)?;
        if !self.contains(handle) {
            return Err(StoreError::NotFound(handle));
        }
        Ok(index.recorded_key(handle))
    }

    /// Iterate over all stored objects in insertion order.
    ///
    /// Each call starts from the current contents. The borrow checker rules
    /// out mutating the store while an iteration is alive.
    pub fn iter(&self) -> Iter<'_, T> {
        let inner = self.order.as_ref().map_or_else(
            || IterInner::Ordered(self.primary.iter()),
            |order| IterInner::Tracked {
                handles: order.iter(),
                primary: &*self.primary,
            },
        );
        Iter { inner }
    }

    /// The handle of this store for the object that `handle` names in a copy
    /// of this store, or in the store this one was copied from.
    ///
    /// Only sequence numbers are compared, so the result is meaningless for
    /// handles of unrelated stores.
    #[must_use]
    pub fn counterpart(&self, handle: Handle) -> Option<Handle> {
        let local = Handle::new(self.store_id, handle.sequence());
        self.contains(local).then_some(local)
    }

    fn resolve(&self, bucket: &Bucket) -> Vec<(Handle, &T)> {
        bucket
            .iter()
            .filter_map(|handle| self.primary.get(handle).map(|object| (*handle, object)))
            .collect()
    }

    fn erased_index(&self, name: &str) -> Result<&dyn ErasedIndex<T>, StoreError> {
        self.indexes
            .iter()
            .find(|index| index.name() == name)
            .map(|index| &**index)
            .ok_or_else(|| StoreError::UnknownIndex(name.to_string()))
    }

    fn typed_index<K: IndexKey>(&self, name: &str) -> Result<&SecondaryIndex<T, K>, StoreError> {
        let index = self.erased_index(name)?;
        index
            .as_any()
            .downcast_ref::<SecondaryIndex<T, K>>()
            .ok_or_else(|| StoreError::KeyType {
                index: name.to_string(),
                expected: index.key_type_name(),
            })
    }

    fn stage_all(&mut self, handle: Handle, object: &T) -> Result<(), StoreError> {
        stage_into(&mut self.indexes, handle, object)
    }

    fn commit_all(&mut self) {
        for index in &mut self.indexes {
            index.commit();
        }
    }

    #[cfg(test)]
    pub(crate) fn erased_indexes(&self) -> &[Box<dyn ErasedIndex<T>>] {
        &self.indexes
    }
}

/// Stage `handle` on every index; abort all of them on the first failure.
fn stage_into<T>(
    indexes: &mut [Box<dyn ErasedIndex<T>>],
    handle: Handle,
    object: &T,
) -> Result<(), StoreError> {
    let mut staged = 0;
    let result: Result<(), StoreError> = indexes.iter_mut().try_for_each(|index| {
        index.stage(handle, object)?;
        staged += 1;
        Ok(())
    });
    if result.is_err() {
        for index in &mut indexes[..staged] {
            index.abort();
        }
    }
    result
}

impl<T: Clone + 'static> Clone for IndexedStore<T> {
    /// Copy the store under a new store ID.
    ///
    /// Objects are cloned with `T::clone`; indexes share their extractors
    /// with the original.
    #[allow(clippy::disallowed_methods)] // Each store owns its own copy of every object
    fn clone(&self) -> Self {
        let store_id = next_store_id();
        let rebase = |handle: Handle| Handle::new(store_id, handle.sequence());

        let mut primary = self.config.primary_map.create();
        for (handle, object) in self.primary.iter() {
            primary.insert(rebase(*handle), object.clone());
        }
        let order = self
            .order
            .as_ref()
            .map(|order| order.iter().copied().map(rebase).collect());
        let indexes = self
            .indexes
            .iter()
            .map(|index| index.copy_for(store_id))
            .collect();

        tracing::debug!(
            "store {}: copied {} objects into store {}",
            self.store_id,
            primary.len(),
            store_id
        );

        Self {
            store_id,
            next_sequence: self.next_sequence,
            config: self.config,
            primary,
            order,
            indexes,
        }
    }
}

impl<T: 'static> std::fmt::Debug for IndexedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedStore")
            .field("store_id", &self.store_id)
            .field("len", &self.len())
            .field("indexes", &self.index_names().collect::<Vec<_>>())
            .field("object_type", &type_name::<T>())
            .finish()
    }
}

/// Iterator over the objects of a store, in insertion order.
pub struct Iter<'a, T> {
    inner: IterInner<'a, T>,
}

enum IterInner<'a, T> {
    /// The primary map itself iterates in handle order.
    Ordered(Box<dyn Iterator<Item = (&'a Handle, &'a T)> + 'a>),
    /// Walk the tracked handles and fetch each object from the primary map.
    Tracked {
        handles: btree_set::Iter<'a, Handle>,
        primary: &'a dyn KeyMap<Handle, T>,
    },
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Handle, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Ordered(entries) => entries.next().map(|(handle, object)| (*handle, object)),
            IterInner::Tracked { handles, primary } => {
                let primary = *primary;
                handles.find_map(|handle| primary.get(handle).map(|object| (*handle, object)))
            }
        }
    }
}

impl<'a, T: 'static> IntoIterator for &'a IndexedStore<T> {
    type Item = (Handle, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
