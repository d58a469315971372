//! Error types for store construction and store operations.
//!
//! Every error is returned synchronously from the failing call and none are
//! retried internally. Failed inserts and updates never leave partial state
//! behind.

use std::fmt;

use crate::handle::Handle;

/// Error returned when a store is constructed from invalid index definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Two index definitions share a name.
    DuplicateIndexName(String),
    /// No index definitions were given.
    NoIndices,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateIndexName(name) => write!(f, "duplicate index name: {name}"),
            Self::NoIndices => write!(f, "a store needs at least one index"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Error returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An extractor could not produce a key.
    ///
    /// `handle` is `None` when the object was being inserted.
    Extraction {
        index: String,
        handle: Option<Handle>,
    },
    /// The handle does not name an object currently in the store.
    NotFound(Handle),
    /// No index with this name was configured.
    UnknownIndex(String),
    /// The key passed to a query has a different type than the index key.
    KeyType {
        index: String,
        expected: &'static str,
    },
    /// A unique index already holds this key for another object.
    DuplicateKey { index: String, key: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction {
                index,
                handle: Some(handle),
            } => write!(f, "cannot extract key for index '{index}' from object {handle}"),
            Self::Extraction {
                index,
                handle: None,
            } => write!(f, "cannot extract key for index '{index}' from inserted object"),
            Self::NotFound(handle) => write!(f, "object {handle} is not in the store"),
            Self::UnknownIndex(name) => write!(f, "unknown index: {name}"),
            Self::KeyType { index, expected } => {
                write!(f, "index '{index}' is keyed by {expected}")
            }
            Self::DuplicateKey { index, key } => {
                write!(f, "index '{index}' already contains key {key}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// A rejected insert.
///
/// Carries the object back to the caller so it can be fixed and retried.
pub struct InsertError<T> {
    /// The object that was not inserted.
    pub object: T,
    /// Why it was rejected.
    pub error: StoreError,
}

impl<T> InsertError<T> {
    /// Take back the rejected object.
    pub fn into_inner(self) -> T {
        self.object
    }
}

impl<T> fmt::Debug for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsertError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for InsertError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insert rejected: {}", self.error)
    }
}

impl<T> std::error::Error for InsertError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<InsertError<T>> for StoreError {
    fn from(e: InsertError<T>) -> Self {
        e.error
    }
}
