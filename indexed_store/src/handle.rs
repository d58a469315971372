//! Handles to stored objects.
//!
//! A `Handle` names one object inside one store. Handles are never reused:
//! every insert draws the next sequence number of its store, so a handle that
//! was removed stays invalid forever and a handle minted by another store
//! never matches.
//!
//! # Invariants
//!
//! - Within one store, sequence numbers strictly increase in insertion order.
//! - Ordering handles by `(store_id, sequence)` therefore orders the objects
//!   of one store by insertion time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique store IDs.
static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocate a store ID not used by any other store in this process.
pub(crate) fn next_store_id() -> u64 {
    STORE_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// An opaque, stable reference to a stored object.
///
/// Valid until the object it names is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    store_id: u64,
    sequence: u64,
}

impl Handle {
    pub(crate) const fn new(store_id: u64, sequence: u64) -> Self {
        Self { store_id, sequence }
    }

    /// ID of the store that issued this handle.
    #[must_use]
    pub const fn store_id(&self) -> u64 {
        self.store_id
    }

    /// Position of the object in its store's insertion order.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.store_id, self.sequence)
    }
}
