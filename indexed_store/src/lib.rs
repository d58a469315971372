// Layout of the store:
//  - Primary set: handle -> object, owns every object
//  - Secondary indexes: one per configured property, key -> bucket of handles,
//    plus the key each handle was last filed under
//
// Life of a mutation:
// 1. Stage the new key on every index (extractors run, uniqueness checked)
// 2. If any index refuses, abort the staged keys and report the error
// 3. Otherwise commit: move handles between buckets, drop emptied buckets
//
// Nothing watches stored objects. After changing an indexed property the
// caller asks for a re-index with `update`.

#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code; a panicking index would poison the store.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

mod config;
mod error;
mod handle;
mod index;
mod map;
mod store;

#[cfg(test)]
mod scenario_tests;

pub use config::{ConfigError, StoreConfig};
pub use error::{ConfigurationError, InsertError, StoreError};
pub use handle::Handle;
pub use index::{AnyIndexDefinition, Bucket, IndexDefinition};
pub use map::{IndexKey, KeyMap, MapKind, ParseMapKindError};
pub use store::{IndexedStore, Iter, StoreBuilder};
