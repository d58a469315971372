//! Store configuration.
//!
//! Chooses the map backends a store is built on. Configuration can be built
//! in code, deserialized with serde, or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `INDEXED_STORE_DEFAULT_MAP`: map kind for indexes without an override (default: `hash`)
//! - `INDEXED_STORE_PRIMARY_MAP`: map kind for the primary set (default: `hash`)
//!
//! # Invariants
//!
//! - Both fields always name a built-in `MapKind`.
//! - Per-index overrides in `IndexDefinition` take precedence over `default_map`.

use serde::{Deserialize, Serialize};

use crate::map::MapKind;

/// Store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Map kind for every index that does not choose its own.
    pub default_map: MapKind,
    /// Map kind for the primary set.
    ///
    /// `Hash` gives constant-time handle lookups but keeps an extra ordered
    /// set of handles for iteration; `BTree` iterates in insertion order
    /// on its own.
    pub primary_map: MapKind,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Environment variable for `default_map`.
    pub const DEFAULT_MAP_VAR: &'static str = "INDEXED_STORE_DEFAULT_MAP";
    /// Environment variable for `primary_map`.
    pub const PRIMARY_MAP_VAR: &'static str = "INDEXED_STORE_PRIMARY_MAP";

    /// Set the default index map kind.
    #[must_use]
    pub const fn with_default_map(mut self, kind: MapKind) -> Self {
        self.default_map = kind;
        self
    }

    /// Set the primary set map kind.
    #[must_use]
    pub const fn with_primary_map(mut self, kind: MapKind) -> Self {
        self.primary_map = kind;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to something other than a map kind.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let load = |name: &str| match lookup(name) {
            Some(value) => value.parse::<MapKind>().map_err(|e| ConfigError::InvalidValue {
                name: name.to_string(),
                message: e.to_string(),
            }),
            None => Ok(MapKind::default()),
        };

        Ok(Self {
            default_map: load(Self::DEFAULT_MAP_VAR)?,
            primary_map: load(Self::PRIMARY_MAP_VAR)?,
        })
    }
}
