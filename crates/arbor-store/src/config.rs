use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Tuning of an [`crate::ObjectGraph`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Maximum number of hashes per `read_batch` / `write_batch` call.
    pub batch_size: usize,
    /// Maximum number of deserialized objects kept in the arena.
    pub cache_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            batch_size: 5_000,
            cache_capacity: 100_000,
        }
    }
}

impl GraphConfig {
    /// Parse from TOML; missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> StoreResult<Self> {
        toml::from_str(input).map_err(|e| StoreError::Config(e.to_string()))
    }
}
