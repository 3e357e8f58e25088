use serde::{Deserialize, Serialize};

use crate::error::{VersionError, VersionResult};

/// Settings for building versions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Operation logs longer than this are stored as a separate object.
    pub inline_operations_limit: usize,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            inline_operations_limit: 10,
        }
    }
}

impl VersionConfig {
    pub fn from_toml_str(input: &str) -> VersionResult<Self> {
        toml::from_str(input).map_err(|e| VersionError::Config(e.to_string()))
    }
}
