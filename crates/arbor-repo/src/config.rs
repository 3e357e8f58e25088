use arbor_store::GraphConfig;
use arbor_version::VersionConfig;
use serde::{Deserialize, Serialize};

use crate::error::{RepoError, RepoResult};

/// Settings of a [`crate::Repository`].
///
/// ```toml
/// tree_id = "models"
/// uses_role_ids = false
///
/// [graph]
/// batch_size = 1000
///
/// [version]
/// inline_operations_limit = 20
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Id of the tree every version of the repository holds.
    pub tree_id: String,
    /// Whether node records name roles by id rather than by name.
    pub uses_role_ids: bool,
    pub graph: GraphConfig,
    pub version: VersionConfig,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            tree_id: "default".into(),
            uses_role_ids: true,
            graph: GraphConfig::default(),
            version: VersionConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Parse from TOML; missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> RepoResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| RepoError::Config(e.to_string()))?;
        if config.tree_id.is_empty() {
            return Err(RepoError::Config("tree_id must not be empty".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = RepositoryConfig::default();
        assert_eq!(c.tree_id, "default");
        assert!(c.uses_role_ids);
        assert_eq!(c.graph, GraphConfig::default());
        assert_eq!(c.version.inline_operations_limit, 10);
    }

    #[test]
    fn nested_tables() {
        let c = RepositoryConfig::from_toml_str(
            r#"
            tree_id = "models"
            uses_role_ids = false

            [graph]
            batch_size = 1000

            [version]
            inline_operations_limit = 20
            "#,
        )
        .unwrap();
        assert_eq!(c.tree_id, "models");
        assert!(!c.uses_role_ids);
        assert_eq!(c.graph.batch_size, 1000);
        assert_eq!(c.graph.cache_capacity, 100_000);
        assert_eq!(c.version.inline_operations_limit, 20);
    }

    #[test]
    fn rejects_bad_input() {
        for input in ["tree_id = 3", "tree_id = \"\""] {
            assert!(matches!(RepositoryConfig::from_toml_str(input), Err(RepoError::Config(_))));
        }
    }
}
