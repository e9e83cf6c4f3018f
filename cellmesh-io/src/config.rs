//! Tunable storage parameters (`chunk_size`, `value_chunk_size`, chunk cache
//! size), loadable from TOML the way `oxidized` loads its editor config and
//! `butterfly-plan` loads its planner config.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Chunk dimension for index/pointer datasets.
    pub chunk_size: usize,
    /// Chunk dimension for value datasets.
    pub value_chunk_size: usize,
    /// Chunk cache size in bytes.
    pub chunk_cache_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            value_chunk_size: 4000,
            chunk_cache_bytes: 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> cellmesh_common::Result<Self> {
        toml::from_str(s)
            .map_err(|e| cellmesh_common::Error::BadSchema(format!("invalid store config: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> cellmesh_common::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
