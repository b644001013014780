//! Repository configuration.
//!
//! ```json
//! { "related_items_max": 20, "related_items_max_depth": 5,
//!   "repoint_policy": "unmoved_or_moved_ends", "index_on_write": true }
//! ```
//!
//! Every key is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::auth::RepointPolicy;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Max entities re-indexed after one change.
    pub related_items_max: usize,
    /// Max hops when walking entities that inherit virtual metadata.
    pub related_items_max_depth: usize,
    pub repoint_policy: RepointPolicy,
    /// Notify the index sink after each committed write.
    pub index_on_write: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            related_items_max: 20,
            related_items_max_depth: 5,
            repoint_policy: RepointPolicy::default(),
            index_on_write: true,
        }
    }
}

impl RepositoryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
