//! Wire types for the cluster REST API.

use serde::Deserialize;

/// One shard's placement, from `_cat/shards`. Unassigned shards have
/// no node.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardPlacement {
    pub index: String,
    #[serde(default)]
    pub node: Option<String>,
}

/// An alias-to-index binding, from `_cat/aliases`.
#[derive(Debug, Clone, Deserialize)]
pub struct AliasBinding {
    pub alias: String,
    pub index: String,
}

/// Index summary, from `_cat/indices`. The cat API reports numeric
/// columns as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexInfo {
    #[serde(rename = "index")]
    pub name: String,
    pub status: String,
    #[serde(rename = "pri")]
    pub primaries: String,
    #[serde(rename = "rep")]
    pub replicas: String,
}

impl IndexInfo {
    pub fn is_open(&self) -> bool {
        self.status == "open"
    }

    /// Name starts with `.`: a system index.
    pub fn is_system(&self) -> bool {
        self.name.starts_with('.')
    }

    pub fn primary_count(&self) -> Option<u32> {
        self.primaries.parse().ok()
    }

    pub fn replica_count(&self) -> Option<u32> {
        self.replicas.parse().ok()
    }
}

/// How the rebalancer picks its index group.
#[derive(Debug, Clone)]
pub enum IndexSelector {
    /// Resolve alias patterns to concrete indices.
    Aliases(Vec<String>),
    /// Match index names with glob patterns; system indices
    /// (`.`-prefixed) only when `include_system`.
    Patterns {
        patterns: Vec<String>,
        include_system: bool,
    },
}
