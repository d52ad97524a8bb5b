//! Shard rebalancing — keep replica counts matched to node count.
//!
//! A periodic maintenance action, independent of the scale-down path:
//! resolve an index group, count the nodes actually hosting its
//! shards, and set every index's replica count so the group's copies
//! cover those nodes without idling any of them.

use regex::Regex;
use tracing::{debug, info, warn};

use crate::ClusterError;
use crate::client::ClusterOps;
use crate::types::{IndexInfo, IndexSelector};

/// Summary of one rebalance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceOutcome {
    /// Indices in the resolved group.
    pub resolved: usize,
    /// Distinct nodes hosting any shard of the group.
    pub node_count: u32,
    /// Sum of primary shards across the group.
    pub total_primaries: u32,
    /// Replica count the group was driven towards.
    pub desired: u32,
    /// Indices whose replica count was changed.
    pub modified: usize,
}

/// Replica count such that `total_primaries * (1 + replicas)` covers
/// `node_count`, clamped to `[min, max]`; `max == 0` means uncapped.
/// Degenerate inputs return `min` directly.
pub fn desired_replicas(node_count: u32, total_primaries: u32, min: u32, max: u32) -> u32 {
    if total_primaries == 0 || node_count == 0 {
        return min;
    }
    let desired = node_count.div_ceil(total_primaries).saturating_sub(1);
    let desired = desired.max(min);
    if max > 0 { desired.min(max) } else { desired }
}

/// Configured rebalance action. Borrowing the cluster per call keeps
/// the rebalancer free of connection state.
pub struct ShardRebalancer {
    selector: IndexSelector,
    min_replicas: u32,
    /// `0` = uncapped.
    max_replicas: u32,
    dry_run: bool,
}

impl ShardRebalancer {
    pub fn new(selector: IndexSelector, min_replicas: u32, max_replicas: u32, dry_run: bool) -> Self {
        Self {
            selector,
            min_replicas,
            max_replicas,
            dry_run,
        }
    }

    /// Run one rebalance pass. Per-index update failures are logged
    /// and skipped; they do not abort the remaining updates.
    pub async fn run<C: ClusterOps + Sync>(
        &self,
        cluster: &C,
    ) -> Result<RebalanceOutcome, ClusterError> {
        let indices = self.resolve(cluster).await?;
        if indices.is_empty() {
            debug!("rebalance selector resolved no open indices");
            return Ok(RebalanceOutcome {
                resolved: 0,
                node_count: 0,
                total_primaries: 0,
                desired: self.min_replicas,
                modified: 0,
            });
        }

        let names: Vec<String> = indices.iter().map(|i| i.name.clone()).collect();

        // Scope the node count to nodes hosting this group's shards,
        // not the whole cluster.
        let placements = cluster.list_shard_placements(&names).await?;
        let mut nodes: Vec<&str> = placements
            .iter()
            .filter_map(|p| p.node.as_deref())
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        let node_count = nodes.len() as u32;

        let mut total_primaries = 0u32;
        for index in &indices {
            match index.primary_count() {
                Some(n) => total_primaries += n,
                None => warn!(index = %index.name, raw = %index.primaries, "unparseable primary count, skipping"),
            }
        }

        let desired = desired_replicas(
            node_count,
            total_primaries,
            self.min_replicas,
            self.max_replicas,
        );
        info!(
            indices = indices.len(),
            total_primaries, node_count, desired, "rebalance pass computed"
        );

        let mut modified = 0;
        for index in &indices {
            let current = match index.replica_count() {
                Some(n) => n,
                None => {
                    warn!(index = %index.name, raw = %index.replicas, "unparseable replica count, skipping");
                    continue;
                }
            };
            if current == desired {
                continue;
            }
            info!(index = %index.name, from = current, to = desired, "adjusting replica count");
            if self.dry_run {
                modified += 1;
                continue;
            }
            match cluster.set_index_replicas(&index.name, desired).await {
                Ok(()) => modified += 1,
                Err(e) => warn!(index = %index.name, error = %e, "replica update failed, skipping"),
            }
        }

        Ok(RebalanceOutcome {
            resolved: indices.len(),
            node_count,
            total_primaries,
            desired,
            modified,
        })
    }

    /// Resolve the selector to open indices. Closed indices are
    /// excluded in every mode.
    async fn resolve<C: ClusterOps + Sync>(
        &self,
        cluster: &C,
    ) -> Result<Vec<IndexInfo>, ClusterError> {
        let infos = match &self.selector {
            IndexSelector::Aliases(patterns) => {
                let bindings = cluster.resolve_aliases(patterns).await?;
                let mut names: Vec<String> =
                    bindings.into_iter().map(|b| b.index).collect();
                names.sort_unstable();
                names.dedup();
                if names.is_empty() {
                    return Ok(Vec::new());
                }
                cluster.get_index_info(&names).await?
            }
            IndexSelector::Patterns {
                patterns,
                include_system,
            } => {
                let candidates = cluster.get_index_info(patterns).await?;
                let matchers = patterns
                    .iter()
                    .map(|p| glob_to_regex(p))
                    .collect::<Result<Vec<_>, _>>()?;
                candidates
                    .into_iter()
                    .filter(|info| matchers.iter().any(|m| m.is_match(&info.name)))
                    .filter(|info| *include_system || !info.is_system())
                    .collect()
            }
        };
        Ok(infos.into_iter().filter(IndexInfo::is_open).collect())
    }
}

/// Compile an index name glob (`*` wildcard only) to an anchored
/// regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, ClusterError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| ClusterError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}
