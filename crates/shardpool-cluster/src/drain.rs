//! Node drain state machine.
//!
//! To remove a node safely, the coordinator excludes it from shard
//! allocation, waits for the cluster to evacuate every shard it
//! hosts, and only then reports success. The wait runs against a
//! bounded deadline; on expiry the exclusion is rolled back so the
//! node stays usable. Node identity checks use exact name equality
//! on the shard placement's node field — substring collisions between
//! node names must not produce false matches.
//!
//! State is per attempt and never persisted: a process crash
//! mid-drain can leave a stale exclusion entry behind for operators
//! to reconcile.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ClusterError;
use crate::client::ClusterOps;

/// Errors from a drain or undrain attempt.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("timeout draining node {node}: still holding shards after {elapsed:?}")]
    Timeout { node: String, elapsed: Duration },

    #[error("timeout waiting for node {node} to rejoin after {elapsed:?}")]
    RejoinTimeout { node: String, elapsed: Duration },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Phase of an in-flight drain or undrain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Excluding,
    WaitingForEvacuation,
    Evacuated,
    TimedOut,
    Reverting,
    WaitingForRejoin,
    Rejoined,
    Failed,
}

/// Timing knobs for drain attempts.
#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    /// Delay between shard placement polls.
    pub poll_interval: Duration,
    /// Deadline for the evacuation as a whole. Independent of (and
    /// typically much longer than) a single poll's HTTP timeout.
    pub drain_timeout: Duration,
    /// Deadline for a node to reappear after an undrain.
    pub rejoin_timeout: Duration,
    /// Skip exclusion writes, log what would have happened. The
    /// evacuation wait is skipped too: the cluster was never told to
    /// move anything, so waiting could only time out.
    pub dry_run: bool,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(600),
            rejoin_timeout: Duration::from_secs(300),
            dry_run: false,
        }
    }
}

/// Drives one node's drain (or undrain) against the cluster.
///
/// The controller constructs one coordinator per removal attempt and
/// discards it afterwards.
pub struct DrainCoordinator<'a, C> {
    cluster: &'a C,
    options: DrainOptions,
    state: DrainState,
}

impl<'a, C: ClusterOps + Sync> DrainCoordinator<'a, C> {
    pub fn new(cluster: &'a C, options: DrainOptions) -> Self {
        Self {
            cluster,
            options,
            state: DrainState::Excluding,
        }
    }

    /// Phase of the current attempt.
    pub fn state(&self) -> DrainState {
        self.state
    }

    /// Exclude `node` from allocation and wait until it hosts no
    /// shards. On success the exclusion entry is removed again and
    /// the node is safe to delete. On deadline expiry the exclusion
    /// is rolled back and the caller must not delete the instance.
    pub async fn drain(&mut self, node: &str) -> Result<(), DrainError> {
        self.state = DrainState::Excluding;
        let added = add_exclusion(self.cluster, node, self.options.dry_run).await?;
        if !added {
            info!(node, "node already excluded from allocation");
        }

        if self.options.dry_run {
            info!(node, "dry-run: skipping evacuation wait");
            self.state = DrainState::Evacuated;
            return Ok(());
        }

        self.state = DrainState::WaitingForEvacuation;
        let started = Instant::now();
        let deadline = started + self.options.drain_timeout;

        loop {
            if Instant::now() >= deadline {
                self.state = DrainState::TimedOut;
                let elapsed = started.elapsed();
                warn!(node, ?elapsed, "drain deadline elapsed, rolling back exclusion");
                // Best-effort rollback so the node remains usable.
                if let Err(e) = clear_exclusion(self.cluster, node, false).await {
                    warn!(node, error = %e, "failed to roll back exclusion after drain timeout");
                }
                return Err(DrainError::Timeout {
                    node: node.to_string(),
                    elapsed,
                });
            }

            match self.cluster.list_shard_placements(&[]).await {
                Ok(placements) => {
                    let still_hosting = placements
                        .iter()
                        .any(|p| p.node.as_deref() == Some(node));
                    if !still_hosting {
                        info!(node, "node holds no shards, evacuation complete");
                        self.state = DrainState::Evacuated;
                        clear_exclusion(self.cluster, node, false).await?;
                        return Ok(());
                    }
                    debug!(node, "node still hosts shards");
                }
                // Poll errors inside the window are tolerated; the
                // deadline is the only cancellation signal.
                Err(e) => warn!(node, error = %e, "shard placement poll failed, will retry"),
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Reverse an exclusion and wait for the node to show up in the
    /// cluster membership again. Only meaningful while the backing
    /// instance still exists — the controller uses this when the
    /// provider delete failed after a successful drain.
    pub async fn undrain(&mut self, node: &str) -> Result<(), DrainError> {
        self.state = DrainState::Reverting;
        clear_exclusion(self.cluster, node, self.options.dry_run).await?;

        if self.options.dry_run {
            info!(node, "dry-run: skipping rejoin wait");
            self.state = DrainState::Rejoined;
            return Ok(());
        }

        self.state = DrainState::WaitingForRejoin;
        let started = Instant::now();
        let deadline = started + self.options.rejoin_timeout;

        loop {
            if Instant::now() >= deadline {
                self.state = DrainState::Failed;
                let elapsed = started.elapsed();
                warn!(node, ?elapsed, "node did not rejoin before the deadline");
                return Err(DrainError::RejoinTimeout {
                    node: node.to_string(),
                    elapsed,
                });
            }

            match self.cluster.list_node_names().await {
                Ok(names) => {
                    if names.iter().any(|n| n == node) {
                        info!(node, "node rejoined the cluster");
                        self.state = DrainState::Rejoined;
                        return Ok(());
                    }
                }
                Err(e) => warn!(node, error = %e, "node membership poll failed, will retry"),
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

/// Add `node` to the exclusion list. Returns false (and performs no
/// write) when it is already present.
pub async fn add_exclusion<C: ClusterOps>(
    cluster: &C,
    node: &str,
    dry_run: bool,
) -> Result<bool, ClusterError> {
    let mut excluded = cluster.get_excluded_names().await?;
    if excluded.iter().any(|n| n == node) {
        return Ok(false);
    }
    excluded.push(node.to_string());
    if dry_run {
        info!(node, list = ?excluded, "dry-run: skipping exclusion list update");
        return Ok(true);
    }
    cluster.set_excluded_names(&excluded).await?;
    info!(node, "excluded node from shard allocation");
    Ok(true)
}

/// Remove `node` from the exclusion list. Returns false (and performs
/// no write) when it is not present.
pub async fn clear_exclusion<C: ClusterOps>(
    cluster: &C,
    node: &str,
    dry_run: bool,
) -> Result<bool, ClusterError> {
    let excluded = cluster.get_excluded_names().await?;
    if !excluded.iter().any(|n| n == node) {
        debug!(node, "node not in exclusion list, nothing to clear");
        return Ok(false);
    }
    let remaining: Vec<String> = excluded.into_iter().filter(|n| n != node).collect();
    if dry_run {
        info!(node, list = ?remaining, "dry-run: skipping exclusion list update");
        return Ok(true);
    }
    cluster.set_excluded_names(&remaining).await?;
    info!(node, "cleared node from shard allocation exclusions");
    Ok(true)
}
