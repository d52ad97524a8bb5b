//! Cluster service integration.
//!
//! Three pieces live here:
//! - [`ClusterOps`], the operations the autoscaler needs from the
//!   cluster's REST API, and [`EsCluster`], the Elasticsearch
//!   implementation;
//! - [`DrainCoordinator`], the state machine that excludes a node
//!   from shard allocation and waits for it to empty before the
//!   controller may delete the backing VM;
//! - [`ShardRebalancer`], the maintenance action that keeps replica
//!   counts matched to the number of nodes hosting an index group.

mod client;
mod drain;
mod rebalance;
mod types;

pub use client::{ClusterOps, EsCluster};
pub use drain::{
    DrainCoordinator, DrainError, DrainOptions, DrainState, add_exclusion, clear_exclusion,
};
pub use rebalance::{RebalanceOutcome, ShardRebalancer, desired_replicas};
pub use types::{AliasBinding, IndexInfo, IndexSelector, ShardPlacement};

use thiserror::Error;

/// Errors from talking to the cluster service.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("cluster returned status {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode cluster response for {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("invalid index pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}
