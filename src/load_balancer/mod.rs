//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! Routing request (routing_group, user)
//!     → catalog backends for the group, filtered to healthy
//!     → SelectionStrategy::select:
//!         - random.rs (uniform pick)
//!         - query_count.rs (per-user queue depth, optimistic local bump)
//!         - queue_length.rs (weighted draw from queue-length weight table)
//!     → chosen BackendDescriptor, or None to trigger the default-group fallback
//!
//! Monitor tick
//!     → SelectionStrategy::update_cluster_stats (strategy-local copy of load)
//! ```
//!
//! # Design Decisions
//! - One strategy per routing manager, picked at construction
//! - Strategies never see unhealthy candidates
//! - Uniform random is the last resort whenever a strategy lacks state

pub mod backend;
pub mod query_count;
pub mod queue_length;
pub mod random;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use backend::{BackendDescriptor, ClusterStats};
pub use query_count::QueryCountBased;
pub use queue_length::QueueLengthRouting;
pub use random::UniformRandom;

/// A backend selection algorithm.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Pick one of `candidates` (all healthy, all in `routing_group`) for `user`.
    /// Returns `None` when the strategy cannot route within this group.
    fn select(
        &self,
        routing_group: &str,
        candidates: &[BackendDescriptor],
        user: &str,
    ) -> Option<BackendDescriptor>;

    /// Receive a fresh batch of cluster stats from the monitor.
    fn update_cluster_stats(&self, _stats: &[ClusterStats]) {}

    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;
}

/// Strategy selector as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Random,
    QueryCount,
    QueueLength,
}

impl StrategyKind {
    /// Instantiate the configured strategy.
    pub fn build(self) -> Arc<dyn SelectionStrategy> {
        match self {
            StrategyKind::Random => Arc::new(UniformRandom::new()),
            StrategyKind::QueryCount => Arc::new(QueryCountBased::new()),
            StrategyKind::QueueLength => Arc::new(QueueLengthRouting::new()),
        }
    }
}
