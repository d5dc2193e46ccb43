//! Backend data model.
//!
//! # Responsibilities
//! - Describe a configured backend cluster (`BackendDescriptor`)
//! - Carry the periodic load report for a cluster (`ClusterStats`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::health::HealthStatus;

/// A configured backend cluster, as supplied by the backend catalog.
///
/// Descriptors are immutable snapshots; the catalog hands out clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique backend identifier.
    pub name: String,
    /// Routing group this backend belongs to.
    pub routing_group: String,
    /// Internal URL the gateway forwards to.
    pub proxy_to: String,
    /// URL handed back to clients.
    pub external_url: String,
    /// Inactive backends are never routed to.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl BackendDescriptor {
    pub fn new(
        name: impl Into<String>,
        routing_group: impl Into<String>,
        proxy_to: impl Into<String>,
        external_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            routing_group: routing_group.into(),
            proxy_to: proxy_to.into(),
            external_url: external_url.into(),
            active: true,
        }
    }
}

/// Load and health report for one cluster, produced by the cluster monitor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterStats {
    pub cluster_id: String,
    pub routing_group: String,
    pub proxy_to: String,
    pub external_url: String,
    pub running_query_count: u32,
    pub queued_query_count: u32,
    pub blocked_query_count: u32,
    pub num_worker_nodes: u32,
    pub status: HealthStatus,
    /// Queued query count per user, when the monitor can break it down.
    pub user_queued_count: Option<HashMap<String, u32>>,
}

impl ClusterStats {
    /// Start a report for `cluster_id` in `routing_group` with zero load and
    /// unknown health.
    pub fn new(cluster_id: impl Into<String>, routing_group: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            routing_group: routing_group.into(),
            ..Default::default()
        }
    }

    /// Build a report for a catalog backend.
    pub fn for_backend(backend: &BackendDescriptor, status: HealthStatus) -> Self {
        Self {
            cluster_id: backend.name.clone(),
            routing_group: backend.routing_group.clone(),
            proxy_to: backend.proxy_to.clone(),
            external_url: backend.external_url.clone(),
            status,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_queued(mut self, queued: u32) -> Self {
        self.queued_query_count = queued;
        self
    }

    pub fn with_running(mut self, running: u32) -> Self {
        self.running_query_count = running;
        self
    }

    pub fn with_user_queued(mut self, user: impl Into<String>, queued: u32) -> Self {
        self.user_queued_count
            .get_or_insert_with(HashMap::new)
            .insert(user.into(), queued);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}
