//! Backend health registry.
//!
//! # Responsibilities
//! - Hold the last reported `HealthStatus` per backend name
//! - Answer "is this backend routable" on the selection hot path
//!
//! # Design Decisions
//! - Last write wins; there are no thresholds here, the monitor already
//!   debounces before reporting
//! - Never-reported backends are `Unknown` and not routable

use dashmap::DashMap;
use std::collections::HashMap;

use crate::health::HealthStatus;
use crate::load_balancer::ClusterStats;
use crate::observability::metrics;

#[derive(Debug, Default)]
pub struct BackendHealthRegistry {
    statuses: DashMap<String, HealthStatus>,
}

impl BackendHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_health(&self, backend_id: &str, status: HealthStatus) {
        let previous = self.statuses.insert(backend_id.to_string(), status);
        if previous != Some(status) {
            tracing::info!(
                backend = %backend_id,
                previous = %previous.unwrap_or_default(),
                status = %status,
                "Backend health changed"
            );
        }
        metrics::record_backend_health(backend_id, status);
    }

    /// Apply each report's status in order. Later reports for the same
    /// backend override earlier ones.
    pub fn bulk_update(&self, stats: &[ClusterStats]) {
        for s in stats {
            self.update_health(&s.cluster_id, s.status);
        }
    }

    pub fn status(&self, backend_id: &str) -> HealthStatus {
        self.statuses
            .get(backend_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    pub fn is_healthy(&self, backend_id: &str) -> bool {
        let status = self.status(backend_id);
        if status == HealthStatus::Unknown {
            tracing::warn!(backend = %backend_id, "Backend health status is UNKNOWN");
        }
        status.is_healthy()
    }

    /// Copy of every known status.
    pub fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
