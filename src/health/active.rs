//! Active cluster monitoring.
//!
//! # Responsibilities
//! - Periodically poll every active backend
//! - Turn the responses into `ClusterStats` reports
//! - Hand the reports to the observers (the routing manager)
//!
//! # Sources
//! ```text
//! info    GET /v1/info                     starting → Pending, else Healthy
//! ui_api  GET /ui/api/stats                activeWorkers > 0 → Healthy,
//!                                          queued/running/blocked/workers
//!         GET /ui/api/query?state=QUEUED   queued count per session user
//! ```
//! Any request error or non-success reply marks the backend Unhealthy. A
//! failed queued list keeps the cluster counters and drops the per-user
//! breakdown.

use futures_util::future::join_all;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::{MonitorConfig, MonitorSource};
use crate::health::HealthStatus;
use crate::load_balancer::{BackendDescriptor, ClusterStats};
use crate::routing::BackendCatalog;

/// Receives every batch of cluster stats the monitor produces.
pub trait ClusterStatsObserver: Send + Sync {
    fn observe(&self, stats: &[ClusterStats]);
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    starting: bool,
}

/// Cluster counters from `/ui/api/stats`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UiStats {
    running_queries: u32,
    blocked_queries: u32,
    queued_queries: u32,
    active_workers: u32,
}

/// One entry of the queued query list.
#[derive(Debug, Deserialize)]
struct QueuedQuery {
    #[serde(rename = "sessionUser", default)]
    session_user: Option<String>,
}

fn count_by_user(queries: &[QueuedQuery]) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for user in queries.iter().filter_map(|q| q.session_user.as_deref()) {
        *counts.entry(user.to_string()).or_insert(0) += 1;
    }
    counts
}

fn should_retry(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

pub struct ClusterMonitor {
    catalog: Arc<dyn BackendCatalog>,
    observers: Vec<Arc<dyn ClusterStatsObserver>>,
    config: MonitorConfig,
    client: reqwest::Client,
}

impl ClusterMonitor {
    pub fn new(
        catalog: Arc<dyn BackendCatalog>,
        observers: Vec<Arc<dyn ClusterStatsObserver>>,
        config: MonitorConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("gateway-router-monitor")
            .no_proxy()
            .build()?;

        Ok(Self {
            catalog,
            observers,
            config,
            client,
        })
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Cluster monitor disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            retries = self.config.retries,
            source = ?self.config.source,
            "Cluster monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cluster monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Poll every active backend once and notify the observers.
    pub async fn poll_once(&self) -> Vec<ClusterStats> {
        let backends: Vec<BackendDescriptor> = self
            .catalog
            .list_all_backends()
            .into_iter()
            .filter(|b| b.active)
            .collect();

        tracing::debug!(backends = backends.len(), "Getting stats for all clusters");

        let stats: Vec<ClusterStats> = join_all(backends.iter().map(|backend| async move {
            match self.config.source {
                MonitorSource::Info => ClusterStats::for_backend(backend, self.check_status(backend).await),
                MonitorSource::UiApi => self.collect_load(backend).await,
            }
        }))
        .await;

        for observer in &self.observers {
            observer.observe(&stats);
        }
        stats
    }

    async fn check_status(&self, backend: &BackendDescriptor) -> HealthStatus {
        let Some(response) = self.fetch(backend, "/v1/info").await else {
            return HealthStatus::Unhealthy;
        };
        match response.json::<ServerInfo>().await {
            Ok(info) if info.starting => HealthStatus::Pending,
            Ok(_) => HealthStatus::Healthy,
            Err(e) => {
                tracing::warn!(backend = %backend.name, error = %e, "Health check failed: invalid server info");
                HealthStatus::Unhealthy
            }
        }
    }

    async fn collect_load(&self, backend: &BackendDescriptor) -> ClusterStats {
        let mut stats = ClusterStats::for_backend(backend, HealthStatus::Unhealthy);

        let Some(response) = self.fetch(backend, "/ui/api/stats").await else {
            return stats;
        };
        let ui = match response.json::<UiStats>().await {
            Ok(ui) => ui,
            Err(e) => {
                tracing::warn!(backend = %backend.name, error = %e, "Health check failed: invalid cluster stats");
                return stats;
            }
        };

        stats.status = if ui.active_workers > 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        stats.queued_query_count = ui.queued_queries;
        stats.running_query_count = ui.running_queries;
        stats.blocked_query_count = ui.blocked_queries;
        stats.num_worker_nodes = ui.active_workers;

        let Some(response) = self.fetch(backend, "/ui/api/query?state=QUEUED").await else {
            return stats;
        };
        match response.json::<Vec<QueuedQuery>>().await {
            Ok(queued) => stats.user_queued_count = Some(count_by_user(&queued)),
            Err(e) => {
                tracing::warn!(backend = %backend.name, error = %e, "Invalid queued query list, skipping per-user counts");
            }
        }
        stats
    }

    /// GET `path` on the backend, retrying gateway errors. `None` after
    /// logging when no successful response arrives.
    async fn fetch(&self, backend: &BackendDescriptor, path: &str) -> Option<reqwest::Response> {
        let url = format!("{}{}", backend.proxy_to.trim_end_matches('/'), path);
        let mut retries_remaining = self.config.retries;

        loop {
            let response = match self.client.get(&url).send().await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(backend = %backend.name, url = %url, error = %e, "Health check failed: request error");
                    return None;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Some(response);
            }

            if should_retry(status) && retries_remaining > 0 {
                retries_remaining -= 1;
                tracing::warn!(backend = %backend.name, status = %status, retries_remaining, "Retrying health check");
                continue;
            }

            tracing::warn!(backend = %backend.name, url = %url, status = %status, "Health check failed: non-success status");
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_gateway_errors_are_retried() {
        assert!(should_retry(StatusCode::BAD_GATEWAY));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::GATEWAY_TIMEOUT));
        assert!(!should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!should_retry(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_server_info_parsing() {
        let info: ServerInfo = serde_json::from_str(r#"{"nodeVersion":{"version":"450"},"starting":true}"#).unwrap();
        assert!(info.starting);
        let info: ServerInfo = serde_json::from_str(r#"{"coordinator":true}"#).unwrap();
        assert!(!info.starting);
    }

    #[test]
    fn test_ui_stats_parsing() {
        let ui: UiStats = serde_json::from_str(
            r#"{"runningQueries":7,"blockedQueries":1,"queuedQueries":12,"activeCoordinators":1,
                "activeWorkers":3,"runningDrivers":40,"totalAvailableProcessors":24,
                "reservedMemory":0.0,"totalInputRows":0,"totalInputBytes":0,"totalCpuTimeSecs":0}"#,
        )
        .unwrap();
        assert_eq!(ui.running_queries, 7);
        assert_eq!(ui.blocked_queries, 1);
        assert_eq!(ui.queued_queries, 12);
        assert_eq!(ui.active_workers, 3);

        let partial: UiStats = serde_json::from_str(r#"{"queuedQueries":2}"#).unwrap();
        assert_eq!(partial.queued_queries, 2);
        assert_eq!(partial.active_workers, 0);
    }

    #[test]
    fn test_queued_queries_counted_per_user() {
        let queued: Vec<QueuedQuery> = serde_json::from_str(
            r#"[
                {"queryId":"q1","sessionUser":"alice","state":"QUEUED"},
                {"queryId":"q2","sessionUser":"bob","state":"QUEUED"},
                {"queryId":"q3","sessionUser":"alice","state":"QUEUED"},
                {"queryId":"q4","state":"QUEUED"}
            ]"#,
        )
        .unwrap();
        let counts = count_by_user(&queued);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["alice"], 2);
        assert_eq!(counts["bob"], 1);
    }
}
