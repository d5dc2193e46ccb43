//! Routing manager.
//!
//! # Responsibilities
//! - Pick a healthy backend for `(routing_group, user)`, falling back to the
//!   default routing group
//! - Record and look up where each query runs
//! - Locate unknown queries by asking every backend
//! - Fan cluster stats out to the health registry and the strategy
//!
//! # Data Flow
//! ```text
//! provide_backend_configuration(group, user)
//!     → catalog.list_backends(group) → active + healthy
//!     → strategy.select ── None ──▶ same against the default group
//!     → BackendDescriptor, or NoBackendsAvailable
//!
//! find_backend_for_query(id)
//!     → QueryRouteCache (L1 → L2 → L3)
//!     → miss: QueryLocator HEAD search over all backends
//!     → miss: first healthy default-group backend as a guess
//!     → cached for subsequent lookups
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{QueryBinding, QueryRouteCache, RouteField};
use crate::error::RoutingError;
use crate::health::{BackendHealthRegistry, ClusterStatsObserver, HealthStatus};
use crate::load_balancer::{BackendDescriptor, ClusterStats, SelectionStrategy};
use crate::observability::metrics;
use crate::routing::{BackendCatalog, QueryLocator};

#[derive(Debug)]
pub struct RoutingManager {
    catalog: Arc<dyn BackendCatalog>,
    health: BackendHealthRegistry,
    strategy: Arc<dyn SelectionStrategy>,
    cache: QueryRouteCache,
    locator: QueryLocator,
    default_routing_group: String,
}

impl RoutingManager {
    pub fn new(
        catalog: Arc<dyn BackendCatalog>,
        strategy: Arc<dyn SelectionStrategy>,
        cache: QueryRouteCache,
        locator: QueryLocator,
        default_routing_group: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            health: BackendHealthRegistry::new(),
            strategy,
            cache,
            locator,
            default_routing_group: default_routing_group.into(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn BackendCatalog> {
        &self.catalog
    }

    pub fn strategy(&self) -> &Arc<dyn SelectionStrategy> {
        &self.strategy
    }

    pub fn cache(&self) -> &QueryRouteCache {
        &self.cache
    }

    pub fn default_routing_group(&self) -> &str {
        &self.default_routing_group
    }

    /// Choose a backend for a new query.
    pub fn provide_backend_configuration(
        &self,
        routing_group: &str,
        user: &str,
    ) -> Result<BackendDescriptor, RoutingError> {
        let strategy = self.strategy.name();

        let candidates = self.routable(self.catalog.list_backends(routing_group));
        if let Some(backend) = self.strategy.select(routing_group, &candidates, user) {
            metrics::record_selection(strategy, routing_group, "selected");
            return Ok(backend);
        }

        if routing_group != self.default_routing_group {
            let defaults = self.routable(self.catalog.list_active_default_backends());
            if let Some(backend) = self.strategy.select(&self.default_routing_group, &defaults, user) {
                tracing::info!(
                    routing_group = %routing_group,
                    default_group = %self.default_routing_group,
                    backend = %backend.name,
                    "No healthy backend in routing group, using default group"
                );
                metrics::record_selection(strategy, routing_group, "default_group");
                return Ok(backend);
            }
        }

        tracing::warn!(
            routing_group = %routing_group,
            default_group = %self.default_routing_group,
            "No healthy backends available"
        );
        metrics::record_selection(strategy, routing_group, "none");
        Err(RoutingError::no_backends(routing_group, self.default_routing_group.as_str()))
    }

    fn routable(&self, backends: Vec<BackendDescriptor>) -> Vec<BackendDescriptor> {
        backends
            .into_iter()
            .filter(|b| b.active && self.health.is_healthy(&b.name))
            .collect()
    }

    pub async fn set_backend_for_query(&self, query_id: &str, backend: &str) {
        self.cache.set(query_id, RouteField::Backend, backend).await;
    }

    pub async fn set_routing_group_for_query(&self, query_id: &str, routing_group: &str) {
        self.cache.set(query_id, RouteField::RoutingGroup, routing_group).await;
    }

    pub async fn set_external_url_for_query(&self, query_id: &str, external_url: &str) {
        self.cache.set(query_id, RouteField::ExternalUrl, external_url).await;
    }

    /// Record all three values for a freshly routed query.
    pub async fn update_query_binding(
        &self,
        query_id: &str,
        backend: &str,
        routing_group: &str,
        external_url: &str,
    ) {
        let binding = QueryBinding {
            backend: Some(backend.to_string()),
            routing_group: Some(routing_group.to_string()),
            external_url: Some(external_url.to_string()),
        };
        self.cache.set_binding(query_id, &binding).await;
    }

    /// Backend URL running `query_id`. Never fails; when nobody claims the
    /// query the first healthy default-group backend is returned and cached.
    pub async fn find_backend_for_query(&self, query_id: &str) -> Option<String> {
        if let Some(backend) = self.cache.get_backend(query_id).await {
            return Some(backend);
        }

        let all = self.catalog.list_all_backends();
        if let Some(backend) = self.locator.locate(query_id, &all).await {
            tracing::info!(query_id = %query_id, backend = %backend.name, "Found unknown query on backend");
            metrics::record_fallback_search("found");
            self.set_backend_for_query(query_id, &backend.proxy_to).await;
            return Some(backend.proxy_to);
        }

        let defaults = self.catalog.list_active_default_backends();
        let guess = defaults
            .iter()
            .find(|b| self.health.status(&b.name).is_healthy())
            .or_else(|| defaults.first());

        match guess {
            Some(backend) => {
                tracing::warn!(
                    query_id = %query_id,
                    backend = %backend.name,
                    "Query not found on any backend, assuming default group backend"
                );
                metrics::record_fallback_search("default");
                self.set_backend_for_query(query_id, &backend.proxy_to).await;
                Some(backend.proxy_to.clone())
            }
            None => {
                tracing::warn!(query_id = %query_id, "Query not found and no default backend configured");
                metrics::record_fallback_search("none");
                None
            }
        }
    }

    pub async fn find_routing_group_for_query(&self, query_id: &str) -> Option<String> {
        self.cache.get_routing_group(query_id).await
    }

    pub async fn find_external_url_for_query(&self, query_id: &str) -> Option<String> {
        self.cache.get_external_url(query_id).await
    }

    pub fn update_backend_health(&self, backend_id: &str, status: HealthStatus) {
        self.health.update_health(backend_id, status);
    }

    pub fn update_cluster_stats(&self, stats: &[ClusterStats]) {
        self.health.bulk_update(stats);
        self.strategy.update_cluster_stats(stats);
    }

    pub fn is_backend_healthy(&self, backend_id: &str) -> bool {
        self.health.is_healthy(backend_id)
    }

    pub fn health_snapshot(&self) -> HashMap<String, HealthStatus> {
        self.health.snapshot()
    }
}

impl ClusterStatsObserver for RoutingManager {
    fn observe(&self, stats: &[ClusterStats]) {
        self.update_cluster_stats(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryDistributedCache, InMemoryQueryHistory, QueryHistoryRecord};
    use crate::config::{FallbackSearchConfig, QueryCacheConfig};
    use crate::load_balancer::{QueryCountBased, UniformRandom};
    use crate::routing::StaticBackendCatalog;

    fn backend(name: &str, group: &str) -> BackendDescriptor {
        BackendDescriptor::new(name, group, format!("http://{name}:8080"), format!("https://{name}.example.com"))
    }

    fn manager_with(backends: Vec<BackendDescriptor>, strategy: Arc<dyn SelectionStrategy>) -> RoutingManager {
        let config = QueryCacheConfig::default();
        let cache = QueryRouteCache::new(&config)
            .with_distributed(Arc::new(InMemoryDistributedCache::new()), &config);
        RoutingManager::new(
            Arc::new(StaticBackendCatalog::new(backends, "adhoc")),
            strategy,
            cache,
            QueryLocator::new(&FallbackSearchConfig::default()).unwrap(),
            "adhoc",
        )
    }

    fn manager(backends: Vec<BackendDescriptor>) -> RoutingManager {
        manager_with(backends, Arc::new(UniformRandom::new()))
    }

    #[test]
    fn test_unhealthy_backends_never_selected() {
        let rm = manager(vec![backend("etl-1", "etl"), backend("etl-2", "etl")]);
        rm.update_backend_health("etl-1", HealthStatus::Unhealthy);
        rm.update_backend_health("etl-2", HealthStatus::Healthy);

        for _ in 0..200 {
            assert_eq!(rm.provide_backend_configuration("etl", "u1").unwrap().name, "etl-2");
        }
    }

    #[test]
    fn test_unknown_health_falls_back_to_default_group() {
        let rm = manager(vec![backend("etl-1", "etl"), backend("adhoc-1", "adhoc")]);
        rm.update_backend_health("adhoc-1", HealthStatus::Healthy);

        let picked = rm.provide_backend_configuration("etl", "u1").unwrap();
        assert_eq!(picked.name, "adhoc-1");
    }

    #[test]
    fn test_unknown_group_uses_default_group() {
        let rm = manager(vec![backend("adhoc-1", "adhoc")]);
        rm.update_backend_health("adhoc-1", HealthStatus::Healthy);
        assert_eq!(rm.provide_backend_configuration("missing", "").unwrap().name, "adhoc-1");
    }

    #[test]
    fn test_no_backends_anywhere_is_error() {
        let rm = manager(vec![backend("etl-1", "etl"), backend("adhoc-1", "adhoc")]);
        rm.update_backend_health("etl-1", HealthStatus::Pending);
        rm.update_backend_health("adhoc-1", HealthStatus::Unhealthy);

        let err = rm.provide_backend_configuration("etl", "u1").unwrap_err();
        assert!(matches!(
            err,
            RoutingError::NoBackendsAvailable { ref routing_group, ref default_group }
                if routing_group == "etl" && default_group == "adhoc"
        ));
    }

    #[test]
    fn test_inactive_backends_never_selected() {
        let mut inactive = backend("adhoc-2", "adhoc");
        inactive.active = false;
        let rm = manager(vec![backend("adhoc-1", "adhoc"), inactive]);
        rm.update_backend_health("adhoc-1", HealthStatus::Healthy);
        rm.update_backend_health("adhoc-2", HealthStatus::Healthy);

        for _ in 0..100 {
            assert_eq!(rm.provide_backend_configuration("adhoc", "").unwrap().name, "adhoc-1");
        }
    }

    #[test]
    fn test_cluster_stats_feed_health_and_strategy() {
        let rm = manager_with(
            vec![backend("etl-1", "etl"), backend("etl-2", "etl"), backend("etl-3", "etl")],
            Arc::new(QueryCountBased::new()),
        );
        let stats: Vec<ClusterStats> = [("etl-1", 5, 9), ("etl-2", 5, 3), ("etl-3", 6, 0)]
            .into_iter()
            .map(|(name, queued, running)| {
                ClusterStats::for_backend(&backend(name, "etl"), HealthStatus::Healthy)
                    .with_queued(queued)
                    .with_running(running)
                    .with_user_queued("u1", 5)
            })
            .collect();
        rm.observe(&stats);

        assert!(rm.is_backend_healthy("etl-3"));
        assert_eq!(rm.health_snapshot().len(), 3);
        assert_eq!(rm.provide_backend_configuration("etl", "u1").unwrap().name, "etl-2");
    }

    #[tokio::test]
    async fn test_binding_round_trip() {
        let rm = manager(vec![backend("adhoc-1", "adhoc")]);
        rm.update_query_binding("q1", "http://adhoc-1:8080", "adhoc", "https://adhoc-1.example.com")
            .await;

        assert_eq!(rm.find_backend_for_query("q1").await.as_deref(), Some("http://adhoc-1:8080"));
        assert_eq!(rm.find_routing_group_for_query("q1").await.as_deref(), Some("adhoc"));
        assert_eq!(
            rm.find_external_url_for_query("q1").await.as_deref(),
            Some("https://adhoc-1.example.com")
        );
    }

    #[tokio::test]
    async fn test_partial_setters_merge() {
        let rm = manager(vec![]);
        rm.set_backend_for_query("q1", "http://b1:8080").await;
        rm.set_external_url_for_query("q1", "https://b1").await;
        rm.set_routing_group_for_query("q1", "etl").await;

        let binding = rm.cache().local().binding("q1").unwrap();
        assert_eq!(binding.backend.as_deref(), Some("http://b1:8080"));
        assert_eq!(binding.routing_group.as_deref(), Some("etl"));
        assert_eq!(binding.external_url.as_deref(), Some("https://b1"));
    }

    #[tokio::test]
    async fn test_lookup_miss_returns_none() {
        let rm = manager(vec![]);
        assert_eq!(rm.find_routing_group_for_query("nope").await, None);
        assert_eq!(rm.find_external_url_for_query("nope").await, None);
        assert_eq!(rm.find_backend_for_query("nope").await, None);
    }

    #[tokio::test]
    async fn test_history_answers_before_search() {
        let history = Arc::new(InMemoryQueryHistory::new());
        history.record(
            "q7",
            QueryHistoryRecord {
                backend_url: Some("http://old:8080".into()),
                ..Default::default()
            },
        );
        let config = QueryCacheConfig::default();
        let rm = RoutingManager::new(
            Arc::new(StaticBackendCatalog::new(vec![], "adhoc")),
            Arc::new(UniformRandom::new()),
            QueryRouteCache::new(&config).with_history(history),
            QueryLocator::new(&FallbackSearchConfig::default()).unwrap(),
            "adhoc",
        );

        assert_eq!(rm.find_backend_for_query("q7").await.as_deref(), Some("http://old:8080"));
    }
}
