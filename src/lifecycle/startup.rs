//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every routing component from a validated `GatewayConfig`
//! - Wire the cluster monitor to the routing manager
//!
//! # Data Flow
//! ```text
//! GatewayConfig
//!     → StaticBackendCatalog (backends, default group)
//!     → QueryRouteCache (L1 + Valkey L2 when enabled + optional history)
//!     → StrategyKind::build
//!     → QueryLocator (fallback search client)
//!     → RoutingManager
//! ```
//!
//! # Design Decisions
//! - Fail fast: any construction error aborts startup
//! - Nothing connects during build; the Valkey connection is opened lazily
//! - Without Valkey there is no L2 tier

use std::sync::Arc;
use thiserror::Error;

use crate::cache::{DistributedCache, QueryHistoryStore, QueryRouteCache, ValkeyDistributedCache};
use crate::config::{ConfigError, GatewayConfig};
use crate::health::{ClusterMonitor, ClusterStatsObserver, ConnectionChecker, TokioConnector};
use crate::routing::{BackendCatalog, QueryLocator, RoutingManager, StaticBackendCatalog};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid metrics address {address}: {source}")]
    MetricsAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// The assembled routing core.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    catalog: Arc<StaticBackendCatalog>,
    manager: Arc<RoutingManager>,
    connection_checker: Arc<ConnectionChecker>,
}

impl Gateway {
    /// Build with no durable history tier.
    pub fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        Self::build_with_history(config, None)
    }

    pub fn build_with_history(
        config: GatewayConfig,
        history: Option<Arc<dyn QueryHistoryStore>>,
    ) -> Result<Self, StartupError> {
        let default_group = config.routing.default_routing_group.clone();
        let catalog = Arc::new(StaticBackendCatalog::new(config.backends.clone(), default_group.as_str()));

        let mut cache = QueryRouteCache::new(&config.query_cache);
        if config.valkey.enabled {
            tracing::info!(
                host = %config.valkey.host,
                port = config.valkey.port,
                database = config.valkey.database,
                "Using Valkey distributed cache"
            );
            let distributed: Arc<dyn DistributedCache> = Arc::new(ValkeyDistributedCache::new(config.valkey.clone()));
            cache = cache.with_distributed(distributed, &config.query_cache);
        } else {
            tracing::info!("Valkey disabled, query routes are cached in-process only");
        }
        if let Some(history) = history {
            cache = cache.with_history(history);
        }

        let strategy = config.routing.strategy.build();
        let locator = QueryLocator::new(&config.fallback_search)?;

        let manager = Arc::new(RoutingManager::new(
            catalog.clone(),
            strategy,
            cache,
            locator,
            default_group.as_str(),
        ));

        tracing::info!(
            backends = config.backends.len(),
            default_routing_group = %default_group,
            strategy = manager.strategy().name(),
            "Routing manager initialized"
        );

        Ok(Self {
            config,
            catalog,
            manager,
            connection_checker: Arc::new(ConnectionChecker::new(Arc::new(TokioConnector::default()))),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<StaticBackendCatalog> {
        &self.catalog
    }

    pub fn manager(&self) -> &Arc<RoutingManager> {
        &self.manager
    }

    pub fn connection_checker(&self) -> &Arc<ConnectionChecker> {
        &self.connection_checker
    }

    /// A monitor that reports into the routing manager.
    pub fn cluster_monitor(&self) -> Result<ClusterMonitor, StartupError> {
        let catalog: Arc<dyn BackendCatalog> = self.catalog.clone();
        let observer: Arc<dyn ClusterStatsObserver> = self.manager.clone();
        let monitor = ClusterMonitor::new(catalog, vec![observer], self.config.monitor.clone())?;
        Ok(monitor)
    }
}
