//! Query route cache.
//!
//! # Data Flow
//! ```text
//! Read (query id, field):
//!     L1 local.rs        hit → return
//!     L2 distributed.rs  hit → backfill L1 → return
//!     L3 history.rs      hit → backfill L1 and L2 → return
//!     miss → None (the routing manager decides what to do)
//!
//! Write (query id, field, value):
//!     L1 synchronously
//!     L2 on a spawned task, bounded by the operation timeout
//!     L3 never (owned by query history persistence)
//! ```
//!
//! # Design Decisions
//! - L2 keys are `<prefix>:<field>:<query id>`
//! - Backfill never replaces a value already present in L1
//! - L2 and L3 failures are logged and counted, never returned
//! - Callers never wait on an L2 write; a write still in flight can land
//!   after a later `invalidate` of the same query

pub mod distributed;
pub mod history;
pub mod local;
pub mod resp;
pub mod valkey;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::QueryCacheConfig;
use crate::observability::metrics;

pub use distributed::{CacheStats, DistributedCache, GuardedDistributedCache, InMemoryDistributedCache};
pub use history::{InMemoryQueryHistory, QueryHistoryRecord, QueryHistoryStore};
pub use local::{LocalRouteCache, QueryBinding};
pub use valkey::ValkeyDistributedCache;

/// One of the three values bound to a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteField {
    Backend,
    RoutingGroup,
    ExternalUrl,
}

impl RouteField {
    pub const ALL: [RouteField; 3] = [
        RouteField::Backend,
        RouteField::RoutingGroup,
        RouteField::ExternalUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteField::Backend => "backend",
            RouteField::RoutingGroup => "routing_group",
            RouteField::ExternalUrl => "external_url",
        }
    }
}

impl fmt::Display for RouteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-tier query id → binding cache.
#[derive(Debug)]
pub struct QueryRouteCache {
    local: LocalRouteCache,
    distributed: Option<Arc<GuardedDistributedCache>>,
    history: Option<Arc<dyn QueryHistoryStore>>,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl QueryRouteCache {
    /// L1 only. Add tiers with [`with_distributed`](Self::with_distributed)
    /// and [`with_history`](Self::with_history).
    pub fn new(config: &QueryCacheConfig) -> Self {
        Self {
            local: LocalRouteCache::new(),
            distributed: None,
            history: None,
            key_prefix: config.key_prefix.clone(),
            ttl: (config.ttl_secs > 0).then(|| config.ttl()),
        }
    }

    pub fn with_distributed(mut self, store: Arc<dyn DistributedCache>, config: &QueryCacheConfig) -> Self {
        self.distributed = Some(Arc::new(GuardedDistributedCache::new(
            store,
            config.operation_timeout(),
            config.health_check_interval(),
        )));
        self
    }

    pub fn with_history(mut self, history: Arc<dyn QueryHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn local(&self) -> &LocalRouteCache {
        &self.local
    }

    /// Counters of the distributed tier, when configured.
    pub fn distributed_stats(&self) -> Option<CacheStats> {
        self.distributed.as_ref().map(|distributed| distributed.stats())
    }

    pub fn key(&self, field: RouteField, query_id: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, field.as_str(), query_id)
    }

    pub async fn get(&self, query_id: &str, field: RouteField) -> Option<String> {
        if let Some(value) = self.local.get(query_id, field) {
            metrics::record_cache_lookup("l1", true);
            return Some(value);
        }
        metrics::record_cache_lookup("l1", false);

        let key = self.key(field, query_id);
        if let Some(distributed) = &self.distributed {
            let found = distributed.get(&key).await;
            metrics::record_cache_lookup("l2", found.is_some());
            if let Some(value) = found {
                tracing::debug!(query_id = %query_id, field = %field, "Route found in distributed cache");
                self.local.backfill(query_id, field, &value);
                return Some(value);
            }
        }

        let value = self.read_history(query_id, field).await?;
        tracing::debug!(query_id = %query_id, field = %field, "Route found in query history");
        self.local.backfill(query_id, field, &value);
        self.write_distributed(query_id, field, key, value.clone());
        Some(value)
    }

    pub async fn set(&self, query_id: &str, field: RouteField, value: &str) {
        self.local.set(query_id, field, value);
        self.write_distributed(query_id, field, self.key(field, query_id), value.to_string());
    }

    /// Hand an L2 write to a background task.
    fn write_distributed(&self, query_id: &str, field: RouteField, key: String, value: String) {
        let Some(distributed) = self.distributed.clone() else {
            return;
        };
        let ttl = self.ttl;
        let query_id = query_id.to_string();
        tokio::spawn(async move {
            if !distributed.set(&key, &value, ttl).await {
                tracing::debug!(query_id = %query_id, field = %field, "Route not written to distributed cache");
            }
        });
    }

    /// Write every present field of `binding`.
    pub async fn set_binding(&self, query_id: &str, binding: &QueryBinding) {
        for (field, value) in binding.fields() {
            self.set(query_id, field, value).await;
        }
    }

    /// Drop the binding from L1 and L2.
    pub async fn invalidate(&self, query_id: &str) {
        self.local.remove(query_id);
        if let Some(distributed) = &self.distributed {
            for field in RouteField::ALL {
                distributed.delete(&self.key(field, query_id)).await;
            }
        }
    }

    pub async fn get_backend(&self, query_id: &str) -> Option<String> {
        self.get(query_id, RouteField::Backend).await
    }

    pub async fn get_routing_group(&self, query_id: &str) -> Option<String> {
        self.get(query_id, RouteField::RoutingGroup).await
    }

    pub async fn get_external_url(&self, query_id: &str) -> Option<String> {
        self.get(query_id, RouteField::ExternalUrl).await
    }

    async fn read_history(&self, query_id: &str, field: RouteField) -> Option<String> {
        let history = self.history.as_ref()?;
        let result = match field {
            RouteField::Backend => history.get_backend_for_query(query_id).await,
            RouteField::RoutingGroup => history.get_routing_group_for_query(query_id).await,
            RouteField::ExternalUrl => history.get_external_url_for_query(query_id).await,
        };
        match result {
            Ok(found) => {
                metrics::record_cache_lookup("l3", found.is_some());
                found
            }
            Err(e) => {
                metrics::record_cache_error("l3", "get");
                tracing::warn!(query_id = %query_id, field = %field, error = %e, "Query history lookup failed");
                None
            }
        }
    }
}
