//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! router. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::load_balancer::{BackendDescriptor, StrategyKind};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Default routing group and selection strategy.
    pub routing: RoutingConfig,

    /// Backend cluster definitions.
    pub backends: Vec<BackendDescriptor>,

    /// Query route cache settings (L2 key layout, TTL, timeouts).
    pub query_cache: QueryCacheConfig,

    /// Valkey/Redis connection for the distributed cache tier.
    pub valkey: ValkeyConfig,

    /// Fallback search for unknown query ids.
    pub fallback_search: FallbackSearchConfig,

    /// Cluster monitor settings.
    pub monitor: MonitorConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Group tried when the requested group has no healthy backend.
    pub default_routing_group: String,

    /// Selection algorithm.
    pub strategy: StrategyKind,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_routing_group: "adhoc".to_string(),
            strategy: StrategyKind::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Namespace for distributed cache keys: `<prefix>:<field>:<query id>`.
    pub key_prefix: String,

    /// Expiry of distributed cache entries in seconds.
    pub ttl_secs: u64,

    /// Client-side timeout for a single distributed cache operation.
    pub operation_timeout_ms: u64,

    /// Minimum time between two pings of an unhealthy distributed cache.
    pub health_check_interval_ms: u64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "trino:query".to_string(),
            ttl_secs: 1800,
            operation_timeout_ms: 500,
            health_check_interval_ms: 30_000,
        }
    }
}

impl QueryCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValkeyConfig {
    /// Use Valkey as the distributed tier. When disabled an in-process
    /// store stands in.
    pub enabled: bool,

    pub host: String,

    pub port: u16,

    /// Sent with `AUTH` on connect when set.
    pub password: Option<String>,

    /// Selected with `SELECT` on connect when non-zero.
    pub database: u32,

    /// Connect timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            database: 0,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackSearchConfig {
    /// Maximum number of backends probed at once.
    pub concurrency: usize,

    pub connect_timeout_secs: u64,

    pub read_timeout_secs: u64,
}

impl Default for FallbackSearchConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            connect_timeout_secs: 5,
            read_timeout_secs: 5,
        }
    }
}

impl FallbackSearchConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-probe budget: connect plus read.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs + self.read_timeout_secs)
    }
}

/// Cluster monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Poll backends periodically.
    pub enabled: bool,

    /// Poll interval in seconds.
    pub interval_secs: u64,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Extra attempts on 502/503/504.
    pub retries: u32,

    /// What each poll asks the backends for.
    pub source: MonitorSource,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 10,
            retries: 0,
            source: MonitorSource::default(),
        }
    }
}

/// Endpoint family the cluster monitor polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorSource {
    /// `/v1/info`: health only, load counters stay zero.
    #[default]
    Info,
    /// `/ui/api/stats` and the queued query list: health from the active
    /// worker count plus cluster and per-user load.
    UiApi,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
