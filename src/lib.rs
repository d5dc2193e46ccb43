//! Backend selection core of a SQL query gateway.
//!
//! Picks a healthy backend cluster for each new query, remembers where every
//! query runs, and finds the owner of queries it has never seen.

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;

pub use cache::QueryRouteCache;
pub use config::GatewayConfig;
pub use error::{CacheError, ProbeError, RoutingError};
pub use health::{BackendHealthRegistry, ConnectionChecker, HealthStatus};
pub use lifecycle::{Gateway, Shutdown};
pub use load_balancer::{BackendDescriptor, ClusterStats, SelectionStrategy, StrategyKind};
pub use routing::RoutingManager;
