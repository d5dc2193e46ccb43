//! Health subsystem.
//!
//! # Data Flow
//! ```text
//! Cluster monitor (active.rs):
//!     Periodic timer
//!     → GET /v1/info on every active backend
//!     → ClusterStats batch
//!     → RoutingManager::update_cluster_stats
//!         → registry.rs (per-backend HealthStatus)
//!         → selection strategy stats feed
//!
//! TCP probes (probe.rs):
//!     Routing rule asks tcp_check(host, port, ...)
//!     → shared probe for that parameter tuple
//!     → cached result, or one debounced connect attempt
//! ```
//!
//! # Design Decisions
//! - Only `Healthy` backends are routable; `Unknown` and `Pending` are not
//! - The registry is last-write-wins; debouncing belongs to the producers

pub mod active;
pub mod probe;
pub mod registry;
pub mod state;

pub use active::{ClusterMonitor, ClusterStatsObserver};
pub use probe::{ConnectionChecker, ConnectionProbe, ProbeKey, ProbeResult, TcpConnector, TokioConnector};
pub use registry::BackendHealthRegistry;
pub use state::HealthStatus;
