//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! New query (routing_group, user)
//!     → manager.rs (health filter, strategy, default-group fallback)
//!     → catalog.rs (configured backends per group)
//!     → BackendDescriptor
//!
//! Follow-up request (query id)
//!     → manager.rs → QueryRouteCache
//!     → fallback.rs on a total miss (HEAD /v1/query/{id} on every backend)
//! ```
//!
//! # Design Decisions
//! - Selection is synchronous; only query lookups touch the network
//! - The only error a caller can see is `NoBackendsAvailable`

pub mod catalog;
pub mod fallback;
pub mod manager;

pub use catalog::{BackendCatalog, StaticBackendCatalog};
pub use fallback::QueryLocator;
pub use manager::RoutingManager;
