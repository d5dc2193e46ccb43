//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → used once to build catalog, cache, strategy and manager
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → StaticBackendCatalog::replace (backend list swapped atomically)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - An invalid reload is logged and ignored

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    FallbackSearchConfig, GatewayConfig, MonitorConfig, MonitorSource, ObservabilityConfig, QueryCacheConfig,
    RoutingConfig, ValkeyConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
