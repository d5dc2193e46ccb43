//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once at startup
//! - Honour `RUST_LOG` when set, otherwise the configured level
//!
//! # Design Decisions
//! - Events carry fields (`backend`, `query_id`, `routing_group`) rather than
//!   formatted messages

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Directive used when `RUST_LOG` is not set.
pub fn default_directive(level: &str) -> String {
    format!("gateway_router={level}")
}

/// Install the subscriber. Returns `false` when one is already installed,
/// which happens when tests initialise logging more than once.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
