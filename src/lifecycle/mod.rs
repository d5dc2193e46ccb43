//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build catalog, cache, strategy, manager
//!     → Spawn cluster monitor and config reload tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Background tasks exit → Drain with deadline
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then routing core, then background tasks
//! - Shutdown has a timeout: the process exits after the deadline regardless

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{Gateway, StartupError};
