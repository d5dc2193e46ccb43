//! Error types for the routing core.
//!
//! Only [`RoutingError`] ever reaches a caller of the routing manager. Cache
//! and probe errors are recovered where they happen and exist so that the
//! degraded path can be logged and counted with a reason attached.

use std::io;
use thiserror::Error;

/// Failure to pick a backend for a request.
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Neither the requested routing group nor the default group had a
    /// healthy backend the strategy could choose.
    #[error("no healthy backends available for routing group '{routing_group}' (default group '{default_group}')")]
    NoBackendsAvailable {
        routing_group: String,
        default_group: String,
    },
}

impl RoutingError {
    pub fn no_backends<S: Into<String>>(routing_group: S, default_group: S) -> Self {
        RoutingError::NoBackendsAvailable {
            routing_group: routing_group.into(),
            default_group: default_group.into(),
        }
    }
}

/// Errors raised by the distributed (L2) or durable (L3) cache tiers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache tier unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("cache protocol error: {0}")]
    Protocol(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        CacheError::Timeout {
            operation: operation.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        CacheError::Protocol(message.into())
    }
}

/// Errors raised while probing a backend or TCP dependency.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("probe of {target} timed out")]
    Timeout { target: String },

    #[error("HTTP probe failed: {0}")]
    Http(#[from] reqwest::Error),
}
