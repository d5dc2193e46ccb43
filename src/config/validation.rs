//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check backend definitions (unique names, usable URLs)
//! - Validate value ranges (intervals, concurrency, ports)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::config::schema::GatewayConfig;

/// Lowest accepted distributed cache health-check interval.
pub const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.routing.default_routing_group.trim().is_empty() {
        errors.push(ValidationError::new(
            "routing.default_routing_group",
            "must not be empty",
        ));
    }

    let mut names = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let field = format!("backends[{i}]");
        if backend.name.is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !names.insert(backend.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate backend name '{}'", backend.name),
            ));
        }

        if backend.routing_group.is_empty() {
            errors.push(ValidationError::new(
                format!("{field}.routing_group"),
                "must not be empty",
            ));
        }

        match Url::parse(&backend.proxy_to) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(ValidationError::new(
                format!("{field}.proxy_to"),
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new(
                format!("{field}.proxy_to"),
                format!("invalid URL '{}': {e}", backend.proxy_to),
            )),
        }
    }

    if config.fallback_search.concurrency == 0 {
        errors.push(ValidationError::new(
            "fallback_search.concurrency",
            "must be at least 1",
        ));
    }

    if config.query_cache.health_check_interval_ms < MIN_HEALTH_CHECK_INTERVAL_MS {
        errors.push(ValidationError::new(
            "query_cache.health_check_interval_ms",
            format!("must be at least {MIN_HEALTH_CHECK_INTERVAL_MS}"),
        ));
    }

    if config.query_cache.operation_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "query_cache.operation_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.valkey.enabled && config.valkey.port == 0 {
        errors.push(ValidationError::new("valkey.port", "must not be 0"));
    }

    if config.monitor.enabled && config.monitor.interval_secs == 0 {
        errors.push(ValidationError::new(
            "monitor.interval_secs",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
