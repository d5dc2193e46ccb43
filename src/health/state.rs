//! Backend health states.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from selection
//! - Pending: cluster is still starting, excluded like Unhealthy
//! - Unknown: never reported, excluded and logged on every lookup

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of a single backend cluster as last reported by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Pending,
}

impl From<bool> for HealthStatus {
    fn from(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl HealthStatus {
    /// Only `Healthy` is routable.
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "UNKNOWN"),
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
            HealthStatus::Pending => write!(f, "PENDING"),
        }
    }
}
