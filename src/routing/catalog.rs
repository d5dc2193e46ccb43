//! Backend catalog.
//!
//! # Responsibilities
//! - Supply the configured backends per routing group
//! - Allow the backend list to be replaced while the gateway runs
//!
//! # Design Decisions
//! - Readers get cloned snapshots; a replace never blocks them

use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

use crate::load_balancer::BackendDescriptor;

/// Source of configured backends.
pub trait BackendCatalog: Send + Sync + fmt::Debug {
    /// Active backends in `routing_group`.
    fn list_backends(&self, routing_group: &str) -> Vec<BackendDescriptor>;

    /// Every configured backend, active or not.
    fn list_all_backends(&self) -> Vec<BackendDescriptor>;

    /// Active backends in the default routing group.
    fn list_active_default_backends(&self) -> Vec<BackendDescriptor>;
}

/// Catalog held in memory, typically loaded from the config file.
#[derive(Debug)]
pub struct StaticBackendCatalog {
    backends: ArcSwap<Vec<BackendDescriptor>>,
    default_routing_group: String,
}

impl StaticBackendCatalog {
    pub fn new(backends: Vec<BackendDescriptor>, default_routing_group: impl Into<String>) -> Self {
        Self {
            backends: ArcSwap::from_pointee(backends),
            default_routing_group: default_routing_group.into(),
        }
    }

    /// Swap in a new backend list.
    pub fn replace(&self, backends: Vec<BackendDescriptor>) {
        tracing::info!(backends = backends.len(), "Backend catalog replaced");
        self.backends.store(Arc::new(backends));
    }

    pub fn default_routing_group(&self) -> &str {
        &self.default_routing_group
    }

    fn active_in(&self, routing_group: &str) -> Vec<BackendDescriptor> {
        self.backends
            .load()
            .iter()
            .filter(|b| b.active && b.routing_group == routing_group)
            .cloned()
            .collect()
    }
}

impl BackendCatalog for StaticBackendCatalog {
    fn list_backends(&self, routing_group: &str) -> Vec<BackendDescriptor> {
        self.active_in(routing_group)
    }

    fn list_all_backends(&self) -> Vec<BackendDescriptor> {
        self.backends.load().as_ref().clone()
    }

    fn list_active_default_backends(&self) -> Vec<BackendDescriptor> {
        self.active_in(&self.default_routing_group)
    }
}
