//! Uniform random selection.

use rand::Rng;

use crate::load_balancer::{BackendDescriptor, SelectionStrategy};

/// Stateless uniform selector.
#[derive(Debug, Default)]
pub struct UniformRandom;

impl UniformRandom {
    pub fn new() -> Self {
        Self
    }

    /// Pick uniformly from `candidates`. Shared by the other strategies as
    /// their fallback.
    pub fn pick(candidates: &[BackendDescriptor]) -> Option<BackendDescriptor> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[index].clone())
    }
}

impl SelectionStrategy for UniformRandom {
    fn select(
        &self,
        _routing_group: &str,
        candidates: &[BackendDescriptor],
        _user: &str,
    ) -> Option<BackendDescriptor> {
        Self::pick(candidates)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
