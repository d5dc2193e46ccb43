//! In-process (L1) route cache.

use dashmap::DashMap;

use crate::cache::RouteField;

/// Everything known about where a query runs. Fields are filled
/// independently as the gateway learns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBinding {
    pub backend: Option<String>,
    pub routing_group: Option<String>,
    pub external_url: Option<String>,
}

impl QueryBinding {
    pub fn get(&self, field: RouteField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    fn slot(&self, field: RouteField) -> &Option<String> {
        match field {
            RouteField::Backend => &self.backend,
            RouteField::RoutingGroup => &self.routing_group,
            RouteField::ExternalUrl => &self.external_url,
        }
    }

    fn slot_mut(&mut self, field: RouteField) -> &mut Option<String> {
        match field {
            RouteField::Backend => &mut self.backend,
            RouteField::RoutingGroup => &mut self.routing_group,
            RouteField::ExternalUrl => &mut self.external_url,
        }
    }

    /// Present fields as `(field, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (RouteField, &str)> {
        RouteField::ALL
            .into_iter()
            .filter_map(move |field| self.get(field).map(|value| (field, value)))
    }
}

/// Unbounded, never-expiring map of query id to binding.
#[derive(Debug, Default)]
pub struct LocalRouteCache {
    entries: DashMap<String, QueryBinding>,
}

impl LocalRouteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, query_id: &str, field: RouteField) -> Option<String> {
        self.entries
            .get(query_id)
            .and_then(|binding| binding.get(field).map(str::to_string))
    }

    pub fn binding(&self, query_id: &str) -> Option<QueryBinding> {
        self.entries.get(query_id).map(|b| b.value().clone())
    }

    /// Overwrite one field, keeping the others.
    pub fn set(&self, query_id: &str, field: RouteField, value: &str) {
        let mut binding = self.entries.entry(query_id.to_string()).or_default();
        *binding.slot_mut(field) = Some(value.to_string());
    }

    /// Fill one field only if it is still empty. Returns whether it was filled.
    pub fn backfill(&self, query_id: &str, field: RouteField, value: &str) -> bool {
        let mut binding = self.entries.entry(query_id.to_string()).or_default();
        let slot = binding.slot_mut(field);
        if slot.is_some() {
            return false;
        }
        *slot = Some(value.to_string());
        true
    }

    pub fn remove(&self, query_id: &str) -> Option<QueryBinding> {
        self.entries.remove(query_id).map(|(_, binding)| binding)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
