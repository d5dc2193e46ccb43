//! Durable (L3) query history tier.
//!
//! The route cache only reads this tier. Records are written by whatever
//! persists query history for the gateway.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;

use crate::error::CacheError;

#[async_trait]
pub trait QueryHistoryStore: Send + Sync + fmt::Debug {
    async fn get_backend_for_query(&self, query_id: &str) -> Result<Option<String>, CacheError>;

    async fn get_external_url_for_query(&self, query_id: &str) -> Result<Option<String>, CacheError>;

    /// Stores that do not keep the routing group report nothing.
    async fn get_routing_group_for_query(&self, _query_id: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }
}

/// One persisted query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryHistoryRecord {
    pub backend_url: Option<String>,
    pub external_url: Option<String>,
    pub routing_group: Option<String>,
}

/// History kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryQueryHistory {
    records: DashMap<String, QueryHistoryRecord>,
}

impl InMemoryQueryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, query_id: impl Into<String>, record: QueryHistoryRecord) {
        self.records.insert(query_id.into(), record);
    }

    fn field(&self, query_id: &str, pick: impl Fn(&QueryHistoryRecord) -> Option<String>) -> Option<String> {
        self.records.get(query_id).and_then(|r| pick(r.value()))
    }
}

#[async_trait]
impl QueryHistoryStore for InMemoryQueryHistory {
    async fn get_backend_for_query(&self, query_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.field(query_id, |r| r.backend_url.clone()))
    }

    async fn get_external_url_for_query(&self, query_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.field(query_id, |r| r.external_url.clone()))
    }

    async fn get_routing_group_for_query(&self, query_id: &str) -> Result<Option<String>, CacheError> {
        Ok(self.field(query_id, |r| r.routing_group.clone()))
    }
}
