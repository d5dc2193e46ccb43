//! Search for the backend running an unknown query.
//!
//! Every backend is asked `HEAD {proxy_to}/v1/query/{id}`; the first one to
//! answer 200 owns the query. At most `concurrency` probes are in flight, and
//! the search stops issuing probes as soon as one succeeds. Probes still in
//! flight at that point are dropped, not awaited.

use futures_util::stream::{self, StreamExt};
use reqwest::StatusCode;
use std::time::Duration;

use crate::config::FallbackSearchConfig;
use crate::load_balancer::BackendDescriptor;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct QueryLocator {
    client: reqwest::Client,
    concurrency: usize,
    probe_timeout: Duration,
}

impl QueryLocator {
    pub fn new(config: &FallbackSearchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.probe_timeout())
            .no_proxy()
            .build()?;

        Ok(Self {
            client,
            concurrency: config.concurrency.max(1),
            probe_timeout: config.probe_timeout(),
        })
    }

    /// Upper bound for a whole search over `backends` backends: one probe
    /// timeout per round of `concurrency` probes.
    pub fn search_deadline(&self, backends: usize) -> Duration {
        let rounds = backends.div_ceil(self.concurrency).max(1) as u32;
        self.probe_timeout * rounds
    }

    /// The first backend that knows `query_id`, if any.
    pub async fn locate(&self, query_id: &str, backends: &[BackendDescriptor]) -> Option<BackendDescriptor> {
        if backends.is_empty() {
            return None;
        }

        let mut probes = std::pin::pin!(stream::iter(backends.iter())
            .map(|backend| async move {
                let known = self.probe(backend, query_id).await;
                (backend, known)
            })
            .buffer_unordered(self.concurrency));

        let search = async {
            while let Some((backend, known)) = probes.next().await {
                if known {
                    return Some(backend.clone());
                }
            }
            None
        };

        match tokio::time::timeout(self.search_deadline(backends.len()), search).await {
            Ok(found) => found,
            Err(_) => {
                tracing::warn!(query_id = %query_id, backends = backends.len(), "Fallback search timed out");
                None
            }
        }
    }

    async fn probe(&self, backend: &BackendDescriptor, query_id: &str) -> bool {
        let url = format!("{}/v1/query/{}", backend.proxy_to.trim_end_matches('/'), query_id);

        match self.client.head(&url).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                tracing::debug!(backend = %backend.name, query_id = %query_id, "Backend knows query");
                true
            }
            Ok(response) => {
                tracing::debug!(
                    backend = %backend.name,
                    query_id = %query_id,
                    status = %response.status(),
                    "Backend does not know query"
                );
                false
            }
            Err(e) => {
                metrics::record_fallback_probe_failure();
                tracing::warn!(backend = %backend.name, url = %url, error = %e, "Fallback probe failed");
                false
            }
        }
    }
}
