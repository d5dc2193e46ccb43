//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_backend_health{backend}` (gauge): 1=healthy, 0=anything else
//! - `gateway_selections_total{strategy,routing_group,outcome}` (counter)
//! - `gateway_route_cache_lookups_total{tier,result}` (counter): hit/miss per tier
//! - `gateway_route_cache_errors_total{tier,operation}` (counter)
//! - `gateway_fallback_searches_total{outcome}` (counter): found/default/none
//! - `gateway_fallback_probe_failures_total` (counter)
//! - `gateway_tcp_probes_total{target,result}` (counter)
//! - `gateway_routing_weight{routing_group,backend}` (gauge)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library users and
//!   tests never need to initialise anything
//! - The Prometheus exporter is optional and serves its own listener

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

use crate::health::HealthStatus;

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_gauge!("gateway_backend_health", "Backend health (1=healthy)");
    describe_counter!(
        "gateway_selections_total",
        "Backend selections by strategy and outcome"
    );
    describe_counter!(
        "gateway_route_cache_lookups_total",
        "Query route cache lookups by tier and result"
    );
    describe_counter!(
        "gateway_route_cache_errors_total",
        "Distributed or durable cache tier errors"
    );
    describe_counter!(
        "gateway_fallback_searches_total",
        "Fallback searches for unknown query ids"
    );
    describe_counter!(
        "gateway_fallback_probe_failures_total",
        "Failed HEAD probes during fallback search"
    );
    describe_counter!("gateway_tcp_probes_total", "TCP reachability probes");
    describe_gauge!(
        "gateway_routing_weight",
        "Current queue-length routing weight per backend"
    );

    tracing::info!(address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_backend_health(backend: &str, status: HealthStatus) {
    let value = if status.is_healthy() { 1.0 } else { 0.0 };
    gauge!("gateway_backend_health", "backend" => backend.to_string()).set(value);
}

pub fn record_selection(strategy: &'static str, routing_group: &str, outcome: &'static str) {
    counter!(
        "gateway_selections_total",
        "strategy" => strategy,
        "routing_group" => routing_group.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_cache_lookup(tier: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("gateway_route_cache_lookups_total", "tier" => tier, "result" => result).increment(1);
}

pub fn record_cache_error(tier: &'static str, operation: &'static str) {
    counter!("gateway_route_cache_errors_total", "tier" => tier, "operation" => operation)
        .increment(1);
}

pub fn record_fallback_search(outcome: &'static str) {
    counter!("gateway_fallback_searches_total", "outcome" => outcome).increment(1);
}

pub fn record_fallback_probe_failure() {
    counter!("gateway_fallback_probe_failures_total").increment(1);
}

pub fn record_tcp_probe(target: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("gateway_tcp_probes_total", "target" => target.to_string(), "result" => result)
        .increment(1);
}

pub fn record_routing_weight(routing_group: &str, backend: &str, weight: u64) {
    gauge!(
        "gateway_routing_weight",
        "routing_group" => routing_group.to_string(),
        "backend" => backend.to_string()
    )
    .set(weight as f64);
}
