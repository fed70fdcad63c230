//! Metrics collection and exposition.
//!
//! # Metrics
//! - `router_sync_cycles_total` (counter): reconciliation cycles by outcome
//! - `router_sync_cycle_duration_seconds` (histogram): cycle latency
//! - `router_sync_agent_pool_idle` (gauge): idle agents per router endpoint
//! - `router_sync_agents_closed_total` (counter): agents closed
//! - `router_sync_management_requests_total` (counter): requests by operation, outcome
//! - `router_sync_credential_writes_total` (counter): certificate bundles written
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is only installed when enabled in settings

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cycle(outcome: &'static str, elapsed: Duration) {
    counter!("router_sync_cycles_total", "outcome" => outcome).increment(1);
    histogram!("router_sync_cycle_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_pool_idle(endpoint: &str, count: usize) {
    gauge!("router_sync_agent_pool_idle", "endpoint" => endpoint.to_string()).set(count as f64);
}

pub fn record_agent_closed() {
    counter!("router_sync_agents_closed_total").increment(1);
}

pub fn record_management_request(operation: &str, ok: bool) {
    let outcome = if ok { "success" } else { "failure" };
    counter!(
        "router_sync_management_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_credential_write() {
    counter!("router_sync_credential_writes_total").increment(1);
}
