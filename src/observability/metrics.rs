//! Metrics collection and exposition.
//!
//! # Metrics
//! - `node_client_up` (gauge): 1 = reachable, 0 = unreachable, by layer and role
//! - `node_client_synced` (gauge): 1 = synced, by layer and role
//! - `node_client_failovers_total` (counter): transparent retries on the alternate endpoint
//! - `query_batches_total` (counter): multicall batches by outcome
//! - `query_calls_total` (counter): individual calls carried by those batches
//! - `tx_submissions_total` (counter): submissions by outcome
//! - `tx_wait_seconds` (histogram): time spent waiting for receipts

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::clients::types::{ClientLayer, ClientRole, EndpointHealth};

/// Install the Prometheus exporter on `addr`. Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_endpoint_health(layer: ClientLayer, role: ClientRole, health: &EndpointHealth) {
    let up = if health.is_reachable() { 1.0 } else { 0.0 };
    let synced = if health.is_synced() { 1.0 } else { 0.0 };
    gauge!("node_client_up", "layer" => layer.as_str(), "role" => role.as_str()).set(up);
    gauge!("node_client_synced", "layer" => layer.as_str(), "role" => role.as_str()).set(synced);
}

pub fn record_failover(layer: ClientLayer) {
    counter!("node_client_failovers_total", "layer" => layer.as_str()).increment(1);
}

pub fn record_query_batch(outcome: &'static str, calls: usize) {
    counter!("query_batches_total", "outcome" => outcome).increment(1);
    counter!("query_calls_total", "outcome" => outcome).increment(calls as u64);
}

pub fn record_submission(outcome: &'static str) {
    counter!("tx_submissions_total", "outcome" => outcome).increment(1);
}

pub fn record_wait_duration(seconds: f64) {
    histogram!("tx_wait_seconds").record(seconds);
}
