//! Metrics collection and exposition.
//!
//! # Metrics
//! - `directip_connections_total` (counter): accepted connections
//! - `directip_active_connections` (gauge): connections currently open
//! - `directip_messages_total` (counter): messages by outcome (accepted, rejected, malformed)
//! - `directip_confirmations_total` (counter): confirmations written, by status
//! - `directip_dispatch_requests_total` (counter): backend calls by backend, status
//! - `directip_dispatch_duration_seconds` (histogram): backend call latency
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the macros are no-ops
//! - Backend label is the target URL, status is the HTTP code or `error`

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::protocol::ConfirmationStatus;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_opened(active: u64) {
    counter!("directip_connections_total").increment(1);
    gauge!("directip_active_connections").set(active as f64);
}

pub fn record_connection_closed(active: u64) {
    gauge!("directip_active_connections").set(active as f64);
}

pub fn record_message(outcome: &'static str) {
    counter!("directip_messages_total", "outcome" => outcome).increment(1);
}

pub fn record_confirmation(status: ConfirmationStatus) {
    counter!("directip_confirmations_total", "status" => status.as_str()).increment(1);
}

/// Record one backend call.
pub fn record_dispatch(backend: &str, status: &str, start: Instant) {
    let backend = backend.to_string();
    counter!(
        "directip_dispatch_requests_total",
        "backend" => backend.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("directip_dispatch_duration_seconds", "backend" => backend)
        .record(start.elapsed().as_secs_f64());
}
