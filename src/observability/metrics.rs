//! Metrics collection and exposition.
//!
//! # Metrics
//! - `dispatcher_connections_routed_total` (counter): handoffs by worker id
//! - `dispatcher_connections_refused_total` (counter): no ready worker within the retry budget
//! - `dispatcher_sticky_fallbacks_total` (counter): header sniffing fell back to the remote address
//! - `dispatcher_worker_restarts_total` (counter): replacement workers spawned
//! - `dispatcher_active_connections` (gauge): tracked ConnectionRecords
//! - `dispatcher_ready_workers` (gauge): workers currently selectable

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::cluster::WorkerId;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn record_routed(worker: WorkerId) {
    counter!("dispatcher_connections_routed_total", "worker" => worker.to_string()).increment(1);
}

pub fn record_refused() {
    counter!("dispatcher_connections_refused_total").increment(1);
}

pub fn record_sticky_fallback(reason: &'static str) {
    counter!("dispatcher_sticky_fallbacks_total", "reason" => reason).increment(1);
}

pub fn record_worker_restart() {
    counter!("dispatcher_worker_restarts_total").increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("dispatcher_active_connections").set(count as f64);
}

pub fn set_ready_workers(count: usize) {
    gauge!("dispatcher_ready_workers").set(count as f64);
}
