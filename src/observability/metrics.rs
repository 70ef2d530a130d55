//! Metrics collection and exposition.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Initialize metrics exporter and server.
pub fn init_metrics(addr: SocketAddr) {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus recorder");

    tracing::info!("Metrics server listening on http://{}", addr);
}

/// Record a completed tunnel exchange.
pub fn record_tunnel_request(version: &'static str, status: u16) {
    let labels = [
        ("version", version.to_string()),
        ("status", status.to_string()),
    ];
    counter!("bare_tunnel_requests_total", &labels).increment(1);
}

/// Record a rejected request.
pub fn record_rate_limited() {
    counter!("bare_rate_limited_total").increment(1);
}

/// Track live WebSocket relays.
pub fn record_ws_relay(version: &'static str, delta: i64) {
    gauge!("bare_ws_relays", "version" => version.to_string()).increment(delta as f64);
}

/// Track stored meta records.
pub fn record_meta_records(count: usize) {
    gauge!("bare_meta_records").set(count as f64);
}
