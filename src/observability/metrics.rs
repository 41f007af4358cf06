//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, connections, bytes)
//! - Expose Prometheus-compatible metrics endpoint
//! - Record per-request metrics as a pipeline stage
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by host, method, status
//! - `proxy_request_duration_seconds` (histogram): latency by host, method
//! - `proxy_rate_limited_total` (counter): rejections by window
//! - `proxy_active_connections` (gauge): current connection count
//! - `proxy_connections_total` (counter): accepted connections
//! - `proxy_network_read_bytes_total` / `proxy_network_write_bytes_total` (counters)
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade
//! - Without an installed recorder every update is a no-op
//! - Histogram buckets tuned for typical web latencies

use std::net::SocketAddr;
use std::time::Instant;

use axum::{extract::Request, http::header, middleware::Next, response::Response};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full("proxy_request_duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )?
        .install()?;

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_request(host: &str, method: &str, status: u16, start: Instant) {
    let duration = start.elapsed().as_secs_f64();

    counter!(
        "proxy_requests_total",
        "host" => host.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        "proxy_request_duration_seconds",
        "host" => host.to_string(),
        "method" => method.to_string()
    )
    .record(duration);
}

pub fn record_rate_limited(window: &'static str) {
    counter!("proxy_rate_limited_total", "window" => window).increment(1);
}

pub fn connection_opened() {
    counter!("proxy_connections_total").increment(1);
    gauge!("proxy_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("proxy_active_connections").decrement(1.0);
}

pub fn record_read(bytes: usize) {
    counter!("proxy_network_read_bytes_total").increment(bytes as u64);
}

pub fn record_written(bytes: usize) {
    counter!("proxy_network_write_bytes_total").increment(bytes as u64);
}

/// Request metrics stage.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let host = request_host(&request);

    let response = next.run(request).await;

    record_request(&host, &method, response.status().as_u16(), start);
    response
}

/// Host the client addressed, from the Host header or the URI authority.
pub fn request_host<B>(request: &axum::http::Request<B>) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default()
        .to_string()
}
