//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_accepted_total` (counter)
//! - `proxy_accept_errors_total` (counter): by kind (transient/fatal)
//! - `proxy_requests_total` (counter): by status
//! - `proxy_request_duration_seconds` (histogram)
//! - `proxy_body_rewrites_total` (counter): by decision (rewrite/passthrough)
//! - `proxy_handler_failures_total` (counter): by cause (error/panic)
//! - `proxy_active_sessions`, `proxy_active_listeners` (gauges)
//!
//! Recording is a no-op until an exporter is installed.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accept() {
    counter!("proxy_connections_accepted_total").increment(1);
}

pub fn record_accept_error(kind: &'static str) {
    counter!("proxy_accept_errors_total", "kind" => kind).increment(1);
}

pub fn record_request(status: u16, start: Instant) {
    counter!("proxy_requests_total", "status" => status.to_string()).increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rewrite_decision(rewrite: bool) {
    let decision = if rewrite { "rewrite" } else { "passthrough" };
    counter!("proxy_body_rewrites_total", "decision" => decision).increment(1);
}

pub fn record_handler_failure(cause: &'static str) {
    counter!("proxy_handler_failures_total", "cause" => cause).increment(1);
}

pub fn set_active_sessions(count: usize) {
    gauge!("proxy_active_sessions").set(count as f64);
}

pub fn set_active_listeners(count: usize) {
    gauge!("proxy_active_listeners").set(count as f64);
}
