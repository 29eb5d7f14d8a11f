//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, kind
//! - `proxy_request_duration_seconds` (histogram): latency by kind
//! - `proxy_rewrites_total` (counter): rewritten bodies by content class
//! - `proxy_upgrades_total` (counter): upgrade outcomes
//!   (accepted, rejected, failed)
//!
//! # Design Decisions
//! - Exposition is opt-in (`observability.metrics_enabled`)
//! - Label sets stay small; hosts and paths are never labels

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter")
        }
    }
}

pub fn record_request(method: &str, status: u16, kind: &str, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);

    ::metrics::histogram!("proxy_request_duration_seconds", "kind" => kind.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rewrite(class: &'static str) {
    ::metrics::counter!("proxy_rewrites_total", "class" => class).increment(1);
}

pub fn record_upgrade(outcome: &'static str) {
    ::metrics::counter!("proxy_upgrades_total", "outcome" => outcome).increment(1);
}
