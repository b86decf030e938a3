//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pipeline_cache_lookups_total` (counter): lookups by `outcome` (hit, miss, bypass, error)
//! - `pipeline_cache_stores_total` (counter): populations by `outcome` (stored, skipped, failed)
//! - `pipeline_transform_failures_total` (counter): failed transforms by `media_type`
//! - `pipeline_requests_total` (counter): finished responses by `status`
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op (tests, embedding)
//! - The Prometheus exporter is opt-in via `observability.metrics_enabled`

use std::net::SocketAddr;
use std::sync::Once;

use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

static DESCRIBE: Once = Once::new();

/// Install the Prometheus recorder with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    describe_metrics();
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn describe_metrics() {
    DESCRIBE.call_once(|| {
        describe_counter!(
            "pipeline_cache_lookups_total",
            Unit::Count,
            "Response cache lookups by outcome."
        );
        describe_counter!(
            "pipeline_cache_stores_total",
            Unit::Count,
            "Response cache populations by outcome."
        );
        describe_counter!(
            "pipeline_transform_failures_total",
            Unit::Count,
            "Body transforms that failed and fell back to the raw body."
        );
        describe_counter!(
            "pipeline_requests_total",
            Unit::Count,
            "Responses finished by the pipeline, by status code."
        );
    });
}

pub fn record_cache_lookup(outcome: &'static str) {
    counter!("pipeline_cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_store(outcome: &'static str) {
    counter!("pipeline_cache_stores_total", "outcome" => outcome).increment(1);
}

pub fn record_transform_failure(media_type: &str) {
    counter!("pipeline_transform_failures_total", "media_type" => media_type.to_string())
        .increment(1);
}

pub fn record_request(status: u16) {
    counter!("pipeline_requests_total", "status" => status.to_string()).increment(1);
}
