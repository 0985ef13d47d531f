//! # Metrics
//!
//! Prometheus metrics for budget enforcement, recorded through the `metrics`
//! facade and exposed on `GET /metrics`.
//!
//! **Counters:**
//! - `tokengate_reservations_total{outcome}` - reserve attempts by outcome
//!   (`reserved`, `exceeded`, `synthetic`, `store_unavailable`,
//!   `policy_not_found`)
//! - `tokengate_tokens_reserved_total` - tokens placed on hold
//! - `tokengate_tokens_committed_total` - tokens committed as used
//! - `tokengate_resolutions_total{operation, outcome}` - commits and releases
//! - `tokengate_overspend_total{severity}` - commits above the reserved amount
//! - `tokengate_store_errors_total{operation}` - store failures
//!
//! **Histograms:**
//! - `tokengate_store_latency_seconds{operation}` - store round-trip time

pub mod handler;

pub use metrics_exporter_prometheus::PrometheusBuilder;

use metrics_exporter_prometheus::PrometheusHandle;
use std::time::Duration;

/// Install the global Prometheus recorder.
///
/// Buckets target sub-second store round trips.
pub fn setup_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error>> {
    use metrics_exporter_prometheus::Matcher;

    let latency_buckets = &[
        0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("tokengate_store_latency_seconds".to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    Ok(handle)
}

/// Recorder handle for this process. Falls back to a detached recorder when
/// the global one is already installed (several app states in one test binary).
pub fn prometheus_handle() -> PrometheusHandle {
    setup_metrics().unwrap_or_else(|e| {
        tracing::debug!("Metrics already initialized, creating new handle: {}", e);
        PrometheusBuilder::new().build_recorder().handle()
    })
}

pub fn record_reservation(outcome: &'static str, amount: u64) {
    metrics::counter!("tokengate_reservations_total", "outcome" => outcome).increment(1);
    if outcome == "reserved" {
        metrics::counter!("tokengate_tokens_reserved_total").increment(amount);
    }
}

pub fn record_resolution(operation: &'static str, outcome: &'static str, committed: u64) {
    metrics::counter!(
        "tokengate_resolutions_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
    if committed > 0 {
        metrics::counter!("tokengate_tokens_committed_total").increment(committed);
    }
}

pub fn record_overspend(severity: &'static str) {
    metrics::counter!("tokengate_overspend_total", "severity" => severity).increment(1);
}

pub fn record_store_call(operation: &'static str, elapsed: Duration, failed: bool) {
    metrics::histogram!("tokengate_store_latency_seconds", "operation" => operation)
        .record(elapsed.as_secs_f64());
    if failed {
        metrics::counter!("tokengate_store_errors_total", "operation" => operation).increment(1);
    }
}
