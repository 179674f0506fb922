//! Application metrics for Prometheus monitoring.
//!
//! The job counters themselves are recorded inside `jobwatch-core` through the
//! `metrics` facade; this module installs the recorder that collects them and
//! renders the `/metrics` text.

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// This should be called once at application startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!(
        "jobwatch_job_transitions_total",
        "Job status transitions written, labelled by target status"
    );
    describe_counter!(
        "jobwatch_job_rejections_total",
        "Job operations rejected, labelled by error kind"
    );
    describe_counter!(
        "jobwatch_stream_subscriptions_total",
        "Status stream subscriptions opened"
    );
    describe_counter!(
        "jobwatch_stream_endings_total",
        "Status stream subscriptions closed, labelled by final event kind"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}
