//! Prometheus metrics for trace job operations
//!
//! Counters are bumped by the lifecycle manager; API latencies are observed
//! by the cluster client around every request.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, Encoder,
    HistogramVec, IntCounter, TextEncoder,
};

lazy_static! {
    /// Trace jobs successfully submitted (ConfigMap and Job both created).
    pub static ref JOBS_CREATED: IntCounter = register_int_counter!(
        "ktrace_jobs_created_total",
        "Trace jobs submitted to the cluster"
    ).expect("failed to register JOBS_CREATED metric");

    /// Resources removed by delete, by kind.
    ///
    /// Labels:
    /// - kind: "job" or "configmap"
    pub static ref RESOURCES_DELETED: CounterVec = register_counter_vec!(
        "ktrace_resources_deleted_total",
        "Trace resources deleted from the cluster",
        &["kind"]
    ).expect("failed to register RESOURCES_DELETED metric");

    /// Latency of individual cluster API calls.
    ///
    /// Labels:
    /// - operation: e.g. "create_job", "list_config_maps"
    pub static ref API_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "ktrace_api_request_duration_seconds",
        "Cluster API request latency",
        &["operation"]
    ).expect("failed to register API_REQUEST_DURATION metric");
}

/// Encode every registered metric in the Prometheus text format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
