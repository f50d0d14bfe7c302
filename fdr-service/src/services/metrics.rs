//! Prometheus metrics for fdr-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for batch passes by trigger and result.
pub static BATCH_PASSES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fdr_batch_passes_total",
        "Total number of batch passes",
        &["trigger", "result"]
    )
    .expect("Failed to register BATCH_PASSES")
});

/// Histogram for batch pass duration.
pub static BATCH_PASS_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fdr_batch_pass_duration_seconds",
        "Batch pass duration in seconds",
        &["trigger"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register BATCH_PASS_DURATION")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "fdr_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for staging rows by outcome (accepted, anomalous, duplicate, failed).
pub static FLOW_OUTCOMES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fdr_flow_outcomes_total",
        "Total number of staged flows handled, by outcome",
        &["outcome"]
    )
    .expect("Failed to register FLOW_OUTCOMES")
});

/// Counter for reconciliation entries by status.
pub static RECONCILIATION_ENTRIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fdr_reconciliation_entries_total",
        "Total number of reconciliation entries written",
        &["status"]
    )
    .expect("Failed to register RECONCILIATION_ENTRIES")
});

/// Counter for event manager deliveries.
pub static EVENT_DELIVERIES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "fdr_event_deliveries_total",
        "Total number of event manager deliveries",
        &["result"]
    )
    .expect("Failed to register EVENT_DELIVERIES")
});

/// Counter for HTTP requests by method, path and status.
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUESTS_TOTAL")
});

pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path", "status"]
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&BATCH_PASSES);
    Lazy::force(&BATCH_PASS_DURATION);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&FLOW_OUTCOMES);
    Lazy::force(&RECONCILIATION_ENTRIES);
    Lazy::force(&EVENT_DELIVERIES);
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a finished batch pass.
pub fn record_batch_pass(trigger: &str, result: &str, duration_secs: f64) {
    BATCH_PASSES.with_label_values(&[trigger, result]).inc();
    BATCH_PASS_DURATION
        .with_label_values(&[trigger])
        .observe(duration_secs);
}

/// Record how a staging row was handled.
pub fn record_flow_outcome(outcome: &str) {
    FLOW_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Record a written reconciliation entry.
pub fn record_reconciliation_entry(status: &str) {
    RECONCILIATION_ENTRIES.with_label_values(&[status]).inc();
}

/// Record an event manager delivery attempt.
pub fn record_event_delivery(result: &str) {
    EVENT_DELIVERIES.with_label_values(&[result]).inc();
}

pub fn record_http_request(method: &str, path: &str, status: &str, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[method, path, status])
        .observe(duration_secs);
}
