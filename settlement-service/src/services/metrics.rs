//! Prometheus metrics for settlement-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Ingested payment counter by outcome (settled, duplicate, unmatched, rejected).
pub static PAYMENTS_INGESTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_payments_ingested_total",
        "Total number of ingested payment events by outcome",
        &["outcome"]
    )
    .expect("Failed to register payments_ingested_total")
});

/// Amount applied to invoices vs held as credit.
pub static ALLOCATED_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_allocated_amount_total",
        "Total payment amount by allocation target",
        &["target"] // invoice, credit
    )
    .expect("Failed to register allocated_amount_total")
});

/// Receipt counter.
pub static RECEIPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_receipts_total",
        "Total number of receipts issued",
        &["source"] // ingest, claim
    )
    .expect("Failed to register receipts_total")
});

/// Notification dispatch counter by status.
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_notifications_total",
        "Total number of customer notifications by delivery status",
        &["status"] // sent, failed, disabled
    )
    .expect("Failed to register notifications_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "settlement_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "settlement_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&PAYMENTS_INGESTED_TOTAL);
    Lazy::force(&ALLOCATED_AMOUNT_TOTAL);
    Lazy::force(&RECEIPTS_TOTAL);
    Lazy::force(&NOTIFICATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
