use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Write Path Metrics
    // ============================================================================

    /// Records appended to a batch file
    pub static ref RECORDS_WRITTEN_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kusto_sink_records_written_total", "Total records appended to batch files"),
        &["topic"]
    ).expect("metric can be created");

    /// Records rejected before reaching a batch
    pub static ref RECORD_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kusto_sink_record_errors_total", "Total records rejected by the writer"),
        &["topic", "error_type"]
    ).expect("metric can be created");

    /// Batches finalized, labelled by what triggered the roll
    pub static ref BATCH_ROLLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kusto_sink_batch_rolls_total", "Total batches rolled"),
        &["topic", "partition", "trigger"]
    ).expect("metric can be created");

    /// Size of finalized batch files
    pub static ref BATCH_SIZE_BYTES: HistogramVec = HistogramVec::new(
        HistogramOpts::new("kusto_sink_batch_size_bytes", "Finalized batch size in bytes")
            .buckets(vec![
                1024.0,
                16_384.0,
                131_072.0,
                1_048_576.0,
                8_388_608.0,
                67_108_864.0,
                268_435_456.0,
            ]),
        &["topic"]
    ).expect("metric can be created");

    /// Active partition writers
    pub static ref ACTIVE_WRITERS: IntGauge = IntGauge::new(
        "kusto_sink_active_writers", "Open partition writers"
    ).expect("metric can be created");

    // ============================================================================
    // Ingestion Metrics
    // ============================================================================

    /// Ingestion submissions by outcome (accepted, failed, abandoned)
    pub static ref INGESTION_SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("kusto_sink_ingestion_submissions_total", "Total ingestion submissions"),
        &["table", "result"]
    ).expect("metric can be created");

    /// Time for the backend to accept a file
    pub static ref INGESTION_LATENCY: HistogramVec = HistogramVec::new(
        HistogramOpts::new("kusto_sink_ingestion_latency_seconds", "Ingestion acceptance latency in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["table"]
    ).expect("metric can be created");

    /// Submissions in flight or waiting on a caller decision
    pub static ref PENDING_INGESTIONS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("kusto_sink_pending_ingestions", "Pending ingestions per partition"),
        &["topic", "partition"]
    ).expect("metric can be created");
}

/// Register every metric with [`REGISTRY`]. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        // Write path metrics
        REGISTRY
            .register(Box::new(RECORDS_WRITTEN_TOTAL.clone()))
            .expect("records_written_total can be registered");
        REGISTRY
            .register(Box::new(RECORD_ERRORS_TOTAL.clone()))
            .expect("record_errors_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_ROLLS_TOTAL.clone()))
            .expect("batch_rolls_total can be registered");
        REGISTRY
            .register(Box::new(BATCH_SIZE_BYTES.clone()))
            .expect("batch_size_bytes can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_WRITERS.clone()))
            .expect("active_writers can be registered");

        // Ingestion metrics
        REGISTRY
            .register(Box::new(INGESTION_SUBMISSIONS_TOTAL.clone()))
            .expect("ingestion_submissions_total can be registered");
        REGISTRY
            .register(Box::new(INGESTION_LATENCY.clone()))
            .expect("ingestion_latency can be registered");
        REGISTRY
            .register(Box::new(PENDING_INGESTIONS.clone()))
            .expect("pending_ingestions can be registered");
    });
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
