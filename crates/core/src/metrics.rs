//! Prometheus metrics for the migration engine.
//!
//! This module provides metrics for:
//! - Orchestrator (items completed, failed, workers running)
//! - Relay (segment uploads, retries, rate limits, endpoint rotations)
//! - Transcoder (encode durations)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Items that produced a manifest and were checkpointed.
pub static ITEMS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("segrelay_items_completed_total", "Total items migrated").unwrap()
});

/// Items whose worker exited without a manifest.
pub static ITEMS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("segrelay_items_failed_total", "Total items that failed"),
        &["stage"], // "download", "archive", "transcode", "upload", "other"
    )
    .unwrap()
});

/// Workers currently running.
pub static WORKERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("segrelay_workers_active", "Number of workers currently running").unwrap()
});

// =============================================================================
// Relay
// =============================================================================

/// Segment uploads by outcome.
pub static SEGMENT_UPLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("segrelay_segment_uploads_total", "Total segment upload attempts"),
        &["result"], // "success", "transient", "rate_limited", "rejected"
    )
    .unwrap()
});

/// Retries scheduled after a transient failure.
pub static UPLOAD_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("segrelay_upload_retries_total", "Total segment upload retries").unwrap()
});

/// Rate-limit responses received from the relay.
pub static RATE_LIMIT_HITS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("segrelay_rate_limit_hits_total", "Total rate-limit responses").unwrap()
});

/// Active endpoint rotations.
pub static ENDPOINT_ROTATIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "segrelay_endpoint_rotations_total",
        "Total relay endpoint rotations",
    )
    .unwrap()
});

// =============================================================================
// Transcoder
// =============================================================================

/// Transcode duration in seconds.
pub static TRANSCODE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "segrelay_transcode_duration_seconds",
            "Duration of video transcodes",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(ITEMS_COMPLETED.clone()),
        Box::new(ITEMS_FAILED.clone()),
        Box::new(WORKERS_ACTIVE.clone()),
        // Relay
        Box::new(SEGMENT_UPLOADS.clone()),
        Box::new(UPLOAD_RETRIES.clone()),
        Box::new(RATE_LIMIT_HITS.clone()),
        Box::new(ENDPOINT_ROTATIONS.clone()),
        // Transcoder
        Box::new(TRANSCODE_DURATION.clone()),
    ]
}

fn register_metrics(registry: &Registry) {
    for metric in all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
