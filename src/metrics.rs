//! Metrics and telemetry for the template compressor
//!
//! Process-wide Prometheus collectors. They are diagnostic only: nothing in
//! the engine reads them back, so independent runs stay independent.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // === Run Counters ===

    /// Completed compression runs
    pub static ref RUNS_TOTAL: CounterVec = register_counter_vec!(
        "tsdict_runs_total",
        "Total compression runs by window mode",
        &["mode"]
    ).unwrap();

    /// Processed blocks
    pub static ref BLOCKS_TOTAL: CounterVec = register_counter_vec!(
        "tsdict_blocks_total",
        "Total processed blocks by match outcome",
        &["outcome"]
    ).unwrap();

    // === Template Lifecycle ===

    /// Template store events
    pub static ref TEMPLATE_EVENTS: CounterVec = register_counter_vec!(
        "tsdict_template_events_total",
        "Template lifecycle events by kind",
        &["event"]
    ).unwrap();

    // === Block Size Controller ===

    /// Block size decisions
    pub static ref BLOCK_SIZE_ADJUSTMENTS: CounterVec = register_counter_vec!(
        "tsdict_block_size_adjustments_total",
        "Block size adjustments by direction",
        &["direction"]
    ).unwrap();

    // === Result Histograms ===

    /// Estimated compression ratio per run
    pub static ref COMPRESSION_RATIO: Histogram = register_histogram!(
        "tsdict_compression_ratio",
        "Estimated compression ratio per run",
        vec![1.0, 1.5, 2.0, 3.0, 5.0, 10.0, 20.0, 50.0]
    ).unwrap();

    /// Run duration
    pub static ref RUN_DURATION: HistogramVec = register_histogram_vec!(
        "tsdict_run_duration_seconds",
        "Compression run latency in seconds",
        &["mode"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}

/// Kinds of template lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateEvent {
    /// New template inserted from a block
    Created,
    /// Archived template restored under a new id
    Resurrected,
    /// Template absorbed into a near-duplicate
    Merged,
    /// Template removed from the active store
    Evicted,
    /// Archived template dropped for good
    ArchiveDropped,
}

impl TemplateEvent {
    /// Label value used for this event
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateEvent::Created => "created",
            TemplateEvent::Resurrected => "resurrected",
            TemplateEvent::Merged => "merged",
            TemplateEvent::Evicted => "evicted",
            TemplateEvent::ArchiveDropped => "archive_dropped",
        }
    }
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record one processed block
#[inline]
pub fn record_block(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    BLOCKS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record template lifecycle events
#[inline]
pub fn record_template_event(event: TemplateEvent, count: usize) {
    if count == 0 {
        return;
    }
    TEMPLATE_EVENTS
        .with_label_values(&[event.as_str()])
        .inc_by(count as f64);
}

/// Record a block size decision
#[inline]
pub fn record_block_size_adjustment(old_size: usize, new_size: usize) {
    let direction = match new_size.cmp(&old_size) {
        std::cmp::Ordering::Greater => "increase",
        std::cmp::Ordering::Less => "decrease",
        std::cmp::Ordering::Equal => "unchanged",
    };
    BLOCK_SIZE_ADJUSTMENTS.with_label_values(&[direction]).inc();
}

/// Record a finished run
#[inline]
pub fn record_run(mode: &str, compression_ratio: f64, duration_secs: f64) {
    RUNS_TOTAL.with_label_values(&[mode]).inc();
    RUN_DURATION.with_label_values(&[mode]).observe(duration_secs);
    if compression_ratio.is_finite() {
        COMPRESSION_RATIO.observe(compression_ratio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_block() {
        record_block(true);
        record_block(false);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("tsdict_blocks_total"));
    }

    #[test]
    fn test_template_event_labels() {
        let labels = [
            TemplateEvent::Created,
            TemplateEvent::Resurrected,
            TemplateEvent::Merged,
            TemplateEvent::Evicted,
            TemplateEvent::ArchiveDropped,
        ]
        .map(|e| e.as_str());
        let mut unique = labels.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), labels.len());

        record_template_event(TemplateEvent::Created, 1);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("tsdict_template_events_total"));
    }

    #[test]
    fn test_gather_metrics() {
        record_run("flat", 4.0, 0.01);
        record_block_size_adjustment(10, 15);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("tsdict_runs_total"));
        assert!(metrics.contains("tsdict_compression_ratio"));
        assert!(metrics.contains("tsdict_block_size_adjustments_total"));
    }
}
