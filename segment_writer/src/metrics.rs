//! Write path metrics.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};

/// Counters and histograms of the segment writer. Cheap to clone; all
/// members share underlying state.
#[derive(Debug, Clone)]
pub struct SegmentMetrics {
    pub(crate) blocks_flushed: IntCounter,
    pub(crate) flush_failures: IntCounter,
    pub(crate) uploads: IntCounter,
    pub(crate) hedged_uploads: IntCounter,
    pub(crate) dlq_writes: IntCounter,
    pub(crate) flush_duration: Histogram,
}

impl SegmentMetrics {
    /// Create the metrics, registering them when a registry is provided.
    pub fn new(registry: Option<&Registry>) -> Self {
        let blocks_flushed = IntCounter::new(
            "segment_writer_blocks_flushed_total",
            "Number of blocks successfully flushed",
        )
        .expect("valid metric definition");
        let flush_failures = IntCounter::new(
            "segment_writer_flush_failures_total",
            "Number of segment flushes that failed permanently",
        )
        .expect("valid metric definition");
        let uploads = IntCounter::new(
            "segment_writer_upload_attempts_total",
            "Number of block upload attempts, including hedged ones",
        )
        .expect("valid metric definition");
        let hedged_uploads = IntCounter::new(
            "segment_writer_hedged_uploads_total",
            "Number of hedged upload attempts started",
        )
        .expect("valid metric definition");
        let dlq_writes = IntCounter::new(
            "segment_writer_metadata_dlq_writes_total",
            "Number of block metadata entries written to the DLQ",
        )
        .expect("valid metric definition");
        let flush_duration = Histogram::with_opts(HistogramOpts::new(
            "segment_writer_flush_duration_seconds",
            "Time from segment seal to flush completion",
        ))
        .expect("valid metric definition");

        if let Some(registry) = registry {
            for collector in [
                Box::new(blocks_flushed.clone()) as Box<dyn prometheus::core::Collector>,
                Box::new(flush_failures.clone()),
                Box::new(uploads.clone()),
                Box::new(hedged_uploads.clone()),
                Box::new(dlq_writes.clone()),
                Box::new(flush_duration.clone()),
            ] {
                // Double registration only happens in tests sharing a
                // registry; losing the duplicate is fine.
                let _ = registry.register(collector);
            }
        }

        Self {
            blocks_flushed,
            flush_failures,
            uploads,
            hedged_uploads,
            dlq_writes,
            flush_duration,
        }
    }
}
