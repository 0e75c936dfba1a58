//! Write path configuration.

use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Configuration of the segment writer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wall-clock age at which a segment is sealed and flushed.
    pub segment_duration: Duration,

    /// Number of ingest calls that seals a segment before its timer fires.
    /// Zero disables size-based sealing.
    pub max_pending_ingests: usize,

    /// Number of segments that may flush concurrently; further sealed
    /// segments queue.
    pub flush_concurrency: usize,

    /// Overall deadline for uploading one block, covering the primary
    /// attempt, any hedge, and retries.
    pub upload_timeout: Duration,

    /// Delay before a hedged upload may start.
    pub upload_hedge_after: Duration,

    /// Token-bucket refill rate for hedged uploads, per second. Zero
    /// disables hedging.
    pub upload_hedge_rate_max: f64,

    /// Token-bucket burst for hedged uploads.
    pub upload_hedge_rate_burst: usize,

    /// Upload retry attempts after the first failure.
    pub upload_max_retries: usize,

    /// Overall deadline for registering block metadata with the index.
    pub metadata_update_timeout: Duration,

    /// Whether metadata falls back to the DLQ when registration fails.
    pub metadata_dlq_enabled: bool,

    /// Backoff applied between retries of uploads and metadata registration.
    pub backoff: BackoffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_duration: Duration::from_millis(500),
            max_pending_ingests: 0,
            flush_concurrency: 8,
            upload_timeout: Duration::from_secs(10),
            upload_hedge_after: Duration::from_secs(2),
            upload_hedge_rate_max: 0.0,
            upload_hedge_rate_burst: 0,
            upload_max_retries: 3,
            metadata_update_timeout: Duration::from_secs(2),
            metadata_dlq_enabled: false,
            backoff: BackoffConfig::default(),
        }
    }
}
