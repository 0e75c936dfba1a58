//! The segment-oriented write path.
//!
//! ```text
//!  Push ──▶ route(tenant, shard) ──▶ SegmentBuffer.append
//!                                          │  (age / size / shutdown)
//!                                          ▼
//!                                     Flusher.seal
//!                                          │ serialize datasets
//!                                          ▼
//!                                    Upload (hedged)
//!                                          │
//!                              ┌───────────┴───────────┐
//!                              ▼                       ▼
//!                          AddBlock ──failure──▶  DLQ entry
//!                              │                       │
//!                              ▼                       ▼
//!                         index visible          Recovery loop
//! ```
//!
//! Many producers fan in to the current segment of their shard. Each ingest
//! returns a [`FlushWaiter`]; all waiters of one segment resolve with the
//! same outcome. A flush is reported successful iff the block object was
//! uploaded AND its metadata was either registered with the index or parked
//! in the DLQ; that is the at-least-once durability contract.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

mod backoff;
mod config;
mod flusher;
mod limiter;
pub mod memdb;
mod metrics;
mod segment;
mod upload;

pub use backoff::BackoffConfig;
pub use config::Config;
pub use metrics::SegmentMetrics;
pub use segment::{FlushWaiter, SegmentIngest, SegmentsWriter};

use metastore::IndexError;
use objstore::BucketError;

/// Errors rejecting a single profile at ingest time. These never poison the
/// segment: the offending profile is dropped, everything else proceeds.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed profile: {0}")]
    Malformed(String),
}

/// Terminal outcome of a failed segment flush. Shared by every awaiter of
/// the segment via `Arc`.
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("block upload failed: {0}")]
    Upload(#[source] BucketError),

    #[error("metadata registration failed: {0}")]
    Metadata(#[source] IndexError),

    #[error("dlq write failed: {0}")]
    Dlq(#[source] BucketError),

    #[error("{phase} deadline exceeded")]
    DeadlineExceeded { phase: &'static str },

    #[error("internal flush failure: {0}")]
    Internal(String),
}

impl FlushError {
    /// Whether the flush failed by exhausting a deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
