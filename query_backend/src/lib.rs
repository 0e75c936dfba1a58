//! The block reader: serves multi-tenant queries over immutable blocks.
//!
//! A single [`BlockReader::invoke`] call may span multiple blocks (objects);
//! querying an object involves processing its datasets in parallel, and each
//! dataset is evaluated against every query kind of the request:
//!
//! ```text
//! object-a    dataset-a   label_names
//!                         pprof
//!             dataset-b   label_names
//!                         pprof
//! object-b    dataset-a   label_names
//!                         pprof
//! ```
//!
//! Datasets whose tenant is outside the caller's tenant set are dropped
//! (logged and counted), never queried.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

mod aggregator;
mod querier;
mod reader;

pub use querier::{
    BlocksQuerier, CandidateProfile, ProfileCandidates, ProfileQuerier, SelectProfilesRequest,
};
pub use reader::{BlockReader, ReaderMetrics};

use data_types::{Labels, ProfileType};

use block::BlockMeta;

/// Errors surfaced by block queries.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The request is malformed; retrying is pointless.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("block fetch failed: {0}")]
    Storage(#[from] objstore::BucketError),

    #[error(transparent)]
    Block(#[from] block::BlockError),

    #[error("internal query failure: {0}")]
    Internal(String),
}

/// One query kind to evaluate against the selected datasets.
#[derive(Debug, Clone)]
pub enum Query {
    /// All label names of matching series.
    LabelNames,
    /// All values of one label across matching series.
    LabelValues { name: String },
    /// The distinct label sets of matching series.
    SeriesLabels,
    /// Samples of the given profile type, merged into one pprof profile.
    Pprof { profile_type: ProfileType },
}

/// A query over a set of blocks.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Tenants the caller is authorised for. Never empty.
    pub tenants: Vec<String>,
    /// Unix milliseconds, inclusive.
    pub start_time: i64,
    /// Unix milliseconds, inclusive.
    pub end_time: i64,
    /// PromQL-style series selector.
    pub label_selector: String,
    /// Query kinds to evaluate; responses align by index.
    pub query: Vec<Query>,
    /// Blocks to visit.
    pub query_plan: Vec<BlockMeta>,
}

/// Per-kind results, aligned with [`InvokeRequest::query`].
#[derive(Debug, PartialEq)]
pub enum Report {
    LabelNames(Vec<String>),
    LabelValues(Vec<String>),
    SeriesLabels(Vec<Labels>),
    /// Encoded pprof profile.
    Pprof(Vec<u8>),
}

/// The combined response of one invoke.
#[derive(Debug)]
pub struct InvokeResponse {
    pub reports: Vec<Report>,
}
