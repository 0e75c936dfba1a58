//! Clients and collaborators of the external metadata index.
//!
//! The metastore cluster itself (consensus, index layout) is an external
//! system; this crate holds the capability trait the write and read paths
//! consume, an in-memory implementation for tests, the DLQ recovery loop
//! that replays metadata the primary registration path failed to publish,
//! and the Kubernetes discovery adapter that resolves metastore peers.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

mod client;
pub mod discovery;
pub mod dlq;
pub mod mem;

pub use client::{IndexError, IndexService, QueryMetadataRequest};
pub use dlq::{Recovery, RecoveryConfig};
pub use mem::MemIndexService;
