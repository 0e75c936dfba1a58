//! The immutable block object format.
//!
//! A block is a single object in object storage holding one dataset per
//! `(tenant, service)` pair. Each dataset is three concatenated regions:
//!
//! ```text
//! ┌──────────────────────── block object ────────────────────────┐
//! │ dataset 0                  dataset 1              footer     │
//! │ ┌────────┬──────┬───────┐ ┌────────┬──────┬────┐ ┌────────┐  │
//! │ │profiles│ tsdb │symbols│ │profiles│ tsdb │ …  │ │meta.pb │  │
//! │ └────────┴──────┴───────┘ └────────┴──────┴────┘ │len│magic  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The per-dataset table of contents records the three absolute byte offsets;
//! the trailing footer carries the block-level [`BlockMeta`] (string table
//! and dataset descriptors), making each object self-describing.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

pub mod format;
pub mod meta;
pub mod paths;
pub mod reader;
pub mod writer;

pub use meta::{BlockMeta, Dataset, StringTable};
pub use reader::{read_footer, BlockObject, DatasetReader};
pub use writer::BlockWriter;

/// Errors raised while reading or validating block objects.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("block object fetch failed: {0}")]
    Bucket(#[from] objstore::BucketError),

    #[error("block region does not decode: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("corrupt block object: {0}")]
    Corrupt(String),
}
