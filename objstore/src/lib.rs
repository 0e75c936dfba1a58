//! The object bucket abstraction shared by the write and read paths.
//!
//! Components are polymorphic over [`Bucket`], a deliberately small
//! capability set: upload, get, iterate a prefix, delete. Tests run against
//! [`mem::InMemBucket`]; production wires [`store::ObjectStoreBucket`], an
//! adapter over the `object_store` crate's backends.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;

pub mod mem;
pub mod store;

pub use mem::InMemBucket;
pub use store::ObjectStoreBucket;

/// Errors returned by bucket operations.
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    #[error("object not found: {path}")]
    NotFound { path: String },

    #[error("object store failure for {path:?}: {message}")]
    Backend { path: String, message: String },
}

/// Minimal object-storage capability set.
///
/// Implementations must be safe for concurrent use; blocks written through a
/// bucket are immutable once uploaded.
#[async_trait]
pub trait Bucket: Debug + Send + Sync + 'static {
    /// Store `body` at `path`, replacing any existing object.
    async fn upload(&self, path: &str, body: Bytes) -> Result<(), BucketError>;

    /// Fetch the object at `path`.
    async fn get(&self, path: &str) -> Result<Bytes, BucketError>;

    /// List object paths under `prefix` in lexicographic order.
    async fn iter(&self, prefix: &str) -> Result<Vec<String>, BucketError>;

    /// Delete the object at `path`. Deleting a missing object is not an
    /// error.
    async fn delete(&self, path: &str) -> Result<(), BucketError>;
}
