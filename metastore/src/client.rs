//! The metadata index capability set.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use block::BlockMeta;

/// Errors returned by the metadata index.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    /// The request itself is unacceptable; retrying is pointless.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A transient failure; the caller may retry within its deadline.
    #[error("index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    /// Whether this error is terminal for retry purposes.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

/// A metadata query: which tenants, which time range (unix milliseconds,
/// inclusive), and which series, as a PromQL-style selector over dataset
/// labels.
#[derive(Debug, Clone)]
pub struct QueryMetadataRequest {
    pub tenants: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub query: String,
}

/// Operations consumed from the external metadata index service.
#[async_trait]
pub trait IndexService: Debug + Send + Sync + 'static {
    /// Publish a freshly-uploaded block's metadata.
    async fn add_block(&self, meta: BlockMeta) -> Result<(), IndexError>;

    /// Re-publish metadata recovered from the DLQ. Must be idempotent: a
    /// re-submission with identical content is success.
    async fn add_recovered_block(&self, meta: BlockMeta) -> Result<(), IndexError>;

    /// Find blocks with datasets matching the request.
    async fn query_metadata(
        &self,
        request: QueryMetadataRequest,
    ) -> Result<Vec<BlockMeta>, IndexError>;
}

#[async_trait]
impl<T: IndexService> IndexService for Arc<T> {
    async fn add_block(&self, meta: BlockMeta) -> Result<(), IndexError> {
        (**self).add_block(meta).await
    }

    async fn add_recovered_block(&self, meta: BlockMeta) -> Result<(), IndexError> {
        (**self).add_recovered_block(meta).await
    }

    async fn query_metadata(
        &self,
        request: QueryMetadataRequest,
    ) -> Result<Vec<BlockMeta>, IndexError> {
        (**self).query_metadata(request).await
    }
}
