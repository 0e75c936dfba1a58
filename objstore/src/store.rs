//! [`Bucket`] adapter over the `object_store` crate.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectStore, PutPayload};

use crate::{Bucket, BucketError};

/// Adapts any [`ObjectStore`] backend (S3, GCS, Azure, local filesystem, …)
/// to the [`Bucket`] capability set.
#[derive(Debug)]
pub struct ObjectStoreBucket {
    inner: Arc<dyn ObjectStore>,
}

impl ObjectStoreBucket {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }
}

fn map_err(path: &str, e: object_store::Error) -> BucketError {
    match e {
        object_store::Error::NotFound { .. } => BucketError::NotFound {
            path: path.to_string(),
        },
        other => BucketError::Backend {
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Bucket for ObjectStoreBucket {
    async fn upload(&self, path: &str, body: Bytes) -> Result<(), BucketError> {
        self.inner
            .put(&Path::from(path), PutPayload::from(body))
            .await
            .map(|_| ())
            .map_err(|e| map_err(path, e))
    }

    async fn get(&self, path: &str) -> Result<Bytes, BucketError> {
        let result = self
            .inner
            .get(&Path::from(path))
            .await
            .map_err(|e| map_err(path, e))?;
        result.bytes().await.map_err(|e| map_err(path, e))
    }

    async fn iter(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        let prefix_path = Path::from(prefix.trim_end_matches('/'));
        let mut paths: Vec<String> = self
            .inner
            .list(Some(&prefix_path))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .map_err(|e| map_err(prefix, e))?;
        // Backends do not all guarantee listing order.
        paths.sort();
        Ok(paths)
    }

    async fn delete(&self, path: &str) -> Result<(), BucketError> {
        match self.inner.delete(&Path::from(path)).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_err(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn round_trip_through_object_store_backend() {
        let bucket = ObjectStoreBucket::new(Arc::new(InMemory::new()));
        bucket
            .upload("segments/1/anonymous/x/block.bin", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(
            bucket.get("segments/1/anonymous/x/block.bin").await.unwrap(),
            Bytes::from_static(b"data")
        );
        assert_eq!(
            bucket.iter("segments/").await.unwrap(),
            ["segments/1/anonymous/x/block.bin"]
        );
        bucket.delete("segments/1/anonymous/x/block.bin").await.unwrap();
        assert!(bucket.iter("segments/").await.unwrap().is_empty());
    }
}
