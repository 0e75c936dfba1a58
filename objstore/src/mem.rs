//! An in-memory [`Bucket`] for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{Bucket, BucketError};

/// A thread-safe in-memory bucket backed by a sorted map, so `iter` order
/// matches what real object stores return.
#[derive(Debug, Default)]
pub struct InMemBucket {
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl InMemBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// A point-in-time snapshot of all stored objects, for assertions.
    pub fn objects(&self) -> BTreeMap<String, Bytes> {
        self.objects.lock().clone()
    }
}

#[async_trait]
impl Bucket for InMemBucket {
    async fn upload(&self, path: &str, body: Bytes) -> Result<(), BucketError> {
        self.objects.lock().insert(path.to_string(), body);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BucketError> {
        self.objects
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| BucketError::NotFound {
                path: path.to_string(),
            })
    }

    async fn iter(&self, prefix: &str) -> Result<Vec<String>, BucketError> {
        Ok(self
            .objects
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, path: &str) -> Result<(), BucketError> {
        self.objects.lock().remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn iter_is_prefix_scoped_and_sorted() {
        let bucket = InMemBucket::new();
        for path in ["dlq/2/x", "dlq/1/y", "segments/1/z", "dlq/1/a"] {
            bucket.upload(path, Bytes::from_static(b"v")).await.unwrap();
        }
        assert_eq!(
            bucket.iter("dlq/").await.unwrap(),
            ["dlq/1/a", "dlq/1/y", "dlq/2/x"]
        );
        assert_eq!(bucket.iter("segments/").await.unwrap(), ["segments/1/z"]);
        assert!(bucket.iter("nope/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_and_delete() {
        let bucket = InMemBucket::new();
        bucket.upload("a/b", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(bucket.get("a/b").await.unwrap(), Bytes::from_static(b"v"));
        bucket.delete("a/b").await.unwrap();
        assert!(matches!(
            bucket.get("a/b").await,
            Err(BucketError::NotFound { .. })
        ));
        // Deleting again is fine.
        bucket.delete("a/b").await.unwrap();
    }
}
