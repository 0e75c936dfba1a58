//! Dead-letter queue recovery.
//!
//! When the write path cannot register a block with the index, it parks the
//! serialized metadata under the well-known `dlq/` prefix in object storage.
//! The recovery loop (typically driven by the metastore leader) periodically
//! scans that prefix in lexicographic order (with time-ordered block ids,
//! that approximates time order), re-registers each entry, and deletes it on
//! success.

use std::{sync::Arc, time::Duration};

use block::{paths, BlockMeta};
use objstore::Bucket;
use prost::Message;
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::IndexService;

/// Configuration of the recovery loop.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often the DLQ prefix is scanned.
    pub check_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
        }
    }
}

/// The DLQ recovery loop.
#[derive(Debug)]
pub struct Recovery {
    config: RecoveryConfig,
    index: Arc<dyn IndexService>,
    bucket: Arc<dyn Bucket>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Recovery {
    pub fn new(
        config: RecoveryConfig,
        index: Arc<dyn IndexService>,
        bucket: Arc<dyn Bucket>,
    ) -> Self {
        Self {
            config,
            index,
            bucket,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the background scan loop.
    pub fn start(&self) {
        let index = Arc::clone(&self.index);
        let bucket = Arc::clone(&self.bucket);
        let interval = self.config.check_interval;
        let shutdown = self.shutdown.clone();
        self.tasks.spawn(async move {
            info!(?interval, "dlq recovery started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("dlq recovery stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
                recover_tick(&*index, &*bucket).await;
            }
        });
    }

    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

/// One full scan of the DLQ prefix.
///
/// Entries are replayed in lexicographic order; the scan stops at the first
/// failed re-registration so replay order is preserved across ticks.
async fn recover_tick(index: &dyn IndexService, bucket: &dyn Bucket) {
    let entries = match bucket.iter(&paths::dlq_prefix()).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "dlq scan failed");
            return;
        }
    };

    for path in entries.iter().filter(|p| paths::is_dlq_path(p)) {
        let raw = match bucket.get(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path, error = %e, "failed to read dlq entry");
                return;
            }
        };
        let meta = match BlockMeta::decode(raw) {
            Ok(meta) => meta,
            Err(e) => {
                // Left in place: an operator needs to look at it.
                warn!(path, error = %e, "dlq entry does not decode, skipping");
                continue;
            }
        };
        let block_id = meta.id.clone();
        if let Err(e) = index.add_recovered_block(meta).await {
            warn!(path, block = %block_id, error = %e, "failed to recover dlq entry");
            return;
        }
        if let Err(e) = bucket.delete(path).await {
            // The next tick re-submits; add_recovered_block is idempotent.
            warn!(path, error = %e, "failed to delete recovered dlq entry");
            return;
        }
        debug!(block = %block_id, "recovered block from dlq");
    }
}
