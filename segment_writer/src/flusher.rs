//! Turns a sealed segment into a registered block.
//!
//! Serialize → upload (hedged) → register metadata, with the DLQ as the
//! registration fallback. The data object is always uploaded first; the
//! metadata is either registered or parked in the DLQ, never both.

use std::sync::Arc;

use parking_lot::Mutex;
use prost::Message;
use tracing::{debug, warn};

use block::{paths, BlockWriter};
use data_types::Shard;
use metastore::IndexService;
use objstore::Bucket;

use crate::{
    backoff::Backoff, limiter::RateLimiter, memdb::Head, metrics::SegmentMetrics, upload, Config,
    FlushError,
};

/// Borrowed collaborators of one flush.
pub(crate) struct FlushContext<'a> {
    pub(crate) config: &'a Config,
    pub(crate) bucket: &'a dyn Bucket,
    pub(crate) metastore: &'a dyn IndexService,
    pub(crate) metrics: &'a SegmentMetrics,
    pub(crate) hedged_upload_limiter: &'a RateLimiter,
}

/// Flush one sealed segment.
///
/// An empty segment (no surviving heads) resolves OK without touching
/// storage.
pub(crate) async fn flush(
    ctx: FlushContext<'_>,
    shard: Shard,
    heads: Vec<((String, String), Arc<Mutex<Head>>)>,
) -> Result<(), FlushError> {
    let mut writer = BlockWriter::new(shard);
    let block_id = writer.id();
    let mut datasets = 0;
    for ((tenant, service), head) in &heads {
        let head = head.lock();
        if head.is_empty() {
            continue;
        }
        let (profiles, tsdb_index, symbols) = head.build_regions();
        writer.append_dataset(
            tenant,
            service,
            head.min_time_ms(),
            head.max_time_ms(),
            &head.label_runs(service),
            profiles,
            tsdb_index,
            symbols,
        );
        datasets += 1;
    }
    if datasets == 0 {
        return Ok(());
    }

    let (meta, body) = writer.finish();
    let path = paths::object_path(shard, block_id);
    upload::upload_block(&ctx, &path, body).await?;
    ctx.metrics.blocks_flushed.inc();

    match register_block(&ctx, &meta).await {
        Ok(()) => {
            debug!(block = %meta.id, datasets, "block registered");
            Ok(())
        }
        Err(e) if ctx.config.metadata_dlq_enabled => {
            warn!(
                block = %meta.id,
                error = %e,
                "metadata registration failed, falling back to dlq"
            );
            let dlq_path = paths::dlq_path(shard, block_id);
            ctx.bucket
                .upload(&dlq_path, meta.encode_to_vec().into())
                .await
                .map_err(FlushError::Dlq)?;
            ctx.metrics.dlq_writes.inc();
            debug!(block = %meta.id, "metadata parked in dlq");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Register metadata with the index, retrying transient failures with
/// exponential backoff until `metadata_update_timeout`. InvalidArgument is
/// terminal.
async fn register_block(
    ctx: &FlushContext<'_>,
    meta: &block::BlockMeta,
) -> Result<(), FlushError> {
    let attempt = async {
        let mut backoff = Backoff::new(&ctx.config.backoff);
        loop {
            match ctx.metastore.add_block(meta.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_invalid_argument() => return Err(FlushError::Metadata(e)),
                Err(e) => {
                    warn!(block = %meta.id, error = %e, "add_block failed, retrying");
                    backoff.sleep().await;
                }
            }
        }
    };
    match tokio::time::timeout(ctx.config.metadata_update_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(FlushError::DeadlineExceeded {
            phase: "metadata registration",
        }),
    }
}
