//! Hedged block upload.
//!
//! The primary upload starts immediately. If it has not finished after
//! `upload_hedge_after` and the token bucket grants it, an identical hedge
//! starts in parallel; the first success wins and the loser is dropped.
//! Failed rounds retry with backoff, all within the overall
//! `upload_timeout`.

use bytes::Bytes;
use tracing::{debug, warn};

use objstore::BucketError;

use crate::{backoff::Backoff, flusher::FlushContext, FlushError};

/// Upload one block body, hedging and retrying per configuration.
pub(crate) async fn upload_block(
    ctx: &FlushContext<'_>,
    path: &str,
    body: Bytes,
) -> Result<(), FlushError> {
    let attempts = async {
        let mut backoff = Backoff::new(&ctx.config.backoff);
        let mut attempt = 0;
        loop {
            match upload_once(ctx, path, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(path, attempt, error = %e, "block upload attempt failed");
                    if attempt >= ctx.config.upload_max_retries {
                        return Err(FlushError::Upload(e));
                    }
                    attempt += 1;
                    backoff.sleep().await;
                }
            }
        }
    };
    match tokio::time::timeout(ctx.config.upload_timeout, attempts).await {
        Ok(result) => result,
        Err(_) => Err(FlushError::DeadlineExceeded { phase: "upload" }),
    }
}

/// One upload round: primary plus, possibly, a hedge.
async fn upload_once(
    ctx: &FlushContext<'_>,
    path: &str,
    body: Bytes,
) -> Result<(), BucketError> {
    ctx.metrics.uploads.inc();
    let primary = ctx.bucket.upload(path, body.clone());
    tokio::pin!(primary);

    tokio::select! {
        result = &mut primary => return result,
        _ = tokio::time::sleep(ctx.config.upload_hedge_after) => {}
    }

    if !ctx.hedged_upload_limiter.allow() {
        // Bucket empty (or hedging disabled): the primary runs alone.
        return primary.await;
    }

    debug!(path, "starting hedged upload");
    ctx.metrics.uploads.inc();
    ctx.metrics.hedged_uploads.inc();
    let hedge = ctx.bucket.upload(path, body);
    tokio::pin!(hedge);

    // First success wins and the sibling is dropped; a lone failure defers
    // to the other attempt.
    tokio::select! {
        result = &mut primary => match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path, error = %e, "primary upload failed, awaiting hedge");
                hedge.await
            }
        },
        result = &mut hedge => match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(path, error = %e, "hedged upload failed, awaiting primary");
                primary.await
            }
        },
    }
}
