//! Segments: per-(shard, age window) staging of incoming profiles.
//!
//! Producers fan in to the current segment of their shard; a driver task per
//! segment seals it on age, size, or shutdown, and hands it to the flusher on
//! a bounded worker pool. Every ingest returns a [`FlushWaiter`] resolving
//! with the flush outcome shared by the whole segment.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::sync::{oneshot, Notify, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error};

use data_types::{Labels, ProfileId, Shard};
use metastore::IndexService;
use objstore::Bucket;
use pprof::Profile;

use crate::{
    flusher::{self, FlushContext},
    limiter::RateLimiter,
    memdb::Head,
    metrics::SegmentMetrics,
    Config, FlushError, IngestError,
};

/// The view of a segment handed to the ingest closure.
pub trait SegmentIngest {
    /// Ingest one decoded profile under `tenant`. The dataset is chosen by
    /// the profile's `service_name` label; profiles with duplicate IDs
    /// within the segment are silently dropped.
    fn ingest(
        &mut self,
        tenant: &str,
        profile: Profile,
        id: ProfileId,
        labels: Labels,
        annotations: Vec<String>,
    ) -> Result<(), IngestError>;
}

/// Resolves when the flush of the containing segment terminates.
///
/// All waiters of one segment share the same outcome value; waiting is
/// idempotent.
#[derive(Clone)]
pub struct FlushWaiter {
    inner: Shared<BoxFuture<'static, Result<(), Arc<FlushError>>>>,
}

impl std::fmt::Debug for FlushWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushWaiter").finish_non_exhaustive()
    }
}

impl FlushWaiter {
    fn new(rx: oneshot::Receiver<Result<(), Arc<FlushError>>>) -> Self {
        let inner = rx
            .map(|r| match r {
                Ok(outcome) => outcome,
                // The driver panicked or was aborted before resolving.
                Err(_) => Err(Arc::new(FlushError::Internal(
                    "segment flusher terminated".into(),
                ))),
            })
            .boxed()
            .shared();
        Self { inner }
    }

    /// Wait for the segment's flush to terminate, successfully or not.
    pub async fn wait_flushed(&self) -> Result<(), Arc<FlushError>> {
        self.inner.clone().await
    }
}

type HeadKey = (String, String);

pub(crate) struct Segment {
    shard: Shard,
    heads: Mutex<BTreeMap<HeadKey, Arc<Mutex<Head>>>>,
    // Segment-scoped profile ID dedup.
    seen: Mutex<HashSet<ProfileId>>,
    // Ingest closures currently inside this segment.
    inflight: AtomicUsize,
    drained: Notify,
    // Total ingest calls, for size-based sealing.
    pending: AtomicUsize,
    seal: Notify,
    waiter: FlushWaiter,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}

impl Segment {
    fn new(shard: Shard) -> (Arc<Self>, oneshot::Sender<Result<(), Arc<FlushError>>>) {
        let (tx, rx) = oneshot::channel();
        let segment = Arc::new(Self {
            shard,
            heads: Mutex::new(BTreeMap::new()),
            seen: Mutex::new(HashSet::new()),
            inflight: AtomicUsize::new(0),
            drained: Notify::new(),
            pending: AtomicUsize::new(0),
            seal: Notify::new(),
            waiter: FlushWaiter::new(rx),
        });
        (segment, tx)
    }

    fn head(&self, tenant: &str, service: &str) -> Arc<Mutex<Head>> {
        let mut heads = self.heads.lock();
        Arc::clone(
            heads
                .entry((tenant.to_string(), service.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(Head::new()))),
        )
    }

    fn take_heads(&self) -> Vec<(HeadKey, Arc<Mutex<Head>>)> {
        std::mem::take(&mut *self.heads.lock()).into_iter().collect()
    }
}

// Decrements the in-flight count even if the ingest closure panics, so the
// driver's drain never hangs on a poisoned producer.
struct InflightGuard<'a> {
    segment: &'a Segment,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.segment.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.segment.drained.notify_waiters();
        }
    }
}

struct SegmentIngestProxy<'a> {
    segment: &'a Segment,
}

impl SegmentIngest for SegmentIngestProxy<'_> {
    fn ingest(
        &mut self,
        tenant: &str,
        profile: Profile,
        id: ProfileId,
        labels: Labels,
        annotations: Vec<String>,
    ) -> Result<(), IngestError> {
        if tenant.is_empty() {
            return Err(IngestError::Malformed("tenant id is empty".into()));
        }
        if !self.segment.seen.lock().insert(id) {
            debug!(%id, "dropping duplicate profile");
            return Ok(());
        }
        let service = labels
            .get(data_types::labels::LABEL_NAME_SERVICE)
            .unwrap_or("");
        let head = self.segment.head(tenant, service);
        let mut head = head.lock();
        head.ingest(&profile, id, &labels, &annotations)
    }
}

struct Inner {
    config: Config,
    bucket: Arc<dyn Bucket>,
    metastore: Arc<dyn IndexService>,
    metrics: SegmentMetrics,
    hedged_upload_limiter: RateLimiter,
    shards: Mutex<HashMap<Shard, Arc<Segment>>>,
    flush_permits: Arc<Semaphore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentsWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The segment-oriented write path: accepts profiles from many concurrent
/// producers, groups them into per-shard segments, and flushes sealed
/// segments into immutable blocks.
#[derive(Debug, Clone)]
pub struct SegmentsWriter {
    inner: Arc<Inner>,
}

impl SegmentsWriter {
    pub fn new(
        config: Config,
        registry: Option<&Registry>,
        bucket: Arc<dyn Bucket>,
        metastore: Arc<dyn IndexService>,
    ) -> Self {
        let metrics = SegmentMetrics::new(registry);
        let hedged_upload_limiter = RateLimiter::new(
            config.upload_hedge_rate_max,
            config.upload_hedge_rate_burst,
        );
        let flush_permits = Arc::new(Semaphore::new(config.flush_concurrency.max(1)));
        Self {
            inner: Arc::new(Inner {
                config,
                bucket,
                metastore,
                metrics,
                hedged_upload_limiter,
                shards: Mutex::new(HashMap::new()),
                flush_permits,
                tasks: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Run `f` against the current segment of `shard`, creating the segment
    /// on first use. Returns the segment's flush waiter.
    ///
    /// Must be called within a tokio runtime: segment creation spawns the
    /// driver task that seals and flushes it.
    pub fn ingest<F>(&self, shard: Shard, f: F) -> FlushWaiter
    where
        F: FnOnce(&mut dyn SegmentIngest),
    {
        let segment = {
            let mut shards = self.inner.shards.lock();
            let segment = match shards.get(&shard) {
                Some(segment) => Arc::clone(segment),
                None => {
                    let (segment, outcome) = Segment::new(shard);
                    shards.insert(shard, Arc::clone(&segment));
                    self.spawn_driver(Arc::clone(&segment), outcome);
                    segment
                }
            };
            // Incremented under the map lock: the driver detaches the
            // segment from the map before checking for in-flight ingests.
            segment.inflight.fetch_add(1, Ordering::AcqRel);
            segment
        };

        let _inflight = InflightGuard { segment: &segment };
        let mut proxy = SegmentIngestProxy { segment: &segment };
        f(&mut proxy);

        let max_pending = self.inner.config.max_pending_ingests;
        let pending = segment.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if max_pending > 0 && pending >= max_pending {
            segment.seal.notify_one();
        }

        segment.waiter.clone()
    }

    /// Seal and flush all current segments and wait for outstanding flushes.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn spawn_driver(
        &self,
        segment: Arc<Segment>,
        outcome: oneshot::Sender<Result<(), Arc<FlushError>>>,
    ) {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            // Sealing: age, size threshold, or shutdown, whichever first.
            tokio::select! {
                _ = tokio::time::sleep(inner.config.segment_duration) => {}
                _ = segment.seal.notified() => {}
                _ = inner.shutdown.cancelled() => {}
            }

            // Detach from the routing map so no new ingest can reach this
            // segment, then wait for in-flight closures to finish.
            {
                let mut shards = inner.shards.lock();
                if shards
                    .get(&segment.shard)
                    .is_some_and(|s| Arc::ptr_eq(s, &segment))
                {
                    shards.remove(&segment.shard);
                }
            }
            loop {
                let drained = segment.drained.notified();
                if segment.inflight.load(Ordering::Acquire) == 0 {
                    break;
                }
                drained.await;
            }

            let _permit = Arc::clone(&inner.flush_permits)
                .acquire_owned()
                .await
                .expect("flush semaphore is never closed");

            let timer = inner.metrics.flush_duration.start_timer();
            let result =
                flusher::flush(inner.flush_context(), segment.shard, segment.take_heads()).await;
            timer.observe_duration();

            if let Err(e) = &result {
                inner.metrics.flush_failures.inc();
                error!(shard = %segment.shard, error = %e, "segment flush failed");
            }
            // Receivers may all be gone; that is fine.
            let _ = outcome.send(result.map_err(Arc::new));
        });
    }
}

impl Inner {
    pub(crate) fn flush_context(&self) -> FlushContext<'_> {
        FlushContext {
            config: &self.config,
            bucket: &*self.bucket,
            metastore: &*self.metastore,
            metrics: &self.metrics,
            hedged_upload_limiter: &self.hedged_upload_limiter,
        }
    }
}
