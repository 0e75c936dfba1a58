//! The per-tenant ingestion façade.
//!
//! Routes `push` requests into the segment write path and keeps a local head
//! per tenant for recent reads. Tenant instances are created lazily on first
//! write, never on read: label queries for unknown tenants return empty
//! results without materialising anything.
//!
//! Reads over long-term data go through the block reader
//! (`query_backend`); the [`merge_profiles_pprof`] session protocol is
//! shared by both paths via the [`ProfileQuerier`] capability.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use data_types::{parse_selector, Labels, ProfileId, Shard};
use pprof::Profile;
use query_backend::{
    CandidateProfile, ProfileCandidates, ProfileQuerier, QueryError, SelectProfilesRequest,
};
use segment_writer::{memdb::Head, FlushError, FlushWaiter, SegmentsWriter};

pub mod merge;

pub use merge::{merge_profiles_pprof, BidiStream, MergeError};

/// Ingester configuration.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Read-side horizon: local heads only serve queries reaching back at
    /// most this far.
    pub max_block_duration: Duration,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            max_block_duration: Duration::from_secs(30 * 60),
        }
    }
}

/// One raw profile within a push request.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub id: ProfileId,
    /// Protobuf pprof payload.
    pub raw_profile: Bytes,
}

/// A series of raw profiles sharing labels, already assigned to a shard by
/// the distributor.
#[derive(Debug, Clone)]
pub struct RawProfileSeries {
    pub labels: Labels,
    pub shard: Shard,
    pub samples: Vec<RawSample>,
    pub annotations: Vec<String>,
}

/// Errors surfaced by `push`.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The write was accepted but its segment failed to flush durably.
    #[error("flush failed: {0}")]
    Flush(Arc<FlushError>),
}

/// A label query over a tenant's recent data. Zero bounds mean unbounded.
/// Times are unix milliseconds, inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelQueryRequest {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug)]
struct TenantInstance {
    tenant: String,
    head: Mutex<Head>,
}

impl TenantInstance {
    fn new(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            head: Mutex::new(Head::new()),
        }
    }

    fn overlaps(&self, request: &LabelQueryRequest) -> bool {
        if request.start == 0 && request.end == 0 {
            return true;
        }
        let head = self.head.lock();
        !(head.max_time_ms() < request.start || head.min_time_ms() > request.end)
    }
}

#[async_trait]
impl ProfileQuerier for TenantInstance {
    async fn select_profiles(
        &self,
        request: &SelectProfilesRequest,
    ) -> Result<ProfileCandidates, QueryError> {
        let matchers = parse_selector(&request.label_selector)
            .map_err(|e| QueryError::InvalidArgument(format!("label selection is invalid: {e}")))?;
        let head = self.head.lock();
        let candidates =
            head.select_profiles(&matchers, &request.profile_type, request.start, request.end);
        debug!(
            tenant = %self.tenant,
            candidates = candidates.len(),
            "selected profiles from local head"
        );
        let mut fingerprints: Vec<u64> = candidates.iter().map(|c| c.fingerprint).collect();
        fingerprints.sort_unstable();
        fingerprints.dedup();
        Ok(ProfileCandidates {
            fingerprints,
            profiles: candidates
                .into_iter()
                .map(|c| CandidateProfile {
                    fingerprint: c.fingerprint,
                    timestamp_ms: c.timestamp_ms,
                    token: c.record_index as u64,
                })
                .collect(),
        })
    }

    async fn merge_pprof(
        &self,
        request: &SelectProfilesRequest,
        selected: &[CandidateProfile],
    ) -> Result<Profile, QueryError> {
        let matchers = parse_selector(&request.label_selector)
            .map_err(|e| QueryError::InvalidArgument(format!("label selection is invalid: {e}")))?;
        let indexes: Vec<usize> = selected.iter().map(|c| c.token as usize).collect();
        let head = self.head.lock();
        Ok(head.merge_pprof(&matchers, &request.profile_type, &indexes))
    }
}

/// A querier with nothing in it, serving merge sessions for tenants that
/// have never written.
#[derive(Debug)]
struct NoProfiles;

#[async_trait]
impl ProfileQuerier for NoProfiles {
    async fn select_profiles(
        &self,
        _request: &SelectProfilesRequest,
    ) -> Result<ProfileCandidates, QueryError> {
        Ok(ProfileCandidates::default())
    }

    async fn merge_pprof(
        &self,
        request: &SelectProfilesRequest,
        _selected: &[CandidateProfile],
    ) -> Result<Profile, QueryError> {
        let pt = &request.profile_type;
        Ok(pprof::FoldedStacks::default().into_profile(
            (&pt.sample_type, &pt.sample_unit),
            (&pt.period_type, &pt.period_unit),
            0,
            0,
        ))
    }
}

/// The per-process ingester: a registry of tenant instances over one segment
/// writer.
#[derive(Debug)]
pub struct Ingester {
    config: IngesterConfig,
    segments: SegmentsWriter,
    instances: RwLock<HashMap<String, Arc<TenantInstance>>>,
}

impl Ingester {
    pub fn new(config: IngesterConfig, segments: SegmentsWriter) -> Self {
        Self {
            config,
            segments,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Ingest raw profile series for `tenant` and wait until every touched
    /// segment flushed durably (registered, or parked in the DLQ).
    pub async fn push(
        &self,
        tenant: &str,
        series: Vec<RawProfileSeries>,
    ) -> Result<(), PushError> {
        if tenant.is_empty() {
            return Err(PushError::InvalidArgument("tenant id is empty".into()));
        }
        if series.is_empty() {
            return Ok(());
        }

        // Decode and validate everything up front: a malformed profile
        // rejects the request before anything is buffered.
        let mut decoded: Vec<(Shard, Labels, Vec<String>, ProfileId, Profile)> = Vec::new();
        for s in series {
            for sample in &s.samples {
                let profile = pprof::decode_profile(&sample.raw_profile)
                    .map_err(|e| PushError::InvalidArgument(e.to_string()))?;
                decoded.push((
                    s.shard,
                    s.labels.clone(),
                    s.annotations.clone(),
                    sample.id,
                    profile,
                ));
            }
        }

        let instance = self.get_or_create_instance(tenant);

        let mut waiters: Vec<FlushWaiter> = Vec::with_capacity(decoded.len());
        for (shard, labels, annotations, id, profile) in decoded {
            {
                // Local head for recent reads.
                let mut head = instance.head.lock();
                head.ingest(&profile, id, &labels, &annotations)
                    .map_err(|e| PushError::InvalidArgument(e.to_string()))?;
            }
            let tenant = tenant.to_string();
            let waiter = self.segments.ingest(shard, |seg| {
                // Already validated above; the segment head applies the same
                // checks.
                let _ = seg.ingest(&tenant, profile, id, labels, annotations);
            });
            waiters.push(waiter);
        }

        for waiter in waiters {
            waiter.wait_flushed().await.map_err(PushError::Flush)?;
        }
        debug!(tenant, "push flushed");
        Ok(())
    }

    /// Label names of the tenant's recent series. Unknown tenants get an
    /// empty result and no instance.
    pub fn label_names(&self, tenant: &str, request: LabelQueryRequest) -> Vec<String> {
        match self.instance(tenant) {
            Some(instance) if instance.overlaps(&request) => instance.head.lock().label_names(),
            _ => Vec::new(),
        }
    }

    /// Values of one label across the tenant's recent series. Unknown
    /// tenants get an empty result and no instance.
    pub fn label_values(
        &self,
        tenant: &str,
        name: &str,
        request: LabelQueryRequest,
    ) -> Vec<String> {
        match self.instance(tenant) {
            Some(instance) if instance.overlaps(&request) => {
                instance.head.lock().label_values(name)
            }
            _ => Vec::new(),
        }
    }

    /// Open a `MergeProfilesPprof` session over the tenant's recent data.
    pub fn merge_profiles_pprof(&self, tenant: &str) -> BidiStream {
        match self.instance(tenant) {
            Some(instance) => merge::merge_profiles_pprof(instance),
            None => merge::merge_profiles_pprof(Arc::new(NoProfiles)),
        }
    }

    /// The read-side horizon for local heads.
    pub fn max_block_duration(&self) -> Duration {
        self.config.max_block_duration
    }

    /// Seal and flush everything, then stop.
    pub async fn stop(&self) {
        self.segments.stop().await;
    }

    fn instance(&self, tenant: &str) -> Option<Arc<TenantInstance>> {
        self.instances.read().get(tenant).map(Arc::clone)
    }

    fn get_or_create_instance(&self, tenant: &str) -> Arc<TenantInstance> {
        if let Some(instance) = self.instance(tenant) {
            return instance;
        }
        let mut instances = self.instances.write();
        Arc::clone(
            instances
                .entry(tenant.to_string())
                .or_insert_with(|| {
                    debug!(tenant, "creating tenant instance");
                    Arc::new(TenantInstance::new(tenant))
                }),
        )
    }

    #[cfg(test)]
    fn instance_count(&self) -> usize {
        self.instances.read().len()
    }
}
