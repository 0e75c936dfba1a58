//! Profile selection and merge over a query target.
//!
//! [`ProfileQuerier`] is the capability behind the bidirectional
//! `MergeProfilesPprof` protocol: select candidate profiles, then merge the
//! subset the caller picked. [`BlocksQuerier`] implements it over registered
//! blocks; the ingester implements it over its local heads.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;

use block::{BlockMeta, BlockObject, DatasetReader};
use data_types::{
    labels::LABEL_NAME_PROFILE_TYPE, matcher::matches_labels, nanos_to_millis, parse_selector,
    Matcher, ProfileType,
};
use objstore::Bucket;
use pprof::{FoldedStacks, Profile};

use crate::QueryError;

/// A profile selection request. Time bounds are unix milliseconds,
/// inclusive.
#[derive(Debug, Clone)]
pub struct SelectProfilesRequest {
    pub label_selector: String,
    pub profile_type: ProfileType,
    pub start: i64,
    pub end: i64,
}

/// One selectable profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateProfile {
    /// Fingerprint of the matching series.
    pub fingerprint: u64,
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    /// Opaque handle the querier uses to find the profile again at merge
    /// time.
    pub token: u64,
}

/// The candidate set sent to the caller before merging.
#[derive(Debug, Clone, Default)]
pub struct ProfileCandidates {
    /// Distinct fingerprints of the matching series.
    pub fingerprints: Vec<u64>,
    pub profiles: Vec<CandidateProfile>,
}

/// Select-then-merge over one tenant's profiles.
#[async_trait]
pub trait ProfileQuerier: Debug + Send + Sync {
    /// Find profiles matching the request.
    async fn select_profiles(
        &self,
        request: &SelectProfilesRequest,
    ) -> Result<ProfileCandidates, QueryError>;

    /// Merge the selected candidates into one profile.
    async fn merge_pprof(
        &self,
        request: &SelectProfilesRequest,
        selected: &[CandidateProfile],
    ) -> Result<Profile, QueryError>;
}

/// [`ProfileQuerier`] over registered blocks, scoped to one tenant.
///
/// Fetched objects are cached for the lifetime of the querier, so the merge
/// step does not re-download what selection already read.
#[derive(Debug)]
pub struct BlocksQuerier {
    bucket: Arc<dyn Bucket>,
    tenant: String,
    metas: Vec<BlockMeta>,
    objects: Mutex<HashMap<usize, Arc<BlockObject>>>,
}

impl BlocksQuerier {
    pub fn new(bucket: Arc<dyn Bucket>, tenant: impl Into<String>, metas: Vec<BlockMeta>) -> Self {
        Self {
            bucket,
            tenant: tenant.into(),
            metas,
            objects: Mutex::new(HashMap::new()),
        }
    }

    async fn object(&self, block_index: usize) -> Result<Arc<BlockObject>, QueryError> {
        if let Some(object) = self.objects.lock().get(&block_index) {
            return Ok(Arc::clone(object));
        }
        let meta = self
            .metas
            .get(block_index)
            .ok_or_else(|| QueryError::Internal(format!("block index {block_index} out of range")))?;
        let object = Arc::new(BlockObject::open(&*self.bucket, meta.clone()).await?);
        Ok(Arc::clone(
            self.objects
                .lock()
                .entry(block_index)
                .or_insert(object),
        ))
    }

    fn matchers(request: &SelectProfilesRequest) -> Result<Vec<Matcher>, QueryError> {
        parse_selector(&request.label_selector)
            .map_err(|e| QueryError::InvalidArgument(format!("label selection is invalid: {e}")))
    }

    /// Fingerprints of series in `reader` matching the request.
    fn matching_series(
        reader: &DatasetReader,
        matchers: &[Matcher],
        type_string: &str,
    ) -> Result<Vec<u64>, QueryError> {
        let mut matching = Vec::new();
        for entry in reader.series() {
            let labels = reader.series_labels(entry)?;
            if labels.get(LABEL_NAME_PROFILE_TYPE) == Some(type_string)
                && matches_labels(matchers, &labels)
            {
                matching.push(entry.fingerprint);
            }
        }
        Ok(matching)
    }
}

// Token layout: block index (16 bits) | dataset index (16 bits) | record
// index (32 bits).
fn pack_token(block: usize, dataset: usize, record: usize) -> u64 {
    ((block as u64) << 48) | ((dataset as u64) << 32) | record as u64
}

fn unpack_token(token: u64) -> (usize, usize, usize) {
    (
        (token >> 48) as usize,
        ((token >> 32) & 0xffff) as usize,
        (token & 0xffff_ffff) as usize,
    )
}

#[async_trait]
impl ProfileQuerier for BlocksQuerier {
    async fn select_profiles(
        &self,
        request: &SelectProfilesRequest,
    ) -> Result<ProfileCandidates, QueryError> {
        let matchers = Self::matchers(request)?;
        let type_string = request.profile_type.to_string();

        let mut candidates = ProfileCandidates::default();
        let mut fingerprints = std::collections::BTreeSet::new();
        for block_index in 0..self.metas.len() {
            let object = self.object(block_index).await?;
            for (dataset_index, ds) in object.meta().datasets.iter().enumerate() {
                if object.meta().dataset_tenant(ds) != self.tenant {
                    continue;
                }
                let reader = object.dataset(ds)?;
                let matching = Self::matching_series(&reader, &matchers, &type_string)?;
                if matching.is_empty() {
                    continue;
                }
                fingerprints.extend(matching.iter().copied());
                for (record_index, record) in reader.records()?.iter().enumerate() {
                    let timestamp_ms = nanos_to_millis(record.timestamp_nanos);
                    if timestamp_ms < request.start || timestamp_ms > request.end {
                        continue;
                    }
                    if let Some(series) = record
                        .series
                        .iter()
                        .find(|s| matching.contains(&s.fingerprint))
                    {
                        candidates.profiles.push(CandidateProfile {
                            fingerprint: series.fingerprint,
                            timestamp_ms,
                            token: pack_token(block_index, dataset_index, record_index),
                        });
                    }
                }
            }
        }
        candidates.fingerprints = fingerprints.into_iter().collect();
        Ok(candidates)
    }

    async fn merge_pprof(
        &self,
        request: &SelectProfilesRequest,
        selected: &[CandidateProfile],
    ) -> Result<Profile, QueryError> {
        let matchers = Self::matchers(request)?;
        let type_string = request.profile_type.to_string();

        // Group by (block, dataset) so each dataset is decoded once.
        let mut by_dataset: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for candidate in selected {
            let (block, dataset, record) = unpack_token(candidate.token);
            by_dataset.entry((block, dataset)).or_default().push(record);
        }

        let mut folded = FoldedStacks::default();
        for ((block_index, dataset_index), records) in by_dataset {
            let object = self.object(block_index).await?;
            let ds = object
                .meta()
                .datasets
                .get(dataset_index)
                .ok_or_else(|| {
                    QueryError::Internal(format!("dataset index {dataset_index} out of range"))
                })?;
            let reader = object.dataset(ds)?;
            let matching = Self::matching_series(&reader, &matchers, &type_string)?;
            let all_records = reader.records()?;
            for record_index in records {
                let Some(record) = all_records.get(record_index) else {
                    continue;
                };
                for series in &record.series {
                    if !matching.contains(&series.fingerprint) {
                        continue;
                    }
                    for sample in &series.samples {
                        folded.add(reader.stack_frames(sample.stacktrace_id)?, sample.value);
                    }
                }
            }
        }

        let pt = &request.profile_type;
        Ok(folded.into_profile(
            (&pt.sample_type, &pt.sample_unit),
            (&pt.period_type, &pt.period_unit),
            0,
            0,
        ))
    }
}
