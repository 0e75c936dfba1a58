//! The in-memory head: the single-dataset writer inside an active segment.
//!
//! A head accumulates transformed profile records, a series index, and a
//! symbol table. The same structure backs two consumers: the flusher
//! serializes it into a block dataset, and the ingester façade queries it
//! directly to serve recent data.

mod symbols;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use bytes::Bytes;
use data_types::{
    labels::{
        LABEL_NAME_METRIC, LABEL_NAME_PERIOD_TYPE, LABEL_NAME_PERIOD_UNIT,
        LABEL_NAME_PROFILE_TYPE, LABEL_NAME_TYPE, LABEL_NAME_UNIT, LABEL_NAME_UNSYMBOLIZED,
    },
    matcher::{matches_labels, Matcher},
    nanos_to_millis, Labels, ProfileId, ProfileType,
};
use pprof::{FoldedStacks, Profile};
use prost::Message;

use block::format::{ProfileRecord, SeriesEntry, SeriesIndex, SeriesSamples, StackSample};

use crate::IngestError;
use symbols::{ProfileSymbols, SymbolsBuilder};

/// One profile matched by [`Head::select_profiles`].
#[derive(Debug, Clone, Copy)]
pub struct HeadCandidate {
    pub record_index: usize,
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    /// Fingerprint of one matching series of the record.
    pub fingerprint: u64,
}

#[derive(Debug)]
struct HeadSeries {
    labels: Labels,
}

// Out-of-range indices resolve to the empty string, matching pprof readers.
fn string_at(profile: &Profile, i: i64) -> &str {
    usize::try_from(i)
        .ok()
        .and_then(|i| profile.string_table.get(i))
        .map(String::as_str)
        .unwrap_or("")
}

/// The in-memory writer for a single dataset.
#[derive(Debug, Default)]
pub struct Head {
    symbols: SymbolsBuilder,
    // Fingerprint → series, ordered for deterministic serialization.
    series: BTreeMap<u64, HeadSeries>,
    records: Vec<ProfileRecord>,
    min_time_nanos: Option<i64>,
    max_time_nanos: Option<i64>,
    unsymbolized: bool,
}

impl Head {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one decoded profile.
    ///
    /// The profile is taken by value: nothing in the head aliases the
    /// caller's memory once this returns. Each sample type derives one
    /// series from `labels`; samples are rewritten against the head's symbol
    /// table.
    pub fn ingest(
        &mut self,
        profile: &Profile,
        id: ProfileId,
        labels: &Labels,
        annotations: &[String],
    ) -> Result<(), IngestError> {
        if profile.sample_type.is_empty() {
            return Err(IngestError::Malformed("profile has no sample types".into()));
        }

        let src = ProfileSymbols::new(profile);

        let metric_name = labels.get(LABEL_NAME_METRIC).unwrap_or("");
        let (period_type, period_unit) = profile
            .period_type
            .map(|vt| (string_at(profile, vt.r#type), string_at(profile, vt.unit)))
            .unwrap_or(("", ""));

        // One derived series per sample type.
        let mut fingerprints = Vec::with_capacity(profile.sample_type.len());
        for vt in &profile.sample_type {
            let sample_type = string_at(profile, vt.r#type);
            let sample_unit = string_at(profile, vt.unit);
            let profile_type = ProfileType {
                name: metric_name.to_string(),
                sample_type: sample_type.to_string(),
                sample_unit: sample_unit.to_string(),
                period_type: period_type.to_string(),
                period_unit: period_unit.to_string(),
            };
            let series_labels = labels
                .with(LABEL_NAME_PROFILE_TYPE, &profile_type.to_string())
                .with(LABEL_NAME_TYPE, sample_type)
                .with(LABEL_NAME_UNIT, sample_unit)
                .with(LABEL_NAME_PERIOD_TYPE, period_type)
                .with(LABEL_NAME_PERIOD_UNIT, period_unit);
            let fingerprint = series_labels.fingerprint();
            self.series
                .entry(fingerprint)
                .or_insert(HeadSeries {
                    labels: series_labels,
                });
            fingerprints.push(fingerprint);
        }

        let mut series_samples: Vec<SeriesSamples> = fingerprints
            .iter()
            .map(|&fingerprint| SeriesSamples {
                fingerprint,
                samples: Vec::new(),
            })
            .collect();
        for sample in &profile.sample {
            if sample.value.len() != fingerprints.len() {
                return Err(IngestError::Malformed(format!(
                    "sample has {} values, profile has {} sample types",
                    sample.value.len(),
                    fingerprints.len()
                )));
            }
            let (stacktrace_id, unsymbolized) =
                self.symbols.intern_stacktrace(&src, &sample.location_id)?;
            self.unsymbolized |= unsymbolized;
            for (i, &value) in sample.value.iter().enumerate() {
                series_samples[i].samples.push(StackSample {
                    stacktrace_id,
                    value,
                });
            }
        }

        self.records.push(ProfileRecord {
            profile_id: Bytes::copy_from_slice(id.as_bytes()),
            timestamp_nanos: profile.time_nanos,
            annotations: annotations.to_vec(),
            series: series_samples
                .into_iter()
                .filter(|s| !s.samples.is_empty())
                .collect(),
        });

        self.min_time_nanos = Some(match self.min_time_nanos {
            Some(min) => min.min(profile.time_nanos),
            None => profile.time_nanos,
        });
        self.max_time_nanos = Some(match self.max_time_nanos {
            Some(max) => max.max(profile.time_nanos),
            None => profile.time_nanos,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest ingested timestamp, unix milliseconds (truncating).
    pub fn min_time_ms(&self) -> i64 {
        nanos_to_millis(self.min_time_nanos.unwrap_or(0))
    }

    /// Latest ingested timestamp, unix milliseconds (truncating, inclusive).
    pub fn max_time_ms(&self) -> i64 {
        nanos_to_millis(self.max_time_nanos.unwrap_or(0))
    }

    /// Serialize the head into the three dataset regions.
    pub fn build_regions(&self) -> (Bytes, Bytes, Bytes) {
        let profiles = block::format::encode_records(&self.records);
        let tsdb_index = self.build_series_index().encode_to_vec().into();
        let symbols = self.symbols.to_symbols().encode_to_vec().into();
        (profiles, tsdb_index, symbols)
    }

    fn build_series_index(&self) -> SeriesIndex {
        let mut strings: Vec<String> = vec![String::new()];
        let mut index: BTreeMap<String, u32> = BTreeMap::from([(String::new(), 0)]);
        let mut intern = |strings: &mut Vec<String>, s: &str| -> u32 {
            if let Some(&i) = index.get(s) {
                return i;
            }
            let i = strings.len() as u32;
            strings.push(s.to_string());
            index.insert(s.to_string(), i);
            i
        };
        let series = self
            .series
            .iter()
            .map(|(&fingerprint, s)| SeriesEntry {
                fingerprint,
                labels: s
                    .labels
                    .iter()
                    .flat_map(|p| {
                        [
                            intern(&mut strings, &p.name),
                            intern(&mut strings, &p.value),
                        ]
                    })
                    .collect(),
            })
            .collect();
        SeriesIndex { strings, series }
    }

    /// The distinct series shapes of this dataset, for block metadata: one
    /// run per profile type, each carrying the service name and, when any
    /// sample lacks symbols, the unsymbolized marker.
    pub fn label_runs(&self, service: &str) -> Vec<Vec<(String, String)>> {
        let profile_types: BTreeSet<&str> = self
            .series
            .values()
            .filter_map(|s| s.labels.get(LABEL_NAME_PROFILE_TYPE))
            .collect();
        profile_types
            .into_iter()
            .map(|pt| {
                let mut run = vec![
                    (
                        data_types::labels::LABEL_NAME_SERVICE.to_string(),
                        service.to_string(),
                    ),
                    (LABEL_NAME_PROFILE_TYPE.to_string(), pt.to_string()),
                ];
                if self.unsymbolized {
                    run.push((LABEL_NAME_UNSYMBOLIZED.to_string(), "true".to_string()));
                }
                run
            })
            .collect()
    }

    /// All label names present across series, sorted.
    pub fn label_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .series
            .values()
            .flat_map(|s| s.labels.iter().map(|p| p.name.clone()))
            .collect();
        names.into_iter().collect()
    }

    /// All values of one label across series, sorted.
    pub fn label_values(&self, name: &str) -> Vec<String> {
        let values: BTreeSet<String> = self
            .series
            .values()
            .filter_map(|s| s.labels.get(name).map(str::to_string))
            .collect();
        values.into_iter().collect()
    }

    /// Profiles of the given type matching the matchers within
    /// `[start_ms, end_ms]` (inclusive).
    pub fn select_profiles(
        &self,
        matchers: &[Matcher],
        profile_type: &ProfileType,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<HeadCandidate> {
        let matching = self.matching_fingerprints(matchers, profile_type);
        let mut candidates = Vec::new();
        for (record_index, record) in self.records.iter().enumerate() {
            let timestamp_ms = nanos_to_millis(record.timestamp_nanos);
            if timestamp_ms < start_ms || timestamp_ms > end_ms {
                continue;
            }
            if let Some(series) = record.series.iter().find(|s| matching.contains(&s.fingerprint))
            {
                candidates.push(HeadCandidate {
                    record_index,
                    timestamp_ms,
                    fingerprint: series.fingerprint,
                });
            }
        }
        candidates
    }

    /// Merge the selected records' samples of the given profile type into a
    /// single profile.
    pub fn merge_pprof(
        &self,
        matchers: &[Matcher],
        profile_type: &ProfileType,
        selected_records: &[usize],
    ) -> Profile {
        let matching = self.matching_fingerprints(matchers, profile_type);
        let mut folded = FoldedStacks::default();
        for &index in selected_records {
            let Some(record) = self.records.get(index) else {
                continue;
            };
            for series in &record.series {
                if !matching.contains(&series.fingerprint) {
                    continue;
                }
                for sample in &series.samples {
                    folded.add(self.symbols.frames(sample.stacktrace_id), sample.value);
                }
            }
        }
        folded.into_profile(
            (&profile_type.sample_type, &profile_type.sample_unit),
            (&profile_type.period_type, &profile_type.period_unit),
            0,
            0,
        )
    }

    fn matching_fingerprints(
        &self,
        matchers: &[Matcher],
        profile_type: &ProfileType,
    ) -> HashSet<u64> {
        let type_value = profile_type.to_string();
        self.series
            .iter()
            .filter(|(_, s)| {
                s.labels.get(LABEL_NAME_PROFILE_TYPE) == Some(type_value.as_str())
                    && matches_labels(matchers, &s.labels)
            })
            .map(|(&fp, _)| fp)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_types::parse_selector;
    use pprof::builder::{cpu_profile, mem_profile};

    fn ingest(head: &mut Head, b: &pprof::ProfileBuilder) {
        head.ingest(&b.sample_profile(), b.id(), &b.labels(), &b.annotations())
            .unwrap();
    }

    #[test]
    fn derives_one_series_per_sample_type() {
        let mut head = Head::new();
        ingest(&mut head, &mem_profile(13, 100, "svc1", &["a", "b"]));
        assert_eq!(head.series.len(), 4);
        assert_eq!(head.records.len(), 1);
        assert_eq!(head.records[0].series.len(), 4);
    }

    #[test]
    fn label_surface_includes_derived_names() {
        let mut head = Head::new();
        ingest(&mut head, &cpu_profile(42, 480, "svc1", &["foo", "bar"]));
        let names = head.label_names();
        for expected in [
            "__name__",
            "__period_type__",
            "__period_unit__",
            "__profile_type__",
            "__type__",
            "__unit__",
            "service_name",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        assert_eq!(head.label_values("service_name"), ["svc1"]);
        assert_eq!(
            head.label_values("__profile_type__"),
            ["process_cpu:cpu:nanoseconds:cpu:nanoseconds"]
        );
    }

    #[test]
    fn min_max_track_ingested_timestamps() {
        let mut head = Head::new();
        ingest(&mut head, &cpu_profile(1, 420, "svc", &["x"]));
        ingest(&mut head, &cpu_profile(1, 239, "svc", &["x"]));
        ingest(&mut head, &cpu_profile(1, 421, "svc", &["x"]));
        assert_eq!(head.min_time_ms(), 239);
        assert_eq!(head.max_time_ms(), 421);
    }

    #[test]
    fn select_and_merge_round_trip() {
        let mut head = Head::new();
        let a = cpu_profile(42, 100, "svc1", &["foo", "bar"]);
        let b = cpu_profile(13, 200, "svc1", &["foo"]);
        let other_service = cpu_profile(99, 150, "svc2", &["zzz"]);
        ingest(&mut head, &a);
        ingest(&mut head, &b);
        ingest(&mut head, &other_service);

        let matchers = parse_selector(r#"{service_name="svc1"}"#).unwrap();
        let pt = ProfileType::parse("process_cpu:cpu:nanoseconds:cpu:nanoseconds").unwrap();

        let candidates = head.select_profiles(&matchers, &pt, 0, 1_000);
        assert_eq!(candidates.len(), 2);

        // Time range excludes the second profile.
        assert_eq!(head.select_profiles(&matchers, &pt, 0, 150).len(), 1);

        let selected: Vec<usize> = candidates.iter().map(|c| c.record_index).collect();
        let merged = head.merge_pprof(&matchers, &pt, &selected);
        assert_eq!(
            pprof::stack_collapse(&merged, 0),
            ["foo 13", "foo;bar 42"]
        );
    }

    #[test]
    fn unsymbolized_flag_is_sticky() {
        use pprof::{Location, Mapping, Sample};

        let mut b = pprof::ProfileBuilder::new(1_000_000)
            .cpu_profile()
            .with_service("svc1")
            .with_mappings(vec![Mapping {
                id: 1,
                has_functions: false,
                ..Default::default()
            }]);
        b = b.push_location(Location {
            id: 100,
            mapping_id: 1,
            ..Default::default()
        });
        b = b.push_sample(Sample {
            location_id: vec![100],
            value: vec![1],
            label: vec![],
        });

        let mut head = Head::new();
        ingest(&mut head, &b);
        assert!(head.unsymbolized);
        let runs = head.label_runs("svc1");
        assert!(runs
            .iter()
            .any(|run| run.contains(&("__unsymbolized__".to_string(), "true".to_string()))));
    }

    #[test]
    fn malformed_profiles_are_rejected() {
        let mut head = Head::new();
        let b = pprof::ProfileBuilder::new(0).cpu_profile().push_sample(pprof::Sample {
            location_id: vec![999],
            value: vec![1],
            label: vec![],
        });
        assert!(head
            .ingest(&b.sample_profile(), b.id(), &b.labels(), &[])
            .is_err());
    }
}
