//! Per-query-kind result aggregation.
//!
//! One aggregator per query of the request; dataset workers feed each
//! aggregator concurrently and `finalize` renders the reports in request
//! order.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use parking_lot::Mutex;

use block::DatasetReader;
use data_types::{
    labels::LABEL_NAME_PROFILE_TYPE, matcher::matches_labels, nanos_to_millis, Labels, Matcher,
};
use pprof::FoldedStacks;

use crate::{Query, QueryError, Report};

enum AggState {
    LabelNames(BTreeSet<String>),
    LabelValues {
        name: String,
        values: BTreeSet<String>,
    },
    SeriesLabels(BTreeMap<u64, Labels>),
    Pprof {
        type_string: String,
        sample_type: (String, String),
        period_type: (String, String),
        folded: FoldedStacks,
    },
}

impl std::fmt::Debug for AggState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LabelNames(_) => f.write_str("LabelNames"),
            Self::LabelValues { .. } => f.write_str("LabelValues"),
            Self::SeriesLabels(_) => f.write_str("SeriesLabels"),
            Self::Pprof { .. } => f.write_str("Pprof"),
        }
    }
}

/// The aggregators of one invoke, shared by all dataset workers.
#[derive(Debug)]
pub(crate) struct Aggregators {
    slots: Vec<Mutex<AggState>>,
}

impl Aggregators {
    pub(crate) fn new(queries: &[Query]) -> Self {
        let slots = queries
            .iter()
            .map(|q| {
                Mutex::new(match q {
                    Query::LabelNames => AggState::LabelNames(BTreeSet::new()),
                    Query::LabelValues { name } => AggState::LabelValues {
                        name: name.clone(),
                        values: BTreeSet::new(),
                    },
                    Query::SeriesLabels => AggState::SeriesLabels(BTreeMap::new()),
                    Query::Pprof { profile_type } => AggState::Pprof {
                        type_string: profile_type.to_string(),
                        sample_type: (
                            profile_type.sample_type.clone(),
                            profile_type.sample_unit.clone(),
                        ),
                        period_type: (
                            profile_type.period_type.clone(),
                            profile_type.period_unit.clone(),
                        ),
                        folded: FoldedStacks::default(),
                    },
                })
            })
            .collect();
        Self { slots }
    }

    /// Evaluate every query against one dataset.
    pub(crate) fn consume_dataset(
        &self,
        reader: &DatasetReader,
        matchers: &[Matcher],
        start_ms: i64,
        end_ms: i64,
    ) -> Result<(), QueryError> {
        // Matching series and their labels, shared by all kinds.
        let mut matching: Vec<(u64, Labels)> = Vec::new();
        for entry in reader.series() {
            let labels = reader.series_labels(entry)?;
            if matches_labels(matchers, &labels) {
                matching.push((entry.fingerprint, labels));
            }
        }
        if matching.is_empty() {
            return Ok(());
        }

        for slot in &self.slots {
            let mut state = slot.lock();
            match &mut *state {
                AggState::LabelNames(names) => {
                    for (_, labels) in &matching {
                        names.extend(labels.iter().map(|p| p.name.clone()));
                    }
                }
                AggState::LabelValues { name, values } => {
                    for (_, labels) in &matching {
                        if let Some(v) = labels.get(name) {
                            values.insert(v.to_string());
                        }
                    }
                }
                AggState::SeriesLabels(series) => {
                    for (fingerprint, labels) in &matching {
                        series.entry(*fingerprint).or_insert_with(|| labels.clone());
                    }
                }
                AggState::Pprof {
                    type_string,
                    folded,
                    ..
                } => {
                    let selected: HashSet<u64> = matching
                        .iter()
                        .filter(|(_, labels)| {
                            labels.get(LABEL_NAME_PROFILE_TYPE) == Some(type_string.as_str())
                        })
                        .map(|(fp, _)| *fp)
                        .collect();
                    if selected.is_empty() {
                        continue;
                    }
                    for record in reader.records()? {
                        let ts_ms = nanos_to_millis(record.timestamp_nanos);
                        if ts_ms < start_ms || ts_ms > end_ms {
                            continue;
                        }
                        for series in &record.series {
                            if !selected.contains(&series.fingerprint) {
                                continue;
                            }
                            for sample in &series.samples {
                                folded.add(
                                    reader.stack_frames(sample.stacktrace_id)?,
                                    sample.value,
                                );
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Render the reports in request order.
    pub(crate) fn finalize(self) -> Vec<Report> {
        self.slots
            .into_iter()
            .map(|slot| match slot.into_inner() {
                AggState::LabelNames(names) => Report::LabelNames(names.into_iter().collect()),
                AggState::LabelValues { values, .. } => {
                    Report::LabelValues(values.into_iter().collect())
                }
                AggState::SeriesLabels(series) => {
                    Report::SeriesLabels(series.into_values().collect())
                }
                AggState::Pprof {
                    sample_type,
                    period_type,
                    folded,
                    ..
                } => Report::Pprof(pprof::encode_profile(&folded.into_profile(
                    (&sample_type.0, &sample_type.1),
                    (&period_type.0, &period_type.1),
                    0,
                    0,
                ))),
            })
            .collect()
    }
}
