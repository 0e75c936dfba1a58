//! A builder for constructing pprof profiles in tests.
//!
//! The builder mirrors the shape of the profiles real producers send: a CPU
//! profile with a single sample type, or a heap profile with the classic four
//! memory sample types.

use data_types::{
    labels::{LABEL_NAME_METRIC, LABEL_NAME_SERVICE},
    Labels, ProfileId,
};

use crate::{Function, Line, Location, Mapping, Profile, Sample, ValueType};

/// Builds a [`Profile`] plus the ingestion attributes that accompany it
/// (profile ID, labels, annotations).
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    profile: Profile,
    id: ProfileId,
    labels: Labels,
    annotations: Vec<String>,
    // Location ids of the pending stack, leaf-first.
    stack: Vec<u64>,
}

impl ProfileBuilder {
    /// Start a profile observed at the given unix-nanosecond timestamp.
    pub fn new(time_nanos: i64) -> Self {
        let profile = Profile {
            string_table: vec![String::new()],
            time_nanos,
            ..Default::default()
        };
        Self {
            profile,
            id: ProfileId::new(),
            labels: Labels::default(),
            annotations: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Shape the profile as a CPU profile: one `cpu:nanoseconds` sample type
    /// and the `process_cpu` metric name.
    pub fn cpu_profile(mut self) -> Self {
        let t = self.intern("cpu");
        let u = self.intern("nanoseconds");
        self.profile.sample_type = vec![ValueType { r#type: t, unit: u }];
        self.profile.period_type = Some(ValueType { r#type: t, unit: u });
        self.profile.period = 10_000_000;
        self.labels = self.labels.with(LABEL_NAME_METRIC, "process_cpu");
        self
    }

    /// Shape the profile as a heap profile with the four memory sample types.
    pub fn memory_profile(mut self) -> Self {
        let count = self.intern("count");
        let bytes = self.intern("bytes");
        let space = self.intern("space");
        let types = [
            ("alloc_objects", count),
            ("alloc_space", bytes),
            ("inuse_objects", count),
            ("inuse_space", bytes),
        ];
        self.profile.sample_type = types
            .into_iter()
            .map(|(t, unit)| {
                let t = self.intern(t);
                ValueType { r#type: t, unit }
            })
            .collect();
        self.profile.period_type = Some(ValueType {
            r#type: space,
            unit: bytes,
        });
        self.profile.period = 512 * 1024;
        self.labels = self.labels.with(LABEL_NAME_METRIC, "memory");
        self
    }

    /// Attach a label to the series this profile belongs to.
    pub fn with_labels(mut self, name: &str, value: &str) -> Self {
        self.labels = self.labels.with(name, value);
        self
    }

    /// Shorthand for the mandatory service label.
    pub fn with_service(self, service: &str) -> Self {
        self.with_labels(LABEL_NAME_SERVICE, service)
    }

    /// Attach a free-form annotation.
    pub fn with_annotation(mut self, annotation: &str) -> Self {
        self.annotations.push(annotation.to_string());
        self
    }

    /// Set the pending call stack. Frames are given root-first, the way a
    /// human reads a flame graph; they are stored leaf-first as pprof
    /// requires. Frames are deduplicated by function name.
    pub fn for_stacktrace(mut self, frames: &[&str]) -> Self {
        self.stack = frames
            .iter()
            .rev()
            .map(|name| self.location_for(name))
            .collect();
        self
    }

    /// Append one sample with the pending stack and the given values (one per
    /// sample type).
    pub fn add_samples(mut self, values: &[i64]) -> Self {
        assert_eq!(
            values.len(),
            self.profile.sample_type.len(),
            "one value per sample type"
        );
        self.profile.sample.push(Sample {
            location_id: self.stack.clone(),
            value: values.to_vec(),
            label: vec![],
        });
        self
    }

    /// Replace the mapping table, e.g. to simulate unsymbolized binaries.
    pub fn with_mappings(mut self, mappings: Vec<Mapping>) -> Self {
        self.profile.mapping = mappings;
        self
    }

    /// Append a raw location, for tests that need direct control.
    pub fn push_location(mut self, location: Location) -> Self {
        self.profile.location.push(location);
        self
    }

    /// Append a raw sample, for tests that need direct control.
    pub fn push_sample(mut self, sample: Sample) -> Self {
        self.profile.sample.push(sample);
        self
    }

    /// Intern a string into the profile's string table.
    pub fn intern(&mut self, s: &str) -> i64 {
        if s.is_empty() {
            return 0;
        }
        if let Some(i) = self.profile.string_table.iter().position(|x| x == s) {
            return i as i64;
        }
        self.profile.string_table.push(s.to_string());
        (self.profile.string_table.len() - 1) as i64
    }

    /// The profile ID that accompanies this profile on ingest.
    pub fn id(&self) -> ProfileId {
        self.id
    }

    /// The series labels that accompany this profile on ingest.
    pub fn labels(&self) -> Labels {
        self.labels.clone()
    }

    /// The annotations that accompany this profile on ingest.
    pub fn annotations(&self) -> Vec<String> {
        self.annotations.clone()
    }

    /// The profile's observation timestamp in unix nanoseconds.
    pub fn time_nanos(&self) -> i64 {
        self.profile.time_nanos
    }

    /// A copy of the profile in its current state. Ingestion is by value, so
    /// callers hand over copies and keep the builder as the reference input.
    pub fn sample_profile(&self) -> Profile {
        self.profile.clone()
    }

    fn location_for(&mut self, name: &str) -> u64 {
        let name_idx = self.intern(name);
        if let Some(f) = self.profile.function.iter().find(|f| f.name == name_idx) {
            return f.id; // location id == function id by construction
        }
        let id = self.profile.function.len() as u64 + 1;
        self.profile.function.push(Function {
            id,
            name: name_idx,
            system_name: name_idx,
            filename: 0,
            start_line: 0,
        });
        self.profile.location.push(Location {
            id,
            mapping_id: 0,
            address: 0,
            line: vec![Line {
                function_id: id,
                line: 0,
            }],
            is_folded: false,
        });
        id
    }
}

/// A CPU profile with one stack and one sample, the workhorse of the write
/// path tests. `ts_millis` is converted to nanoseconds; `frames` are
/// root-first.
pub fn cpu_profile(samples: i64, ts_millis: i64, service: &str, frames: &[&str]) -> ProfileBuilder {
    ProfileBuilder::new(ts_millis * 1_000_000)
        .cpu_profile()
        .with_service(service)
        .with_annotation("test annotation")
        .for_stacktrace(frames)
        .add_samples(&[samples])
}

/// A heap profile with one stack and the four memory values derived from
/// `samples`.
pub fn mem_profile(samples: i64, ts_millis: i64, service: &str, frames: &[&str]) -> ProfileBuilder {
    ProfileBuilder::new(ts_millis * 1_000_000)
        .memory_profile()
        .with_service(service)
        .for_stacktrace(frames)
        .add_samples(&[samples, samples * 1024, samples, samples * 1024])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack_collapse;

    #[test]
    fn cpu_profile_shape() {
        let b = cpu_profile(42, 480, "svc1", &["foo", "bar"]);
        let p = b.sample_profile();
        assert_eq!(p.time_nanos, 480_000_000);
        assert_eq!(p.sample_type.len(), 1);
        assert_eq!(p.sample.len(), 1);
        assert_eq!(b.labels().get("service_name"), Some("svc1"));
        assert_eq!(b.labels().get("__name__"), Some("process_cpu"));
        assert_eq!(stack_collapse(&p, 0), ["foo;bar 42"]);
    }

    #[test]
    fn mem_profile_has_four_sample_types() {
        let p = mem_profile(13, 100, "svc", &["a"]).sample_profile();
        assert_eq!(p.sample_type.len(), 4);
        assert_eq!(p.sample[0].value, [13, 13 * 1024, 13, 13 * 1024]);
        assert_eq!(stack_collapse(&p, 1), ["a 13312"]);
    }

    #[test]
    fn stacks_share_locations() {
        let p = ProfileBuilder::new(0)
            .cpu_profile()
            .for_stacktrace(&["foo", "bar"])
            .add_samples(&[1])
            .for_stacktrace(&["foo", "baz"])
            .add_samples(&[1])
            .sample_profile();
        // foo, bar, baz
        assert_eq!(p.function.len(), 3);
        assert_eq!(p.location.len(), 3);
    }
}
