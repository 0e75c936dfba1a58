//! Folded-stack aggregation.
//!
//! A folded stack is the classic `root;child;leaf value` line format. It is
//! both the aggregation state for merged-profile queries and the oracle that
//! tests use to compare a merged profile against a reference merge of the
//! same inputs, independent of location/function id assignment.

use std::collections::BTreeMap;

use crate::{string_at, Function, Line, Location, Profile, Sample, ValueType};

/// An accumulator of `(call stack, value)` pairs keyed by resolved frame
/// names.
///
/// Stacks are stored leaf-first, mirroring pprof's `location_id` order.
#[derive(Debug, Default)]
pub struct FoldedStacks {
    stacks: BTreeMap<Vec<String>, i64>,
}

impl FoldedStacks {
    /// Add a single stack observation. Frames are leaf-first.
    pub fn add(&mut self, frames: Vec<String>, value: i64) {
        if value == 0 {
            return;
        }
        *self.stacks.entry(frames).or_insert(0) += value;
    }

    /// Merge another accumulator into this one.
    pub fn merge(&mut self, other: Self) {
        for (frames, value) in other.stacks {
            *self.stacks.entry(frames).or_insert(0) += value;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Render the classic folded representation: one `root;..;leaf value`
    /// line per stack, lexicographically sorted, zero-valued stacks dropped.
    pub fn into_lines(self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .stacks
            .into_iter()
            .filter(|(_, v)| *v != 0)
            .map(|(frames, value)| {
                let mut display: Vec<&str> = frames.iter().map(String::as_str).collect();
                display.reverse(); // leaf-first storage, root-first display
                format!("{} {value}", display.join(";"))
            })
            .collect();
        lines.sort();
        lines
    }

    /// Build a single-value-type pprof profile from the accumulated stacks.
    ///
    /// Each distinct frame name becomes one function and one location; the
    /// sample type and period type are taken verbatim from the caller.
    pub fn into_profile(
        self,
        sample_type: (&str, &str),
        period_type: (&str, &str),
        period: i64,
        time_nanos: i64,
    ) -> Profile {
        let mut p = Profile {
            time_nanos,
            period,
            ..Default::default()
        };
        p.string_table.push(String::new());
        let mut strings: BTreeMap<String, i64> = BTreeMap::new();
        let mut intern = |p: &mut Profile, s: &str| -> i64 {
            if s.is_empty() {
                return 0;
            }
            if let Some(&i) = strings.get(s) {
                return i;
            }
            let i = p.string_table.len() as i64;
            p.string_table.push(s.to_string());
            strings.insert(s.to_string(), i);
            i
        };

        let st = ValueType {
            r#type: intern(&mut p, sample_type.0),
            unit: intern(&mut p, sample_type.1),
        };
        p.sample_type.push(st);
        p.period_type = Some(ValueType {
            r#type: intern(&mut p, period_type.0),
            unit: intern(&mut p, period_type.1),
        });

        let mut frame_ids: BTreeMap<String, u64> = BTreeMap::new();
        for (frames, value) in self.stacks {
            if value == 0 {
                continue;
            }
            let mut location_id = Vec::with_capacity(frames.len());
            for frame in frames {
                let next = frame_ids.len() as u64 + 1;
                let id = *frame_ids.entry(frame.clone()).or_insert_with(|| {
                    let name = intern(&mut p, &frame);
                    p.function.push(Function {
                        id: next,
                        name,
                        system_name: name,
                        filename: 0,
                        start_line: 0,
                    });
                    p.location.push(Location {
                        id: next,
                        mapping_id: 0,
                        address: 0,
                        line: vec![Line {
                            function_id: next,
                            line: 0,
                        }],
                        is_folded: false,
                    });
                    next
                });
                location_id.push(id);
            }
            p.sample.push(Sample {
                location_id,
                value: vec![value],
                label: vec![],
            });
        }
        p
    }
}

/// Collapse one value dimension of a profile into folded lines.
pub fn stack_collapse(profile: &Profile, value_index: usize) -> Vec<String> {
    let mut folded = FoldedStacks::default();
    collapse_into(&mut folded, profile, value_index);
    folded.into_lines()
}

/// Collapse one value dimension of several profiles into a single folded
/// view, summing values of equal stacks. This is the reference merge used by
/// tests: merging profiles and collapsing the result must equal collapsing
/// the inputs directly.
pub fn stack_collapse_many<'a>(
    profiles: impl IntoIterator<Item = &'a Profile>,
    value_index: usize,
) -> Vec<String> {
    let mut folded = FoldedStacks::default();
    for p in profiles {
        collapse_into(&mut folded, p, value_index);
    }
    folded.into_lines()
}

fn collapse_into(folded: &mut FoldedStacks, p: &Profile, value_index: usize) {
    let locations: BTreeMap<u64, &Location> = p.location.iter().map(|l| (l.id, l)).collect();
    let functions: BTreeMap<u64, &Function> = p.function.iter().map(|f| (f.id, f)).collect();

    for sample in &p.sample {
        let Some(&value) = sample.value.get(value_index) else {
            continue;
        };
        // Leaf-first frame names; inline lines expand innermost-first.
        let mut frames = Vec::with_capacity(sample.location_id.len());
        for loc_id in &sample.location_id {
            let Some(loc) = locations.get(loc_id) else {
                continue;
            };
            for line in &loc.line {
                let name = functions
                    .get(&line.function_id)
                    .map(|f| string_at(p, f.name))
                    .unwrap_or("");
                frames.push(name.to_string());
            }
        }
        folded.add(frames, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileBuilder;

    #[test]
    fn collapse_merges_equal_stacks() {
        let p = ProfileBuilder::new(0)
            .cpu_profile()
            .for_stacktrace(&["foo", "bar"])
            .add_samples(&[2])
            .for_stacktrace(&["foo", "bar"])
            .add_samples(&[3])
            .for_stacktrace(&["foo"])
            .add_samples(&[5])
            .sample_profile();
        assert_eq!(stack_collapse(&p, 0), ["foo 5", "foo;bar 5"]);
    }

    #[test]
    fn collapse_many_equals_collapse_of_rebuilt_profile() {
        let a = ProfileBuilder::new(0)
            .cpu_profile()
            .for_stacktrace(&["a", "b", "c"])
            .add_samples(&[1])
            .sample_profile();
        let b = ProfileBuilder::new(0)
            .cpu_profile()
            .for_stacktrace(&["a", "b", "c"])
            .add_samples(&[41])
            .for_stacktrace(&["a"])
            .add_samples(&[7])
            .sample_profile();

        let reference = stack_collapse_many([&a, &b], 0);

        let mut folded = FoldedStacks::default();
        for p in [&a, &b] {
            for s in &p.sample {
                let names = s
                    .location_id
                    .iter()
                    .map(|id| {
                        let loc = p.location.iter().find(|l| l.id == *id).unwrap();
                        let f = p
                            .function
                            .iter()
                            .find(|f| f.id == loc.line[0].function_id)
                            .unwrap();
                        p.string_table[f.name as usize].clone()
                    })
                    .collect();
                folded.add(names, s.value[0]);
            }
        }
        let rebuilt = folded.into_profile(("cpu", "nanoseconds"), ("cpu", "nanoseconds"), 0, 0);
        assert_eq!(stack_collapse(&rebuilt, 0), reference);
    }

    #[test]
    fn zero_valued_stacks_are_dropped() {
        let mut folded = FoldedStacks::default();
        folded.add(vec!["x".into()], 0);
        assert!(folded.into_lines().is_empty());
    }
}
