//! The pprof wire model and the helpers built on top of it.
//!
//! Profiles arrive as opaque protobuf blobs in the standard pprof layout. This
//! crate owns the hand-written prost model of that schema, the decode entry
//! point used by the write path, the stack-collapse oracle used to compare
//! merged profiles in tests, and a builder for constructing test profiles.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

use prost::Message;

pub mod builder;
pub mod collapse;
mod proto;

pub use builder::ProfileBuilder;
pub use collapse::{stack_collapse, stack_collapse_many, FoldedStacks};
pub use proto::*;

/// Errors produced when decoding or validating a raw profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile does not decode as pprof: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("malformed profile: {0}")]
    Malformed(String),
}

/// Decode a raw pprof blob and validate the structural invariants the write
/// path relies on.
pub fn decode_profile(data: &[u8]) -> Result<Profile, ProfileError> {
    let profile = Profile::decode(data)?;
    validate_profile(&profile)?;
    Ok(profile)
}

/// Encode a profile to its protobuf wire form.
pub fn encode_profile(profile: &Profile) -> Vec<u8> {
    profile.encode_to_vec()
}

fn validate_profile(p: &Profile) -> Result<(), ProfileError> {
    if p.sample_type.is_empty() {
        return Err(ProfileError::Malformed("no sample types".into()));
    }
    for s in &p.sample {
        if s.value.len() != p.sample_type.len() {
            return Err(ProfileError::Malformed(format!(
                "sample has {} values, profile has {} sample types",
                s.value.len(),
                p.sample_type.len()
            )));
        }
    }
    let st_len = p.string_table.len() as i64;
    let index_ok = |i: i64| i >= 0 && i < st_len;
    for vt in p
        .sample_type
        .iter()
        .chain(p.period_type.as_ref())
    {
        if !index_ok(vt.r#type) || !index_ok(vt.unit) {
            return Err(ProfileError::Malformed(
                "value type string index out of range".into(),
            ));
        }
    }
    for f in &p.function {
        if !index_ok(f.name) {
            return Err(ProfileError::Malformed(
                "function name string index out of range".into(),
            ));
        }
    }
    Ok(())
}

/// Resolve a string-table index, mapping out-of-range indices to `""`.
pub(crate) fn string_at(p: &Profile, i: i64) -> &str {
    usize::try_from(i)
        .ok()
        .and_then(|i| p.string_table.get(i))
        .map(String::as_str)
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn decode_rejects_garbage() {
        assert_matches!(decode_profile(b"not a profile"), Err(ProfileError::Decode(_)));
    }

    #[test]
    fn decode_rejects_empty_sample_types() {
        let p = Profile::default();
        assert_matches!(
            decode_profile(&encode_profile(&p)),
            Err(ProfileError::Malformed(_))
        );
    }

    #[test]
    fn decode_rejects_value_arity_mismatch() {
        let mut p = Profile {
            string_table: vec!["".into(), "cpu".into(), "nanoseconds".into()],
            sample_type: vec![ValueType { r#type: 1, unit: 2 }],
            ..Default::default()
        };
        p.sample.push(Sample {
            location_id: vec![],
            value: vec![1, 2],
            label: vec![],
        });
        assert_matches!(
            decode_profile(&encode_profile(&p)),
            Err(ProfileError::Malformed(_))
        );
    }

    #[test]
    fn decode_round_trip() {
        let b = ProfileBuilder::new(42_000_000)
            .cpu_profile()
            .for_stacktrace(&["foo", "bar"])
            .add_samples(&[7]);
        let p = b.sample_profile();
        let decoded = decode_profile(&encode_profile(&p)).unwrap();
        assert_eq!(decoded, p);
    }
}
