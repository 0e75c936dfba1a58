//! Wire types of the three dataset regions.
//!
//! Each region is self-contained: the tsdb index and symbol table carry their
//! own string tables, so a dataset can be queried without consulting any
//! other region of the block.

use bytes::Bytes;
use prost::Message;

use crate::BlockError;

/// One ingested profile, transformed for storage.
///
/// Sample stacks are replaced by indices into the dataset's symbol table;
/// values are grouped per derived series (one series per pprof sample type).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProfileRecord {
    /// The 16 raw bytes of the profile ID.
    #[prost(bytes = "bytes", tag = "1")]
    pub profile_id: Bytes,
    /// Unix nanoseconds.
    #[prost(int64, tag = "2")]
    pub timestamp_nanos: i64,
    #[prost(string, repeated, tag = "3")]
    pub annotations: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub series: Vec<SeriesSamples>,
}

/// The samples of one profile that belong to one series.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeriesSamples {
    #[prost(uint64, tag = "1")]
    pub fingerprint: u64,
    #[prost(message, repeated, tag = "2")]
    pub samples: Vec<StackSample>,
}

/// One `(stack, value)` observation.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StackSample {
    /// Index into [`Symbols::stacktraces`].
    #[prost(uint32, tag = "1")]
    pub stacktrace_id: u32,
    #[prost(int64, tag = "2")]
    pub value: i64,
}

/// The tsdb-index region: the series present in a dataset with their labels.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeriesIndex {
    /// Region-local string table; index 0 is `""`.
    #[prost(string, repeated, tag = "1")]
    pub strings: Vec<String>,
    /// Sorted by fingerprint.
    #[prost(message, repeated, tag = "2")]
    pub series: Vec<SeriesEntry>,
}

/// One series: a fingerprint plus `name_idx, value_idx` label pairs.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SeriesEntry {
    #[prost(uint64, tag = "1")]
    pub fingerprint: u64,
    #[prost(uint32, repeated, tag = "2")]
    pub labels: Vec<u32>,
}

/// The symbols region: deduplicated strings, mappings, functions, locations
/// and stacktraces, referenced positionally.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Symbols {
    /// Region-local string table; index 0 is `""`.
    #[prost(string, repeated, tag = "1")]
    pub strings: Vec<String>,
    #[prost(message, repeated, tag = "2")]
    pub mappings: Vec<SymMapping>,
    #[prost(message, repeated, tag = "3")]
    pub functions: Vec<SymFunction>,
    #[prost(message, repeated, tag = "4")]
    pub locations: Vec<SymLocation>,
    #[prost(message, repeated, tag = "5")]
    pub stacktraces: Vec<Stacktrace>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SymMapping {
    #[prost(uint32, tag = "1")]
    pub filename: u32,
    #[prost(uint32, tag = "2")]
    pub build_id: u32,
    #[prost(bool, tag = "3")]
    pub has_functions: bool,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SymFunction {
    #[prost(uint32, tag = "1")]
    pub name: u32,
    #[prost(uint32, tag = "2")]
    pub system_name: u32,
    #[prost(uint32, tag = "3")]
    pub filename: u32,
    #[prost(int64, tag = "4")]
    pub start_line: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SymLocation {
    /// 1-based index into [`Symbols::mappings`]; 0 means no mapping.
    #[prost(uint32, tag = "1")]
    pub mapping: u32,
    #[prost(uint64, tag = "2")]
    pub address: u64,
    /// Innermost line first, as in pprof.
    #[prost(message, repeated, tag = "3")]
    pub lines: Vec<SymLine>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SymLine {
    /// Index into [`Symbols::functions`].
    #[prost(uint32, tag = "1")]
    pub function: u32,
    #[prost(int64, tag = "2")]
    pub line: i64,
}

/// A call stack as location indices, leaf-first.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stacktrace {
    #[prost(uint32, repeated, tag = "1")]
    pub locations: Vec<u32>,
}

/// Frame the profiles region: records are length-delimited so readers can
/// stream them without a containing message.
pub fn encode_records(records: &[ProfileRecord]) -> Bytes {
    let mut buf = Vec::new();
    for r in records {
        buf.extend_from_slice(&r.encode_length_delimited_to_vec());
    }
    Bytes::from(buf)
}

/// Decode a profiles region produced by [`encode_records`].
pub fn decode_records(mut region: Bytes) -> Result<Vec<ProfileRecord>, BlockError> {
    let mut records = Vec::new();
    while !region.is_empty() {
        records.push(ProfileRecord::decode_length_delimited(&mut region)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_framing_round_trip() {
        let records = vec![
            ProfileRecord {
                profile_id: Bytes::from_static(&[1; 16]),
                timestamp_nanos: 239_000_000,
                annotations: vec!["note".into()],
                series: vec![SeriesSamples {
                    fingerprint: 42,
                    samples: vec![StackSample {
                        stacktrace_id: 0,
                        value: 7,
                    }],
                }],
            },
            ProfileRecord {
                profile_id: Bytes::from_static(&[2; 16]),
                timestamp_nanos: 420_000_000,
                annotations: vec![],
                series: vec![],
            },
        ];
        let encoded = encode_records(&records);
        assert_eq!(decode_records(encoded).unwrap(), records);
    }

    #[test]
    fn truncated_region_is_an_error() {
        let records = vec![ProfileRecord {
            profile_id: Bytes::from_static(&[1; 16]),
            timestamp_nanos: 1,
            annotations: vec![],
            series: vec![],
        }];
        let encoded = encode_records(&records);
        let truncated = encoded.slice(0..encoded.len() - 1);
        assert!(decode_records(truncated).is_err());
    }
}
