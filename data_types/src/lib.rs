//! Shared data types used across the profile segment store.
//!
//! The types in this crate are deliberately small and free of I/O: identifiers
//! for shards, blocks and profiles, label sets with stable fingerprints,
//! profile type selectors, and PromQL-style label matchers.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::use_self,
    missing_debug_implementations
)]

use std::fmt::Display;

use uuid::Uuid;

pub mod labels;
pub mod matcher;
pub mod profile_type;

pub use labels::{LabelPair, Labels};
pub use matcher::{parse_selector, MatchOp, Matcher};
pub use profile_type::ProfileType;

/// A shard number within the write path fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Shard(u32);

impl Shard {
    /// Construct a shard from its number.
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// The shard number.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Display for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Unique identifier of an immutable block object.
///
/// Block IDs are UUID v7 and therefore lexicographically sortable by creation
/// time, which keeps object-store listings (and DLQ replay) in approximate
/// time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(Uuid);

impl BlockId {
    /// Generate a new, time-ordered block ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse a block ID from its canonical string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::try_parse(s)?))
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

/// Unique identifier of an ingested profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfileId(Uuid);

impl ProfileId {
    /// Generate a random profile ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw 16 bytes of the ID.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Reconstruct an ID from its raw bytes.
    pub fn from_bytes(b: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(b))
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.as_hyphenated().fmt(f)
    }
}

/// Truncating conversion from unix nanoseconds to unix milliseconds.
///
/// Profile timestamps are nanoseconds everywhere inside heads and profile
/// records; dataset and block `min_time`/`max_time` are milliseconds. This is
/// the only sanctioned conversion between the two.
pub fn nanos_to_millis(nanos: i64) -> i64 {
    nanos / 1_000_000
}

/// Widening conversion from unix milliseconds to unix nanoseconds.
pub fn millis_to_nanos(millis: i64) -> i64 {
    millis * 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_sort_by_creation_time() {
        let a = BlockId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = BlockId::new();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn block_id_parse_round_trip() {
        let id = BlockId::new();
        assert_eq!(BlockId::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn time_conversions_truncate() {
        assert_eq!(nanos_to_millis(239_999_999), 239);
        assert_eq!(millis_to_nanos(239), 239_000_000);
        assert_eq!(nanos_to_millis(millis_to_nanos(1337)), 1337);
    }
}
