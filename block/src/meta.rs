//! Block metadata: the wire types registered with the metadata index and
//! written to DLQ entries, plus the block-level string table.

use std::collections::HashMap;

use crate::BlockError;

/// Metadata describing one immutable block object.
///
/// `min_time`/`max_time` are unix milliseconds, inclusive, the component-wise
/// extremes over the datasets. `size` is the byte length of the block body
/// (all dataset regions, excluding the footer).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockMeta {
    /// UUID v7 in canonical string form; lexicographically time-ordered.
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(uint32, tag = "2")]
    pub shard: u32,
    #[prost(int64, tag = "3")]
    pub min_time: i64,
    #[prost(int64, tag = "4")]
    pub max_time: i64,
    #[prost(uint64, tag = "5")]
    pub size: u64,
    /// Ordered by `(tenant, service)` string values.
    #[prost(message, repeated, tag = "6")]
    pub datasets: Vec<Dataset>,
    /// Deduplicated strings referenced by all datasets. Index 0 is `""`.
    #[prost(string, repeated, tag = "7")]
    pub string_table: Vec<String>,
}

/// The slice of a block belonging to one `(tenant, service)` pair.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dataset {
    /// String-table index of the tenant id.
    #[prost(uint32, tag = "1")]
    pub tenant: u32,
    /// String-table index of the service name.
    #[prost(uint32, tag = "2")]
    pub name: u32,
    /// Unix milliseconds, inclusive.
    #[prost(int64, tag = "3")]
    pub min_time: i64,
    /// Unix milliseconds, inclusive.
    #[prost(int64, tag = "4")]
    pub max_time: i64,
    /// Absolute byte offsets of the `profiles`, `tsdb_index` and `symbols`
    /// regions within the block object.
    #[prost(uint64, repeated, tag = "5")]
    pub table_of_contents: Vec<u64>,
    /// Total byte length of the dataset (all three regions).
    #[prost(uint64, tag = "6")]
    pub size: u64,
    /// Flat label runs: `count, name_idx, value_idx, …` per distinct series
    /// shape, indices into the block string table.
    #[prost(uint32, repeated, tag = "7")]
    pub labels: Vec<u32>,
}

impl BlockMeta {
    /// Resolve a string-table index.
    pub fn string(&self, i: u32) -> &str {
        self.string_table
            .get(i as usize)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// The tenant owning a dataset of this block.
    pub fn dataset_tenant(&self, ds: &Dataset) -> &str {
        self.string(ds.tenant)
    }

    /// The service a dataset of this block belongs to.
    pub fn dataset_service(&self, ds: &Dataset) -> &str {
        self.string(ds.name)
    }
}

impl Dataset {
    /// Validate the table-of-contents invariants against the containing
    /// object length: three strictly increasing offsets, all regions within
    /// `[toc[0], toc[0] + size)`, and the dataset within the object.
    pub fn validate_toc(&self, object_len: u64) -> Result<(), BlockError> {
        let [profiles, tsdb, symbols] = self.table_of_contents.as_slice() else {
            return Err(BlockError::Corrupt(format!(
                "table of contents has {} entries, want 3",
                self.table_of_contents.len()
            )));
        };
        let end = profiles
            .checked_add(self.size)
            .ok_or_else(|| BlockError::Corrupt("dataset size overflow".into()))?;
        if !(profiles < tsdb && tsdb < symbols && *symbols < end) {
            return Err(BlockError::Corrupt(format!(
                "table of contents not increasing: [{profiles}, {tsdb}, {symbols}], end {end}"
            )));
        }
        if end > object_len {
            return Err(BlockError::Corrupt(format!(
                "dataset ends at {end}, object is {object_len} bytes"
            )));
        }
        Ok(())
    }
}

/// A deduplicating string table. Index 0 is always the empty string.
#[derive(Debug)]
pub struct StringTable {
    strings: Vec<String>,
    index: HashMap<String, u32>,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            strings: vec![String::new()],
            index: HashMap::from([(String::new(), 0)]),
        }
    }

    /// Intern a string, returning its index.
    pub fn put(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    pub fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

/// Encode label runs into the flat `count, name_idx, value_idx, …` form.
pub fn encode_label_runs(st: &mut StringTable, runs: &[Vec<(String, String)>]) -> Vec<u32> {
    let mut out = Vec::new();
    for run in runs {
        out.push(run.len() as u32);
        for (name, value) in run {
            out.push(st.put(name));
            out.push(st.put(value));
        }
    }
    out
}

/// Decode flat label runs back into `(name, value)` pair lists.
pub fn decode_label_runs(
    string_table: &[String],
    flat: &[u32],
) -> Result<Vec<Vec<(String, String)>>, BlockError> {
    let string = |i: u32| -> Result<String, BlockError> {
        string_table
            .get(i as usize)
            .cloned()
            .ok_or_else(|| BlockError::Corrupt(format!("label string index {i} out of range")))
    };
    let mut runs = Vec::new();
    let mut i = 0;
    while i < flat.len() {
        let n = flat[i] as usize;
        i += 1;
        let mut run = Vec::with_capacity(n);
        for _ in 0..n {
            let (Some(&name), Some(&value)) = (flat.get(i), flat.get(i + 1)) else {
                return Err(BlockError::Corrupt("truncated label run".into()));
            };
            run.push((string(name)?, string(value)?));
            i += 2;
        }
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn string_table_dedupes() {
        let mut st = StringTable::new();
        assert_eq!(st.put(""), 0);
        assert_eq!(st.put("t1"), 1);
        assert_eq!(st.put("svc"), 2);
        assert_eq!(st.put("t1"), 1);
        assert_eq!(st.into_vec(), ["", "t1", "svc"]);
    }

    #[test]
    fn label_runs_round_trip() {
        let mut st = StringTable::new();
        let runs = vec![
            vec![
                ("service_name".to_string(), "svc1".to_string()),
                ("__profile_type__".to_string(), "p:c:n:c:n".to_string()),
            ],
            vec![("__unsymbolized__".to_string(), "true".to_string())],
        ];
        let flat = encode_label_runs(&mut st, &runs);
        assert_eq!(flat[0], 2);
        let decoded = decode_label_runs(&st.into_vec(), &flat).unwrap();
        assert_eq!(decoded, runs);
    }

    #[test]
    fn decode_rejects_truncated_runs() {
        assert_matches!(
            decode_label_runs(&["".into()], &[2, 0, 0, 0]),
            Err(BlockError::Corrupt(_))
        );
    }

    #[test]
    fn toc_validation() {
        let ds = Dataset {
            table_of_contents: vec![0, 10, 20],
            size: 30,
            ..Default::default()
        };
        ds.validate_toc(30).unwrap();
        assert_matches!(ds.validate_toc(29), Err(BlockError::Corrupt(_)));

        let bad = Dataset {
            table_of_contents: vec![0, 20, 10],
            size: 30,
            ..Default::default()
        };
        assert_matches!(bad.validate_toc(100), Err(BlockError::Corrupt(_)));

        let empty_region = Dataset {
            table_of_contents: vec![0, 0, 10],
            size: 30,
            ..Default::default()
        };
        assert_matches!(empty_region.validate_toc(100), Err(BlockError::Corrupt(_)));
    }
}
