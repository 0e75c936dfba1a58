//! Reading block objects and their datasets.

use bytes::Bytes;
use data_types::Labels;
use prost::Message;

use objstore::Bucket;

use crate::{
    format::{decode_records, ProfileRecord, SeriesEntry, SeriesIndex, Symbols},
    paths,
    writer::BLOCK_MAGIC,
    BlockError, BlockMeta, Dataset,
};

/// A fetched block object paired with its metadata.
///
/// Blocks are immutable once published, so the fetched bytes are shared
/// freely between dataset readers.
#[derive(Debug)]
pub struct BlockObject {
    meta: BlockMeta,
    data: Bytes,
}

impl BlockObject {
    /// Fetch the object described by `meta` from the bucket.
    pub async fn open(bucket: &dyn Bucket, meta: BlockMeta) -> Result<Self, BlockError> {
        let id = data_types::BlockId::parse(&meta.id)
            .map_err(|e| BlockError::Corrupt(format!("bad block id {:?}: {e}", meta.id)))?;
        let path = paths::object_path(data_types::Shard::new(meta.shard), id);
        let data = bucket.get(&path).await?;
        Ok(Self { meta, data })
    }

    /// Wrap already-fetched bytes.
    pub fn from_parts(meta: BlockMeta, data: Bytes) -> Self {
        Self { meta, data }
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// Decode one dataset's regions into a reader.
    pub fn dataset(&self, ds: &Dataset) -> Result<DatasetReader, BlockError> {
        ds.validate_toc(self.data.len() as u64)?;
        let toc = &ds.table_of_contents;
        let (profiles_off, tsdb_off, symbols_off) =
            (toc[0] as usize, toc[1] as usize, toc[2] as usize);
        let end = toc[0] as usize + ds.size as usize;
        DatasetReader::new(
            self.data.slice(profiles_off..tsdb_off),
            self.data.slice(tsdb_off..symbols_off),
            self.data.slice(symbols_off..end),
        )
    }
}

/// Parse the trailing footer of a block object: `meta.pb ‖ len ‖ magic`.
pub fn read_footer(data: &[u8]) -> Result<BlockMeta, BlockError> {
    if data.len() < 8 {
        return Err(BlockError::Corrupt("object shorter than footer".into()));
    }
    let magic = u32::from_le_bytes(data[data.len() - 4..].try_into().expect("4 bytes"));
    if magic != BLOCK_MAGIC {
        return Err(BlockError::Corrupt(format!("bad magic {magic:#x}")));
    }
    let len =
        u32::from_le_bytes(data[data.len() - 8..data.len() - 4].try_into().expect("4 bytes"))
            as usize;
    let footer_start = data
        .len()
        .checked_sub(8 + len)
        .ok_or_else(|| BlockError::Corrupt(format!("footer length {len} exceeds object")))?;
    Ok(BlockMeta::decode(&data[footer_start..data.len() - 8])?)
}

/// Decoded regions of a single dataset.
#[derive(Debug)]
pub struct DatasetReader {
    index: SeriesIndex,
    symbols: Symbols,
    profiles: Bytes,
}

impl DatasetReader {
    /// Decode the tsdb-index and symbols regions; the profiles region is
    /// decoded lazily by [`Self::records`].
    pub fn new(profiles: Bytes, tsdb_index: Bytes, symbols: Bytes) -> Result<Self, BlockError> {
        Ok(Self {
            index: SeriesIndex::decode(tsdb_index)?,
            symbols: Symbols::decode(symbols)?,
            profiles,
        })
    }

    /// The series present in this dataset.
    pub fn series(&self) -> &[SeriesEntry] {
        &self.index.series
    }

    /// Decode the labels of one series entry.
    pub fn series_labels(&self, entry: &SeriesEntry) -> Result<Labels, BlockError> {
        let string = |i: u32| -> Result<&str, BlockError> {
            self.index
                .strings
                .get(i as usize)
                .map(String::as_str)
                .ok_or_else(|| {
                    BlockError::Corrupt(format!("series label string index {i} out of range"))
                })
        };
        let mut pairs = Vec::with_capacity(entry.labels.len() / 2);
        for pair in entry.labels.chunks(2) {
            let [name, value] = pair else {
                return Err(BlockError::Corrupt("odd series label pair list".into()));
            };
            pairs.push((string(*name)?.to_string(), string(*value)?.to_string()));
        }
        Ok(Labels::from_pairs(pairs))
    }

    /// Decode all profile records of this dataset.
    pub fn records(&self) -> Result<Vec<ProfileRecord>, BlockError> {
        decode_records(self.profiles.clone())
    }

    /// Resolve a stacktrace to its frame function names, leaf-first. Inline
    /// lines expand innermost-first, matching pprof sample order.
    pub fn stack_frames(&self, stacktrace_id: u32) -> Result<Vec<String>, BlockError> {
        let stack = self
            .symbols
            .stacktraces
            .get(stacktrace_id as usize)
            .ok_or_else(|| {
                BlockError::Corrupt(format!("stacktrace {stacktrace_id} out of range"))
            })?;
        let mut frames = Vec::with_capacity(stack.locations.len());
        for &loc_idx in &stack.locations {
            let loc = self.symbols.locations.get(loc_idx as usize).ok_or_else(|| {
                BlockError::Corrupt(format!("location {loc_idx} out of range"))
            })?;
            for line in &loc.lines {
                let function = self
                    .symbols
                    .functions
                    .get(line.function as usize)
                    .ok_or_else(|| {
                        BlockError::Corrupt(format!("function {} out of range", line.function))
                    })?;
                let name = self
                    .symbols
                    .strings
                    .get(function.name as usize)
                    .map(String::as_str)
                    .unwrap_or("");
                frames.push(name.to_string());
            }
        }
        Ok(frames)
    }

    /// The raw symbol table of this dataset.
    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn footer_rejects_corruption() {
        assert_matches!(read_footer(b"short"), Err(BlockError::Corrupt(_)));
        assert_matches!(
            read_footer(&[0u8; 16]),
            Err(BlockError::Corrupt(_)) // bad magic
        );
        let mut data = vec![0u8; 8];
        data[0..4].copy_from_slice(&1000u32.to_le_bytes());
        data[4..8].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        assert_matches!(read_footer(&data), Err(BlockError::Corrupt(_)));
    }
}
