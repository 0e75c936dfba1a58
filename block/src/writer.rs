//! Serializes sealed datasets into a single block object.

use bytes::{BufMut, Bytes, BytesMut};
use data_types::{BlockId, Shard};
use prost::Message;

use crate::{
    meta::{encode_label_runs, StringTable},
    BlockMeta, Dataset,
};

/// Magic trailer identifying a block object, "blk1" little-endian.
pub const BLOCK_MAGIC: u32 = 0x31_6b_6c_62;

/// Accumulates datasets and produces the final object body plus its
/// [`BlockMeta`].
///
/// Datasets must be appended in `(tenant, service)` order; the writer records
/// absolute region offsets as it goes.
#[derive(Debug)]
pub struct BlockWriter {
    id: BlockId,
    shard: Shard,
    buf: BytesMut,
    string_table: StringTable,
    datasets: Vec<Dataset>,
}

impl BlockWriter {
    pub fn new(shard: Shard) -> Self {
        Self {
            id: BlockId::new(),
            shard,
            buf: BytesMut::new(),
            string_table: StringTable::new(),
            datasets: Vec::new(),
        }
    }

    /// The ID the finished block will carry.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Append one dataset's three regions, recording its table of contents.
    ///
    /// `min_time_ms`/`max_time_ms` are unix milliseconds, inclusive;
    /// `label_runs` describe the distinct series shapes present (see
    /// [`crate::meta::encode_label_runs`]).
    #[allow(clippy::too_many_arguments)]
    pub fn append_dataset(
        &mut self,
        tenant: &str,
        service: &str,
        min_time_ms: i64,
        max_time_ms: i64,
        label_runs: &[Vec<(String, String)>],
        profiles: Bytes,
        tsdb_index: Bytes,
        symbols: Bytes,
    ) {
        let off_profiles = self.buf.len() as u64;
        let off_tsdb = off_profiles + profiles.len() as u64;
        let off_symbols = off_tsdb + tsdb_index.len() as u64;
        let size = (profiles.len() + tsdb_index.len() + symbols.len()) as u64;

        self.buf.extend_from_slice(&profiles);
        self.buf.extend_from_slice(&tsdb_index);
        self.buf.extend_from_slice(&symbols);

        let tenant = self.string_table.put(tenant);
        let name = self.string_table.put(service);
        let labels = encode_label_runs(&mut self.string_table, label_runs);
        self.datasets.push(Dataset {
            tenant,
            name,
            min_time: min_time_ms,
            max_time: max_time_ms,
            table_of_contents: vec![off_profiles, off_tsdb, off_symbols],
            size,
            labels,
        });
    }

    /// Finish the block: append the footer and return the metadata and the
    /// complete object body.
    pub fn finish(self) -> (BlockMeta, Bytes) {
        let Self {
            id,
            shard,
            mut buf,
            string_table,
            datasets,
        } = self;

        let min_time = datasets.iter().map(|d| d.min_time).min().unwrap_or(0);
        let max_time = datasets.iter().map(|d| d.max_time).max().unwrap_or(0);
        let meta = BlockMeta {
            id: id.to_string(),
            shard: shard.get(),
            min_time,
            max_time,
            size: buf.len() as u64,
            datasets,
            string_table: string_table.into_vec(),
        };

        let footer = meta.encode_to_vec();
        buf.extend_from_slice(&footer);
        buf.put_u32_le(footer.len() as u32);
        buf.put_u32_le(BLOCK_MAGIC);
        (meta, buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_footer;

    #[test]
    fn writer_records_absolute_offsets() {
        let mut w = BlockWriter::new(Shard::new(1));
        w.append_dataset(
            "ta",
            "svc1",
            10,
            1337,
            &[],
            Bytes::from_static(b"ppppp"),
            Bytes::from_static(b"ttt"),
            Bytes::from_static(b"ss"),
        );
        w.append_dataset(
            "tb",
            "svc1",
            239,
            420,
            &[],
            Bytes::from_static(b"pp"),
            Bytes::from_static(b"t"),
            Bytes::from_static(b"s"),
        );
        let (meta, body) = w.finish();

        assert_eq!(meta.datasets[0].table_of_contents, [0, 5, 8]);
        assert_eq!(meta.datasets[0].size, 10);
        assert_eq!(meta.datasets[1].table_of_contents, [10, 12, 13]);
        assert_eq!(meta.datasets[1].size, 4);
        assert_eq!(meta.size, 14);
        assert_eq!(meta.min_time, 10);
        assert_eq!(meta.max_time, 1337);
        for ds in &meta.datasets {
            ds.validate_toc(meta.size).unwrap();
        }

        // The footer carries the same metadata.
        assert_eq!(read_footer(&body).unwrap(), meta);
    }
}
