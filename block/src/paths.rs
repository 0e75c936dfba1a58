//! Object-store path construction and validation.
//!
//! Both block data and DLQ metadata paths are exactly five `/`-separated
//! segments.

use data_types::{BlockId, Shard};

/// Prefix under which block data objects live.
pub const DIR_NAME_SEGMENT: &str = "segments";

/// Prefix under which dead-letter metadata lives.
pub const DIR_NAME_DLQ: &str = "dlq";

/// Placeholder tenant directory for multi-tenant segment blocks.
pub const DIR_NAME_ANON_TENANT: &str = "anonymous";

/// File name of the block data object.
pub const FILE_NAME_DATA_OBJECT: &str = "block.bin";

/// File name of a DLQ metadata entry.
pub const FILE_NAME_METADATA_OBJECT: &str = "meta.pb";

/// `segments/<shard>/anonymous/<block_id>/block.bin`
pub fn object_path(shard: Shard, id: BlockId) -> String {
    format!("{DIR_NAME_SEGMENT}/{shard}/{DIR_NAME_ANON_TENANT}/{id}/{FILE_NAME_DATA_OBJECT}")
}

/// `dlq/<shard>/anonymous/<block_id>/meta.pb`
pub fn dlq_path(shard: Shard, id: BlockId) -> String {
    format!("{DIR_NAME_DLQ}/{shard}/{DIR_NAME_ANON_TENANT}/{id}/{FILE_NAME_METADATA_OBJECT}")
}

/// The prefix scanned by DLQ recovery.
pub fn dlq_prefix() -> String {
    format!("{DIR_NAME_DLQ}/")
}

/// Whether `path` names a block data object.
pub fn is_segment_path(path: &str) -> bool {
    let parts: Vec<&str> = path.split('/').collect();
    parts.len() == 5
        && parts[0] == DIR_NAME_SEGMENT
        && parts[2] == DIR_NAME_ANON_TENANT
        && parts[4] == FILE_NAME_DATA_OBJECT
}

/// Whether `path` names a DLQ metadata entry.
pub fn is_dlq_path(path: &str) -> bool {
    let parts: Vec<&str> = path.split('/').collect();
    parts.len() == 5
        && parts[0] == DIR_NAME_DLQ
        && parts[2] == DIR_NAME_ANON_TENANT
        && parts[4] == FILE_NAME_METADATA_OBJECT
}
