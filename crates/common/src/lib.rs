//! Shared types for the storage-engine core: the record identifier, the
//! canonical error type, and host-supplied configuration.


use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Logical identifier for a page in the storage layer.
///
/// Page ids are dense, start at 0, and are never recycled.
/// Examples:
/// - `let freelist_page = PageId(0);`
/// - `let index_page = PageId(9001);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub i32);

/// Record identifier: `(page_id, slot_id)`, stable from insertion until the
/// record is explicitly deleted. Updates preserve the RID.
///
/// Ordering and wire format follow §3/§6 of the spec: lexicographic by
/// `(page_id, slot_id)`, serialized as two big-endian `i32`s.
/// Examples:
/// - `let rid = RecordId { page_id: PageId(42), slot_id: 3 };`
/// - `let rid = RecordId { page_id: PageId(0), slot_id: 0 };`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: i32,
}

impl RecordId {
    pub const WIRE_SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_id: i32) -> Self {
        Self { page_id, slot_id }
    }

    /// Serialize to 8 bytes big-endian: `page_id` then `slot_id`.
    pub fn serialize(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0..4].copy_from_slice(&self.page_id.0.to_be_bytes());
        out[4..8].copy_from_slice(&self.slot_id.to_be_bytes());
        out
    }

    /// Deserialize from 8 bytes big-endian. Fails if `bytes` is not exactly
    /// `WIRE_SIZE` long.
    pub fn deserialize(bytes: &[u8]) -> DbResult<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "RID wire format must be {} bytes, got {}",
                Self::WIRE_SIZE,
                bytes.len()
            )));
        }
        let page_id = i32::from_be_bytes(bytes[0..4].try_into().unwrap());
        let slot_id = i32::from_be_bytes(bytes[4..8].try_into().unwrap());
        Ok(Self {
            page_id: PageId(page_id),
            slot_id,
        })
    }
}

/// Canonical error type shared across the storage-engine core.
///
/// The variants map onto the behavioral taxonomy of spec §7: invalid
/// argument, resource exhaustion, I/O failure, and end-of-iteration are all
/// distinct kinds. Consistency warnings (double-unpin, unpin of an unknown
/// page) are logged rather than returned as errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// A programming error: oversized record, out-of-range page id, and
    /// the like. Fail fast, do not retry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// All frames in the buffer pool are pinned; `fetch_page`/`new_page`
    /// cannot find a victim. Non-fatal; the caller decides, typically by
    /// releasing pins and retrying.
    #[error("all buffer pool frames are pinned")]
    AllFramesPinned,
    /// `next()` called on an exhausted iterator.
    #[error("no such element")]
    NoSuchElement,
    /// Storage-layer failure not covered by a more specific variant.
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Host-supplied configuration for the storage-engine core.
///
/// # Example
/// ```
/// use common::StorageConfig;
/// use std::path::PathBuf;
///
/// let config = StorageConfig::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_pool_pages(256)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct StorageConfig {
    /// Directory where per-table heap files live.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub buffer_pool_pages: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            buffer_pool_pages: 256,
        }
    }
}
