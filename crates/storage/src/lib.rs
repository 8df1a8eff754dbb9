use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use common::{DbError, DbResult, PageId, RecordId};

/// Fixed size of every page, on disk and in memory.
pub const PAGE_SIZE: usize = 4096;
/// Size of the fixed-offset page header (page id, prev/next, free-space
/// pointer, tuple count, reserved).
pub const HEADER_SIZE: usize = 24;
/// Size of one slot-directory entry (2-byte offset, 2-byte length).
pub const SLOT_SIZE: usize = 4;
/// Largest record that can ever fit in a page, independent of current
/// occupancy: `PAGE_SIZE - HEADER_SIZE - SLOT_SIZE`.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - HEADER_SIZE - SLOT_SIZE;

const PAGE_ID_OFFSET: usize = 0;
const PREV_PAGE_ID_OFFSET: usize = 4;
const NEXT_PAGE_ID_OFFSET: usize = 8;
const FREE_SPACE_POINTER_OFFSET: usize = 12;
const TUPLE_COUNT_OFFSET: usize = 16;

/// An opaque, fixed 4096-byte page buffer.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    /// A freshly-allocated, fully zeroed page.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE],
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque byte-sequence record, optionally bound to the RID it lives at.
///
/// Records are never interpreted by the storage engine; schema
/// interpretation is a higher layer's problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub data: Vec<u8>,
    rid: Option<RecordId>,
}

impl Record {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, rid: None }
    }

    pub fn with_rid(mut self, rid: RecordId) -> Self {
        self.rid = Some(rid);
        self
    }

    pub fn set_rid(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    pub fn rid(&self) -> Option<RecordId> {
        self.rid
    }
}

fn page_id_to_raw(id: Option<PageId>) -> i32 {
    id.map(|p| p.0).unwrap_or(-1)
}

fn raw_to_page_id(raw: i32) -> Option<PageId> {
    if raw < 0 { None } else { Some(PageId(raw)) }
}

/// A thin, in-place interpreter of a page buffer as the layout described in
/// spec §3/§4.5: a 24-byte header, a forward-growing slot directory, and a
/// backward-growing record heap.
///
/// Not thread-safe: callers must externally serialize write access to the
/// same underlying buffer.
pub struct SlottedPage<'a> {
    data: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE, "slotted page requires a full page buffer");
        Self { data }
    }

    /// Writes a fresh header: `next = -1`, free-space pointer at the end of
    /// the page, zero tuples.
    pub fn init(&mut self, page_id: PageId, prev_page_id: Option<PageId>) {
        self.set_page_id(page_id);
        self.set_prev_page_id(prev_page_id);
        self.set_next_page_id(None);
        self.set_free_space_pointer(PAGE_SIZE);
        self.set_tuple_count(0);
        self.data[20..24].fill(0);
    }

    pub fn page_id(&self) -> PageId {
        PageId(self.read_i32(PAGE_ID_OFFSET))
    }

    fn set_page_id(&mut self, id: PageId) {
        self.write_i32(PAGE_ID_OFFSET, id.0);
    }

    pub fn prev_page_id(&self) -> Option<PageId> {
        raw_to_page_id(self.read_i32(PREV_PAGE_ID_OFFSET))
    }

    pub fn set_prev_page_id(&mut self, id: Option<PageId>) {
        self.write_i32(PREV_PAGE_ID_OFFSET, page_id_to_raw(id));
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        raw_to_page_id(self.read_i32(NEXT_PAGE_ID_OFFSET))
    }

    pub fn set_next_page_id(&mut self, id: Option<PageId>) {
        self.write_i32(NEXT_PAGE_ID_OFFSET, page_id_to_raw(id));
    }

    pub fn tuple_count(&self) -> i32 {
        self.read_i32(TUPLE_COUNT_OFFSET)
    }

    fn set_tuple_count(&mut self, count: i32) {
        self.write_i32(TUPLE_COUNT_OFFSET, count);
    }

    fn free_space_pointer(&self) -> usize {
        self.read_i32(FREE_SPACE_POINTER_OFFSET) as usize
    }

    fn set_free_space_pointer(&mut self, offset: usize) {
        self.write_i32(FREE_SPACE_POINTER_OFFSET, offset as i32);
    }

    fn slot_region_end(&self) -> usize {
        HEADER_SIZE + self.tuple_count() as usize * SLOT_SIZE
    }

    fn free_space(&self) -> usize {
        self.free_space_pointer().saturating_sub(self.slot_region_end())
    }

    /// Inserts `bytes` as a new tuple.
    ///
    /// Returns `Ok(slot_id)` on success, `Ok(-1)` when the page lacks room
    /// (the caller must allocate a new page), or `Err` for a record that
    /// violates the size precondition outright.
    pub fn insert_tuple(&mut self, bytes: &[u8]) -> DbResult<i32> {
        if bytes.is_empty() {
            return Err(DbError::InvalidArgument("record must be non-empty".into()));
        }
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "record of {} bytes exceeds max record size {}",
                bytes.len(),
                MAX_RECORD_SIZE
            )));
        }
        if self.free_space() < bytes.len() + SLOT_SIZE {
            return Ok(-1);
        }

        let new_free = self.free_space_pointer() - bytes.len();
        self.data[new_free..new_free + bytes.len()].copy_from_slice(bytes);

        let slot_id = self.tuple_count();
        self.write_slot(slot_id, new_free as u16, bytes.len() as u16);
        self.set_tuple_count(slot_id + 1);
        self.set_free_space_pointer(new_free);

        Ok(slot_id)
    }

    /// Returns the tuple at `slot_id`, or `None` if the slot is out of
    /// range or tombstoned.
    pub fn get_tuple(&self, slot_id: i32) -> Option<Record> {
        let (offset, len) = self.read_slot(slot_id)?;
        if len == 0 {
            return None;
        }
        let (start, end) = (offset as usize, offset as usize + len as usize);
        let record = Record::new(self.data[start..end].to_vec())
            .with_rid(RecordId::new(self.page_id(), slot_id));
        Some(record)
    }

    /// Overwrites the tuple at `slot_id` in place. Fails if the slot is
    /// out of range, tombstoned, or the new payload is larger than the
    /// original.
    pub fn update_tuple(&mut self, bytes: &[u8], slot_id: i32) -> bool {
        let Some((offset, len)) = self.read_slot(slot_id) else {
            return false;
        };
        if len == 0 || bytes.len() > len as usize {
            return false;
        }
        let start = offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write_slot(slot_id, offset, bytes.len() as u16);
        true
    }

    /// Tombstones `slot_id`. Returns `false` if out of range or already
    /// deleted. The slot id is never reused within this page.
    pub fn mark_deleted(&mut self, slot_id: i32) -> bool {
        let Some((offset, len)) = self.read_slot(slot_id) else {
            return false;
        };
        if len == 0 {
            return false;
        }
        self.write_slot(slot_id, offset, 0);
        true
    }

    /// Convenience wrapper around `mark_deleted` that uses the record's
    /// own RID, requiring that it names this page.
    pub fn delete_tuple(&mut self, record: &Record) -> i32 {
        match record.rid() {
            Some(rid) if rid.page_id == self.page_id() => {
                if self.mark_deleted(rid.slot_id) { rid.slot_id } else { -1 }
            }
            _ => -1,
        }
    }

    fn slot_offset(slot_id: i32) -> usize {
        HEADER_SIZE + slot_id as usize * SLOT_SIZE
    }

    fn read_slot(&self, slot_id: i32) -> Option<(u16, u16)> {
        if slot_id < 0 || slot_id >= self.tuple_count() {
            return None;
        }
        let start = Self::slot_offset(slot_id);
        let offset = u16::from_be_bytes(self.data[start..start + 2].try_into().unwrap());
        let len = u16::from_be_bytes(self.data[start + 2..start + 4].try_into().unwrap());
        Some((offset, len))
    }

    fn write_slot(&mut self, slot_id: i32, offset: u16, len: u16) {
        let start = Self::slot_offset(slot_id);
        self.data[start..start + 2].copy_from_slice(&offset.to_be_bytes());
        self.data[start + 2..start + 4].copy_from_slice(&len.to_be_bytes());
    }

    fn read_i32(&self, offset: usize) -> i32 {
        i32::from_be_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    fn write_i32(&mut self, offset: usize, value: i32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Append-only, page-granular disk manager over a single file.
///
/// Page ids are dense, start at 0, and are never recycled. All operations
/// are independent and address the file by absolute offset, so they may be
/// invoked concurrently by the buffer pool for distinct pages.
#[derive(Debug)]
pub struct DiskManager {
    file: File,
    num_pages: AtomicU64,
}

impl DiskManager {
    /// Opens (creating if absent) the backing file and computes
    /// `num_pages` from its current size. A size that is not a multiple of
    /// `PAGE_SIZE` is tolerated, with the trailing partial page treated as
    /// absent.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            log::warn!(
                "db file size {len} is not a multiple of PAGE_SIZE ({PAGE_SIZE}); \
                 treating the trailing partial page as absent"
            );
        }
        let num_pages = len / PAGE_SIZE as u64;
        Ok(Self {
            file,
            num_pages: AtomicU64::new(num_pages),
        })
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages.load(Ordering::SeqCst)
    }

    /// Grows the file by one zeroed page and returns its id. On I/O
    /// failure the allocation counter is rolled back.
    pub fn allocate_page(&self) -> DbResult<PageId> {
        let id = self.num_pages.fetch_add(1, Ordering::SeqCst);
        let offset = id * PAGE_SIZE as u64;
        let zeros = [0u8; PAGE_SIZE];
        if let Err(e) = self.file.write_all_at(&zeros, offset) {
            self.num_pages.fetch_sub(1, Ordering::SeqCst);
            return Err(DbError::Io(e));
        }
        if let Err(e) = self.file.sync_data() {
            self.num_pages.fetch_sub(1, Ordering::SeqCst);
            return Err(DbError::Io(e));
        }
        Ok(PageId(id as i32))
    }

    fn validate_page_id(&self, page_id: PageId) -> DbResult<u64> {
        let num_pages = self.num_pages();
        if page_id.0 < 0 || page_id.0 as u64 >= num_pages {
            return Err(DbError::InvalidArgument(format!(
                "page id {} out of range (num_pages = {num_pages})",
                page_id.0
            )));
        }
        Ok(page_id.0 as u64)
    }

    /// Positioned read of exactly `PAGE_SIZE` bytes. `dst` must be exactly
    /// `PAGE_SIZE` bytes. Loops until the full page is read; a premature
    /// EOF is a fatal (data corruption) failure.
    pub fn read_page(&self, page_id: PageId, dst: &mut [u8]) -> DbResult<()> {
        let id = self.validate_page_id(page_id)?;
        if dst.len() != PAGE_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "read buffer must be {PAGE_SIZE} bytes, got {}",
                dst.len()
            )));
        }
        let base = id * PAGE_SIZE as u64;
        let mut read = 0usize;
        while read < PAGE_SIZE {
            let n = self.file.read_at(&mut dst[read..], base + read as u64)?;
            if n == 0 {
                return Err(DbError::Storage(format!(
                    "short read on page {}: got {read} of {PAGE_SIZE} bytes",
                    page_id.0
                )));
            }
            read += n;
        }
        Ok(())
    }

    /// Positioned write of exactly `PAGE_SIZE` bytes, followed by an fsync
    /// of file data.
    pub fn write_page(&self, page_id: PageId, src: &[u8]) -> DbResult<()> {
        let id = self.validate_page_id(page_id)?;
        if src.len() != PAGE_SIZE {
            return Err(DbError::InvalidArgument(format!(
                "write buffer must be {PAGE_SIZE} bytes, got {}",
                src.len()
            )));
        }
        let base = id * PAGE_SIZE as u64;
        self.file.write_all_at(src, base)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Fsyncs data and metadata, then drops the file handle.
    pub fn close(self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
