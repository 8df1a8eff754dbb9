//! Table heap: a per-table chain of slotted pages with positional CRUD and
//! forward iteration.
//!
//! The heap routes inserts to its tail page, allocates a new tail on
//! overflow, and never re-scans earlier pages for space freed by deletion;
//! space reclamation within the file is out of scope.

#[cfg(test)]
mod tests;

use std::cell::Cell;
use std::sync::Arc;

use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RecordId};
use storage::{Record, SlottedPage};

/// Owns the page chain of one table. Not thread-safe: callers must
/// externally serialize mutating operations on the same heap.
pub struct TableHeap {
    pool: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Cell<PageId>,
}

impl TableHeap {
    /// Allocates a fresh heap: one page, `first = last`.
    pub fn create(pool: Arc<BufferPoolManager>) -> DbResult<Self> {
        let (page_id, handle) = pool.new_page()?;
        {
            let mut guard = handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.init(page_id, None);
        }
        pool.unpin_page(page_id, true);
        Ok(Self {
            pool,
            first_page_id: page_id,
            last_page_id: Cell::new(page_id),
        })
    }

    /// Reopens a heap from its persistent handle, walking the `next` chain
    /// to rediscover `last_page_id`. Cost is O(pages in the table).
    pub fn open(pool: Arc<BufferPoolManager>, first_page_id: PageId) -> DbResult<Self> {
        let mut current = first_page_id;
        loop {
            let handle = pool.fetch_page(current)?;
            let next = {
                let mut guard = handle.write().unwrap();
                let page = SlottedPage::new(&mut guard.data);
                page.next_page_id()
            };
            pool.unpin_page(current, false);
            match next {
                Some(next_id) => current = next_id,
                None => break,
            }
        }
        Ok(Self {
            pool,
            first_page_id,
            last_page_id: Cell::new(current),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Inserts `bytes` at the tail, allocating a new tail page on overflow.
    /// Earlier pages are never re-scanned for space freed by deletion.
    pub fn insert(&self, bytes: &[u8]) -> DbResult<RecordId> {
        let last = self.last_page_id.get();
        let handle = self.pool.fetch_page(last)?;

        let slot = {
            let mut guard = handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.insert_tuple(bytes)
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(err) => {
                self.pool.unpin_page(last, false);
                return Err(err);
            }
        };
        if slot >= 0 {
            self.pool.unpin_page(last, true);
            return Ok(RecordId::new(last, slot));
        }

        // Tail page is full: allocate a new one and link it in before
        // releasing the old tail.
        let (new_id, new_handle) = match self.pool.new_page() {
            Ok(pair) => pair,
            Err(err) => {
                self.pool.unpin_page(last, false);
                return Err(err);
            }
        };
        {
            let mut guard = new_handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.init(new_id, Some(last));
        }
        {
            let mut guard = handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.set_next_page_id(Some(new_id));
        }
        self.pool.unpin_page(last, true);

        let new_slot = {
            let mut guard = new_handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.insert_tuple(bytes)?
        };
        debug_assert!(new_slot >= 0, "record already passed the per-page size check");
        self.pool.unpin_page(new_id, true);

        self.last_page_id.set(new_id);
        Ok(RecordId::new(new_id, new_slot))
    }

    /// Fetches the page, delegates to `get_tuple`, unpins clean. A
    /// buffer-pool failure is logged and treated as "not found" rather than
    /// propagated.
    pub fn get(&self, rid: RecordId) -> Option<Record> {
        let handle = match self.pool.fetch_page(rid.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("get({rid:?}): fetch_page failed: {err}");
                return None;
            }
        };
        let record = {
            let mut guard = handle.write().unwrap();
            let page = SlottedPage::new(&mut guard.data);
            page.get_tuple(rid.slot_id)
        };
        self.pool.unpin_page(rid.page_id, false);
        record
    }

    /// Tombstones the record at `rid`. The slot id is retired permanently.
    pub fn mark_deleted(&self, rid: RecordId) -> bool {
        let handle = match self.pool.fetch_page(rid.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("mark_deleted({rid:?}): fetch_page failed: {err}");
                return false;
            }
        };
        let deleted = {
            let mut guard = handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.mark_deleted(rid.slot_id)
        };
        self.pool.unpin_page(rid.page_id, deleted);
        deleted
    }

    /// Overwrites the record at `rid` in place. Fails if `new_bytes` is
    /// larger than the original; a larger update is the caller's problem
    /// (delete + insert).
    pub fn update(&self, rid: RecordId, new_bytes: &[u8]) -> bool {
        let handle = match self.pool.fetch_page(rid.page_id) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("update({rid:?}): fetch_page failed: {err}");
                return false;
            }
        };
        let updated = {
            let mut guard = handle.write().unwrap();
            let mut page = SlottedPage::new(&mut guard.data);
            page.update_tuple(new_bytes, rid.slot_id)
        };
        self.pool.unpin_page(rid.page_id, updated);
        updated
    }

    /// A forward iterator over live records, ordered by `(page_id, slot_id)`.
    pub fn iterator(&self) -> TableHeapIter<'_> {
        TableHeapIter::new(self)
    }
}

/// Forward iterator over a table heap's live records. Buffers the next
/// record so `has_next` is cheap and `next` never does I/O.
///
/// Concurrent mutation of the heap during iteration yields unspecified
/// results.
pub struct TableHeapIter<'a> {
    heap: &'a TableHeap,
    current_page_id: Option<PageId>,
    current_slot_id: i32,
    buffered: Option<Record>,
}

impl<'a> TableHeapIter<'a> {
    fn new(heap: &'a TableHeap) -> Self {
        let mut iter = Self {
            heap,
            current_page_id: Some(heap.first_page_id),
            current_slot_id: 0,
            buffered: None,
        };
        iter.buffered = iter.advance();
        iter
    }

    /// Walks forward from `(current_page_id, current_slot_id)` to the next
    /// live tuple, or `None` once the chain is exhausted.
    fn advance(&mut self) -> Option<Record> {
        while let Some(page_id) = self.current_page_id {
            let handle = match self.heap.pool.fetch_page(page_id) {
                Ok(handle) => handle,
                Err(err) => {
                    log::warn!("iterator: fetch_page({page_id:?}) failed: {err}");
                    self.current_page_id = None;
                    return None;
                }
            };

            let (found, next_page_id) = {
                let mut guard = handle.write().unwrap();
                let page = SlottedPage::new(&mut guard.data);
                let tuple_count = page.tuple_count();
                let mut found = None;
                while self.current_slot_id < tuple_count {
                    let slot = self.current_slot_id;
                    self.current_slot_id += 1;
                    if let Some(record) = page.get_tuple(slot) {
                        found = Some(record);
                        break;
                    }
                }
                (found, page.next_page_id())
            };
            self.heap.pool.unpin_page(page_id, false);

            if let Some(record) = found {
                return Some(record);
            }
            self.current_page_id = next_page_id;
            self.current_slot_id = 0;
        }
        None
    }

    pub fn has_next(&self) -> bool {
        self.buffered.is_some()
    }

    /// Returns the buffered record and pre-fetches the following one.
    /// Fails with `NoSuchElement` when the iterator is exhausted.
    pub fn next(&mut self) -> DbResult<Record> {
        let record = self.buffered.take().ok_or(DbError::NoSuchElement)?;
        self.buffered = self.advance();
        Ok(record)
    }
}
