//! Buffer pool manager: caches a bounded number of disk pages in memory
//! behind a pin/unpin discipline, backed by an LRU replacer.
//!
//! The buffer pool sits between the storage layer and higher-level table
//! code, providing:
//! - A fixed-size array of frames, each holding at most one page.
//! - Pin/unpin reference counting so in-use pages are never evicted.
//! - LRU victim selection among unpinned frames when the pool is full.
//! - Dirty-page writeback to the disk manager on eviction and flush.
//!
//! # Example
//! ```no_run
//! use buffer::BufferPoolManager;
//! use storage::DiskManager;
//!
//! let disk = DiskManager::open("db.data").unwrap();
//! let pool = BufferPoolManager::new(disk, 64);
//! let (page_id, handle) = pool.new_page().unwrap();
//! handle.write().unwrap().data[0] = 7;
//! pool.unpin_page(page_id, true);
//! ```


use common::{DbError, DbResult, PageId};
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use storage::{DiskManager, Page};

/// A shared, lockable view of one frame's 4096-byte buffer. Cloning is
/// cheap; every clone refers to the same underlying page.
pub type FrameHandle = Arc<RwLock<Page>>;

/// In-memory slot that can hold one page. No I/O, no locking of its own;
/// the buffer pool manager is the sole writer of its metadata fields.
struct Frame {
    page_id: Option<PageId>,
    dirty: bool,
    pin_count: u32,
    buffer: FrameHandle,
}

impl Frame {
    fn new() -> Self {
        Self {
            page_id: None,
            dirty: false,
            pin_count: 0,
            buffer: Arc::new(RwLock::new(Page::new())),
        }
    }

    fn pin(&mut self) {
        self.pin_count += 1;
    }

    fn unpin(&mut self) {
        self.pin_count = self.pin_count.saturating_sub(1);
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.dirty = false;
        self.pin_count = 0;
        *self.buffer.write().unwrap() = Page::new();
    }

    fn handle(&self) -> FrameHandle {
        Arc::clone(&self.buffer)
    }
}

struct LruState {
    order: VecDeque<usize>,
    member: hashbrown::HashSet<usize>,
}

/// Ordered set of unpinned frame indices; the least-recently-unpinned frame
/// is the next eviction victim. Carries its own mutex so it can be driven
/// independently of the buffer pool's bookkeeping lock.
struct LruReplacer {
    state: Mutex<LruState>,
}

impl LruReplacer {
    fn new() -> Self {
        Self {
            state: Mutex::new(LruState {
                order: VecDeque::new(),
                member: hashbrown::HashSet::new(),
            }),
        }
    }

    /// Insert or move the frame to the most-recent position. Idempotent:
    /// repeated calls for the same frame do not change `size()`.
    fn unpin(&self, frame_id: usize) {
        let mut state = self.state.lock().unwrap();
        if state.member.remove(&frame_id) {
            state.order.retain(|&f| f != frame_id);
        }
        state.member.insert(frame_id);
        state.order.push_back(frame_id);
    }

    /// Remove the frame if present; a no-op otherwise. Used both when a
    /// frame gets pinned and when a page is explicitly deleted.
    fn remove(&self, frame_id: usize) {
        let mut state = self.state.lock().unwrap();
        if state.member.remove(&frame_id) {
            state.order.retain(|&f| f != frame_id);
        }
    }

    fn victim(&self) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        let frame_id = state.order.pop_front()?;
        state.member.remove(&frame_id);
        Some(frame_id)
    }

    fn size(&self) -> usize {
        self.state.lock().unwrap().member.len()
    }
}

struct Inner {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    free_list: VecDeque<usize>,
}

/// Owns the frame array, the page-id→frame map, the free list, and the
/// replacer; mediates all page access with pin semantics and dirty
/// writeback. A single coarse mutex (`inner`) protects every public
/// operation, including the disk I/O performed on a cache miss.
pub struct BufferPoolManager {
    disk: DiskManager,
    pool_size: usize,
    replacer: LruReplacer,
    inner: Mutex<Inner>,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, pool_size: usize) -> Self {
        assert!(pool_size > 0, "buffer pool must hold at least one frame");
        let frames = (0..pool_size).map(|_| Frame::new()).collect();
        Self {
            disk,
            pool_size,
            replacer: LruReplacer::new(),
            inner: Mutex::new(Inner {
                frames,
                page_table: HashMap::new(),
                free_list: (0..pool_size).collect(),
            }),
        }
    }

    /// Poll the free list, then fall back to the replacer. Flushes the
    /// victim's occupant if dirty and evicts it from the page table.
    fn acquire_victim(&self, inner: &mut Inner) -> DbResult<usize> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }
        let frame_id = self.replacer.victim().ok_or(DbError::AllFramesPinned)?;
        let frame = &inner.frames[frame_id];
        if let Some(old_page_id) = frame.page_id {
            log::trace!("evicting frame {frame_id} (page {})", old_page_id.0);
            if frame.dirty {
                let buf = frame.buffer.read().unwrap();
                self.disk.write_page(old_page_id, &buf.data)?;
            }
            inner.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    /// Fetch a page into the pool, pinning it. On a hit the frame is
    /// removed from the replacer; on a miss a victim is acquired and the
    /// page is read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> DbResult<FrameHandle> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            self.replacer.remove(frame_id);
            inner.frames[frame_id].pin();
            return Ok(inner.frames[frame_id].handle());
        }

        let frame_id = self.acquire_victim(&mut inner)?;
        {
            let mut buf = inner.frames[frame_id].buffer.write().unwrap();
            self.disk.read_page(page_id, &mut buf.data)?;
        }
        let frame = &mut inner.frames[frame_id];
        frame.page_id = Some(page_id);
        frame.dirty = false;
        frame.pin_count = 1;
        inner.page_table.insert(page_id, frame_id);
        Ok(inner.frames[frame_id].handle())
    }

    /// Allocate a brand-new page on disk and pin it into a frame. If no
    /// victim is available, the page id allocated from disk is never
    /// exposed to the caller; the file has grown by one unused page.
    pub fn new_page(&self) -> DbResult<(PageId, FrameHandle)> {
        let page_id = self.disk.allocate_page()?;
        let mut inner = self.inner.lock().unwrap();
        let frame_id = self.acquire_victim(&mut inner)?;
        {
            let mut buf = inner.frames[frame_id].buffer.write().unwrap();
            *buf = Page::new();
        }
        let frame = &mut inner.frames[frame_id];
        frame.page_id = Some(page_id);
        frame.dirty = false;
        frame.pin_count = 1;
        inner.page_table.insert(page_id, frame_id);
        Ok((page_id, inner.frames[frame_id].handle()))
    }

    /// Release one pin on `page_id`, OR-ing in `is_dirty`. When the pin
    /// count reaches zero the frame becomes eligible for eviction.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            log::warn!("unpin_page: page {} is not resident in the buffer pool", page_id.0);
            return;
        };
        let frame = &mut inner.frames[frame_id];
        frame.dirty |= is_dirty;
        if frame.pin_count == 0 {
            log::warn!("unpin_page: page {} unpinned past a zero pin count", page_id.0);
            return;
        }
        frame.unpin();
        if frame.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
    }

    /// Write a cached page to disk and clear its dirty flag. Returns
    /// whether the page was present in the pool.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let buffer = inner.frames[frame_id].handle();
        let data = buffer.read().unwrap();
        self.disk.write_page(page_id, &data.data)?;
        drop(data);
        inner.frames[frame_id].dirty = false;
        Ok(true)
    }

    /// Flush every currently-cached page.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock().unwrap();
            inner.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Remove a page from the cache if its pin count is zero, resetting
    /// the frame and returning it to the free list. On-disk space is not
    /// reclaimed. A page that is not resident is trivially "deleted".
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };
        if inner.frames[frame_id].pin_count > 0 {
            return false;
        }
        self.replacer.remove(frame_id);
        inner.page_table.remove(&page_id);
        inner.frames[frame_id].reset();
        inner.free_list.push_back(frame_id);
        true
    }

    /// A human-readable snapshot: pool size, used/free frames, dirty and
    /// pinned page counts, and the number of frames currently evictable.
    pub fn get_stats(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let used = inner.page_table.len();
        let free = inner.free_list.len();
        let dirty = inner.frames.iter().filter(|f| f.dirty).count();
        let pinned = inner.frames.iter().filter(|f| f.pin_count > 0).count();
        let evictable = self.replacer.size();
        format!(
            "pool_size={} used={used} free={free} dirty={dirty} pinned={pinned} evictable={evictable}",
            self.pool_size
        )
    }

    /// Flush everything, then reset the pool to its freshly-constructed
    /// state.
    pub fn close(&self) -> DbResult<()> {
        self.flush_all_pages()?;
        let mut inner = self.inner.lock().unwrap();
        for frame_id in 0..self.pool_size {
            self.replacer.remove(frame_id);
            inner.frames[frame_id].reset();
        }
        inner.page_table.clear();
        inner.free_list = (0..self.pool_size).collect();
        Ok(())
    }
}
