//! # Buffer Pool
//!
//! The buffer pool is the only way the index touches pages. It keeps a fixed
//! set of pre-allocated frames in memory, maps page ids onto frames through a
//! page table, and evicts unpinned frames with a second-chance sweep when a
//! new page has to come in.
//!
//! ## Pin/Unpin Protocol
//!
//! Pages must be pinned before access to prevent eviction:
//!
//! 1. `fetch_page` / `new_page` return a pinned [`PageRef`]
//! 2. The caller reads or writes the frame through the guard
//! 3. Dropping the guard unpins the page exactly once, carrying the dirty
//!    flag accumulated through `data_mut`
//! 4. Frames with a positive pin count are never evicted or deleted
//!
//! A mutated page therefore always reaches `unpin_page` with `dirty = true`
//! and is written back before its frame is reused.
//!
//! ## Eviction
//!
//! Frames carry a `visited` bit set on every access. The sweep hand clears
//! the bit on first encounter and evicts on second, so pages touched once by
//! a scan leave the pool quickly while hot pages survive. Pinned frames are
//! skipped outright. When every frame is pinned the pool is exhausted and
//! the allocation fails; callers unwind and their guards release the pins.
//!
//! ## Thread Safety
//!
//! The pool itself is `Send + Sync`: all bookkeeping sits behind a single
//! `parking_lot::Mutex`, which is plenty for a single-writer index. The
//! guards are deliberately neither `Send` nor `Sync`; a guard's frame slice
//! is only valid on the thread that pinned it.

use std::collections::HashMap;
use std::ptr::NonNull;

use eyre::{bail, ensure, Result};
use parking_lot::Mutex;

use super::disk::DiskManager;
use crate::config::PAGE_SIZE;
use crate::types::{PageId, INVALID_PAGE_ID};

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: PageId,
    pin_count: u32,
    dirty: bool,
    visited: bool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
            visited: false,
        }
    }
}

struct PoolState {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, usize>,
    free_list: Vec<usize>,
    hand: usize,
}

pub struct BufferPool {
    state: Mutex<PoolState>,
    disk: DiskManager,
}

impl BufferPool {
    pub fn new(capacity: usize, disk: DiskManager) -> Result<Self> {
        ensure!(capacity > 0, "buffer pool needs at least one frame");

        let frames: Vec<Frame> = (0..capacity).map(|_| Frame::new()).collect();
        let free_list = (0..capacity).rev().collect();

        Ok(Self {
            state: Mutex::new(PoolState {
                frames,
                page_table: HashMap::with_capacity(capacity),
                free_list,
                hand: 0,
            }),
            disk,
        })
    }

    /// Allocates a fresh page id and pins a zeroed frame for it.
    pub fn new_page(&self) -> Result<PageRef<'_>> {
        let mut state = self.state.lock();
        let idx = self.take_frame(&mut state)?;
        let page_id = self.disk.allocate_page();

        let frame = &mut state.frames[idx];
        frame.data.fill(0);
        frame.page_id = page_id;
        frame.pin_count = 1;
        // A new page must hit the disk even if the caller never writes it,
        // otherwise a later fetch could resurrect stale file contents.
        frame.dirty = true;
        frame.visited = true;
        let data = NonNull::from(&mut *frame.data).cast::<u8>();

        state.page_table.insert(page_id, idx);

        Ok(PageRef {
            pool: self,
            page_id,
            data,
            dirty: true,
        })
    }

    /// Pins an existing page, reading it from disk on a pool miss.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageRef<'_>> {
        ensure!(page_id >= 0, "cannot fetch page id {}", page_id);

        let mut state = self.state.lock();
        if let Some(&idx) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[idx];
            frame.pin_count += 1;
            frame.visited = true;
            let data = NonNull::from(&mut *frame.data).cast::<u8>();
            return Ok(PageRef {
                pool: self,
                page_id,
                data,
                dirty: false,
            });
        }

        let idx = self.take_frame(&mut state)?;
        if let Err(e) = self.disk.read_page(page_id, state.frames[idx].data.as_mut_slice()) {
            // Hand the frame back so a failed read does not shrink the pool.
            state.free_list.push(idx);
            return Err(e);
        }
        let frame = &mut state.frames[idx];
        frame.page_id = page_id;
        frame.pin_count = 1;
        frame.dirty = false;
        frame.visited = true;
        let data = NonNull::from(&mut *frame.data).cast::<u8>();

        state.page_table.insert(page_id, idx);

        Ok(PageRef {
            pool: self,
            page_id,
            data,
            dirty: false,
        })
    }

    /// Drops one pin. Returns false if the page is not resident or was not
    /// pinned; the latter is a caller bug and trips the debug assertion.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&idx) = state.page_table.get(&page_id) else {
            return false;
        };

        let frame = &mut state.frames[idx];
        debug_assert!(frame.pin_count > 0, "unpin of page {page_id} with zero pin count");
        if frame.pin_count == 0 {
            return false;
        }
        frame.pin_count -= 1;
        if dirty {
            frame.dirty = true;
        }
        true
    }

    /// Removes a page from the pool and returns its id to the allocator.
    /// The page must be fully unpinned first.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(&idx) = state.page_table.get(&page_id) {
            let frame = &mut state.frames[idx];
            ensure!(
                frame.pin_count == 0,
                "cannot delete page {} with {} outstanding pins",
                page_id,
                frame.pin_count
            );
            frame.page_id = INVALID_PAGE_ID;
            frame.dirty = false;
            frame.visited = false;
            state.page_table.remove(&page_id);
            state.free_list.push(idx);
        }
        self.disk.deallocate_page(page_id);
        Ok(())
    }

    /// Writes one resident page back to disk, clearing its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(&idx) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &mut state.frames[idx];
        self.disk.write_page(page_id, frame.data.as_slice())?;
        frame.dirty = false;
        Ok(true)
    }

    /// Writes every dirty resident page back to disk. Returns how many pages
    /// were written.
    pub fn flush_all(&self) -> Result<usize> {
        let mut state = self.state.lock();
        let mut flushed = 0;
        for frame in state.frames.iter_mut() {
            if frame.page_id != INVALID_PAGE_ID && frame.dirty {
                self.disk.write_page(frame.page_id, frame.data.as_slice())?;
                frame.dirty = false;
                flushed += 1;
            }
        }
        drop(state);
        self.disk.sync()?;
        Ok(flushed)
    }

    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&idx| state.frames[idx].pin_count)
    }

    /// Number of frames with at least one outstanding pin.
    pub fn pinned_page_count(&self) -> usize {
        let state = self.state.lock();
        state.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    pub fn allocated_page_count(&self) -> u32 {
        self.disk.allocated_page_count()
    }

    fn take_frame(&self, state: &mut PoolState) -> Result<usize> {
        if let Some(idx) = state.free_list.pop() {
            return Ok(idx);
        }

        // Second-chance sweep: one round to clear visited bits, one round to
        // evict. If two full rounds find nothing, every frame is pinned.
        let capacity = state.frames.len();
        for _ in 0..2 * capacity {
            let idx = state.hand;
            state.hand = (state.hand + 1) % capacity;

            let frame = &mut state.frames[idx];
            if frame.pin_count > 0 {
                continue;
            }
            if frame.visited {
                frame.visited = false;
                continue;
            }

            let (page_id, dirty) = (frame.page_id, frame.dirty);
            if dirty {
                self.disk.write_page(page_id, frame.data.as_slice())?;
                state.frames[idx].dirty = false;
            }
            state.page_table.remove(&page_id);
            state.frames[idx].page_id = INVALID_PAGE_ID;
            return Ok(idx);
        }

        bail!("buffer pool exhausted: all {} frames are pinned", capacity)
    }
}

/// Pinned handle to one page frame.
///
/// Holding a `PageRef` keeps the frame resident; dropping it unpins the page
/// exactly once, passing along whether the frame was mutated. The guard is
/// the unit of the engine's resource discipline: every code path that
/// fetches a page either holds the guard to the end of the operation or
/// hands it to a callee, and the pin is released on every exit path
/// including unwinding.
pub struct PageRef<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    data: NonNull<u8>,
    dirty: bool,
}

impl std::fmt::Debug for PageRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRef")
            .field("page_id", &self.page_id)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl PageRef<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        // SAFETY: `data` points at the boxed frame buffer, which is valid
        // for PAGE_SIZE bytes and never moves. The frame cannot be evicted
        // or deleted while this guard holds a pin, so the pointer stays
        // live for the guard's lifetime. Mutation goes through `data_mut`,
        // which requires `&mut self`, so shared reads never alias a write
        // from the same guard.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), PAGE_SIZE) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        // SAFETY: same pointer validity argument as `data`. Exclusivity:
        // `&mut self` prevents aliasing through this guard, and the engine
        // never materializes two guards for the same page with overlapping
        // borrows (descents unpin the parent after pinning the child, and
        // re-parenting touches only pages no other live guard refers to).
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), PAGE_SIZE) }
    }

    /// Forces the dirty flag without handing out a mutable slice.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageRef<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}
