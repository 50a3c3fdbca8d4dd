//! Single-file page store.
//!
//! The disk manager owns the database file and hands out page-sized reads
//! and writes addressed by page id, plus the page-id allocator. Reads past
//! the end of the file return zeroed frames so a newly allocated page can be
//! fetched before it was ever flushed. Deallocated ids go on a free list and
//! are reused by later allocations; the free list is in-memory only, so ids
//! freed in a previous process run stay unused (the pages leak on disk
//! rather than risk double allocation).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use eyre::{ensure, Result};
use parking_lot::Mutex;

use crate::config::PAGE_SIZE;
use crate::types::PageId;

struct DiskState {
    file: File,
    next_page_id: PageId,
    free_pages: Vec<PageId>,
}

pub struct DiskManager {
    state: Mutex<DiskState>,
}

impl DiskManager {
    /// Creates a fresh database file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        Ok(Self {
            state: Mutex::new(DiskState {
                file,
                next_page_id: 0,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Opens an existing database file. The allocator resumes after the last
    /// page the file contains.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        ensure!(
            len % PAGE_SIZE as u64 == 0,
            "database file length {} is not a multiple of the page size",
            len
        );

        Ok(Self {
            state: Mutex::new(DiskState {
                file,
                next_page_id: (len / PAGE_SIZE as u64) as PageId,
                free_pages: Vec::new(),
            }),
        })
    }

    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        ensure!(buf.len() == PAGE_SIZE, "read buffer is not page sized");
        ensure!(page_id >= 0, "cannot read page id {}", page_id);

        let mut state = self.state.lock();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        state.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = state.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        ensure!(data.len() == PAGE_SIZE, "write buffer is not page sized");
        ensure!(page_id >= 0, "cannot write page id {}", page_id);

        let mut state = self.state.lock();
        let offset = page_id as u64 * PAGE_SIZE as u64;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }

    /// Hands out the lowest free page id, growing the file address space
    /// when the free list is empty.
    pub fn allocate_page(&self) -> PageId {
        let mut state = self.state.lock();
        if let Some(page_id) = state.free_pages.pop() {
            return page_id;
        }
        let page_id = state.next_page_id;
        state.next_page_id += 1;
        page_id
    }

    pub fn deallocate_page(&self, page_id: PageId) {
        let mut state = self.state.lock();
        debug_assert!(page_id >= 0 && page_id < state.next_page_id);
        state.free_pages.push(page_id);
    }

    /// Number of page ids handed out so far, including freed ones.
    pub fn allocated_page_count(&self) -> u32 {
        self.state.lock().next_page_id as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::create(dir.path().join("test.db")).unwrap();

        let page = [0xCDu8; PAGE_SIZE];
        disk.write_page(3, &page).unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(3, &mut buf).unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn read_past_eof_returns_zeroes() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::create(dir.path().join("test.db")).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        disk.read_page(10, &mut buf).unwrap();
        assert_eq!(buf, [0u8; PAGE_SIZE]);
    }

    #[test]
    fn allocator_reuses_freed_ids() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::create(dir.path().join("test.db")).unwrap();

        assert_eq!(disk.allocate_page(), 0);
        assert_eq!(disk.allocate_page(), 1);
        assert_eq!(disk.allocate_page(), 2);

        disk.deallocate_page(1);
        assert_eq!(disk.allocate_page(), 1);
        assert_eq!(disk.allocate_page(), 3);
    }

    #[test]
    fn open_resumes_allocation_after_existing_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let disk = DiskManager::create(&path).unwrap();
            disk.allocate_page();
            disk.allocate_page();
            disk.write_page(1, &[7u8; PAGE_SIZE]).unwrap();
            disk.sync().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.allocated_page_count(), 2);
        assert_eq!(disk.allocate_page(), 2);

        let mut buf = [0u8; PAGE_SIZE];
        disk.read_page(1, &mut buf).unwrap();
        assert_eq!(buf, [7u8; PAGE_SIZE]);
    }
}
