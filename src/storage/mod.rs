//! # Storage Module
//!
//! The storage layer supplies the index with page frames. It is split into
//! four pieces, lowest first:
//!
//! - `disk`: a single database file read and written in page-sized units,
//!   plus the page-id allocator with its free list
//! - `page`: the 20-byte common header every index page starts with
//! - `pool`: the buffer pool, pinned in-memory frames over the disk file
//!   with second-chance eviction and RAII page guards
//! - `header`: the singleton directory page mapping index names to root
//!   page ids
//!
//! The tree engine never touches the disk manager directly; every page goes
//! through the pool so that pin accounting and dirty tracking stay in one
//! place. Page-to-page references are page ids, never pointers: a frame
//! address is only ever held through a pinned [`PageRef`], and nothing
//! caches it across an unpin.

mod disk;
mod header;
mod page;
mod pool;

pub use disk::DiskManager;
pub use header::{
    ensure_header_page, HeaderNode, HeaderNodeMut, HeaderRecord, HEADER_MAX_RECORDS,
    HEADER_NAME_LEN, HEADER_RECORD_SIZE,
};
pub use page::{validate_page, PageHeader, PageType};
pub use pool::{BufferPool, PageRef};
