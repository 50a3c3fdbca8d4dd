//! # oakdb: disk-backed B+tree index engine
//!
//! oakdb implements the ordered index core of a database storage engine: a
//! page-oriented B+tree with unique fixed-width keys, record-id values,
//! node splits and merges, and forward range scans over a linked leaf
//! chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      BTree (insert/get/remove)       │
//! ├───────────────────┬─────────────────┤
//! │  Leaf / Interior  │  TreeIterator   │
//! │   page views      │  (leaf chain)   │
//! ├───────────────────┴─────────────────┤
//! │   BufferPool (pin/unpin, eviction)   │
//! ├─────────────────────────────────────┤
//! │   DiskManager (4 KiB page file)      │
//! └─────────────────────────────────────┘
//! ```
//!
//! Pages are fixed 4096-byte frames addressed by page id. The buffer pool
//! pins frames for the duration of an access and writes dirty frames back
//! on eviction or flush. Page 0 is a directory mapping index names to root
//! page ids, so several indexes can share one file.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use oakdb::{encode_i64_key, ensure_header_page, BTree, BufferPool, DiskManager,
//!             Int64Comparator, Rid};
//!
//! let disk = DiskManager::create("orders.idx")?;
//! let pool = Arc::new(BufferPool::new(64, disk)?);
//! ensure_header_page(&pool)?;
//!
//! let mut index = BTree::new("orders_pk", Arc::clone(&pool), Int64Comparator)?;
//! index.insert(&encode_i64_key(42), Rid::new(7, 0))?;
//! assert!(index.get_value(&encode_i64_key(42))?.is_some());
//!
//! for entry in index.iter()? {
//!     let (key, rid) = entry?;
//!     // keys arrive in comparator order
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: disk manager, buffer pool, common page header, directory
//!   page
//! - [`btree`]: leaf and interior page layouts, the tree engine, the
//!   range-scan iterator
//! - [`types`]: page ids, record ids, keys, comparators
//! - [`config`]: page geometry constants
//!
//! Mutating tree operations take `&mut self`; the buffer pool is internally
//! synchronized and can be shared between indexes.

pub mod btree;
pub mod config;
pub mod storage;
pub mod types;

pub use btree::{BTree, TreeIterator};
pub use config::{KEY_SIZE, PAGE_SIZE};
pub use storage::{ensure_header_page, BufferPool, DiskManager, PageRef};
pub use types::{
    decode_i64_key, encode_i64_key, BytewiseComparator, IndexKey, Int64Comparator, KeyComparator,
    PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
