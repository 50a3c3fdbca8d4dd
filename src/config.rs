//! # Configuration Constants
//!
//! This module centralizes the layout constants the rest of the crate derives
//! its page geometry from. Constants that depend on each other are co-located
//! and tied together with compile-time assertions so a change to one cannot
//! silently invalidate another.
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (20 bytes, common to every index page)
//!       │
//!       └─> per-page-type slot capacities, derived in btree::leaf and
//!           btree::interior from the remaining frame space
//!
//! KEY_SIZE (8 bytes)
//!       │
//!       └─> slot sizes: leaf slot = KEY_SIZE + 8 (rid),
//!           interior slot = KEY_SIZE + 4 (child page id)
//! ```
//!
//! `DEFAULT_POOL_CAPACITY` bounds how many frames the buffer pool holds in
//! memory at once. A single tree operation pins at most a handful of pages
//! plus one guard pair per tree level, so even deep trees stay far below
//! this default.

/// Size of every on-disk page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of the common header at the start of every index page.
pub const PAGE_HEADER_SIZE: usize = 20;

/// Width of every index key in bytes. Keys are opaque byte sequences of this
/// fixed width; ordering is supplied by the injected comparator.
pub const KEY_SIZE: usize = 8;

/// Default number of in-memory frames in the buffer pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

const _: () = assert!(PAGE_SIZE % 512 == 0, "PAGE_SIZE must be sector aligned");
const _: () = assert!(PAGE_HEADER_SIZE < PAGE_SIZE);
const _: () = assert!(KEY_SIZE > 0);
