//! # Common Page Header
//!
//! Every index page begins with the same 20-byte header, regardless of what
//! the rest of the frame holds. The header makes a page self-describing: the
//! engine can fetch an arbitrary page id and decide from the tag whether it
//! is looking at a leaf, an interior node, or the directory page.
//!
//! ## Header Layout (20 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field           Description
//! ------  ----  --------------  -----------------------------------------
//! 0       4     page_type       Leaf / Interior / Header / Invalid
//! 4       4     size            Number of occupied slots
//! 8       4     max_size        Slot capacity enforced by the tree
//! 12      4     page_id         Self identifier
//! 16      4     parent_page_id  Parent page, INVALID_PAGE_ID for the root
//! ```
//!
//! The remainder of the frame is a packed slot array whose element layout is
//! specific to the page type (see `btree::leaf`, `btree::interior`, and
//! `storage::header`).
//!
//! `PageHeader` uses `zerocopy` for safe transmutation, so headers are read
//! and written in place in the frame with no intermediate copies.

use eyre::{ensure, Result};
use zerocopy::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::types::{PageId, INVALID_PAGE_ID};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid = 0,
    Interior = 1,
    Leaf = 2,
    Header = 3,
}

impl PageType {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => PageType::Interior,
            2 => PageType::Leaf,
            3 => PageType::Header,
            _ => PageType::Invalid,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: U32,
    size: U32,
    max_size: U32,
    page_id: I32,
    parent_page_id: I32,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    /// Stamps a freshly allocated frame with a zeroed slot array.
    pub fn init(&mut self, page_type: PageType, page_id: PageId, parent_page_id: PageId, max_size: u32) {
        self.page_type = U32::new(page_type as u32);
        self.size = U32::new(0);
        self.max_size = U32::new(max_size);
        self.page_id = I32::new(page_id);
        self.parent_page_id = I32::new(parent_page_id);
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_u32(self.page_type.get())
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn set_size(&mut self, size: u32) {
        self.size = U32::new(size);
    }

    pub fn max_size(&self) -> u32 {
        self.max_size.get()
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.get()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.parent_page_id.get()
    }

    pub fn set_parent_page_id(&mut self, parent: PageId) {
        self.parent_page_id = I32::new(parent);
    }

    pub fn is_leaf(&self) -> bool {
        self.page_type() == PageType::Leaf
    }

    pub fn is_root(&self) -> bool {
        self.parent_page_id.get() == INVALID_PAGE_ID
    }
}

/// Structural sanity check applied when a page is handed to a typed view.
/// A page that fails here is corrupt and the error is fatal to the caller.
pub fn validate_page(data: &[u8]) -> Result<()> {
    ensure!(
        data.len() == PAGE_SIZE,
        "invalid page size: {} != {}",
        data.len(),
        PAGE_SIZE
    );

    let header = PageHeader::from_bytes(data)?;

    if header.page_type() == PageType::Invalid {
        // All-zero frames are legal: a freshly allocated page looks like
        // this until its owner initializes it.
        return Ok(());
    }

    ensure!(
        header.size() <= header.max_size(),
        "page {} holds {} slots but max_size is {}",
        header.page_id(),
        header.size(),
        header.max_size()
    );

    Ok(())
}
