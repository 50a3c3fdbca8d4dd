//! # Directory Page
//!
//! Page 0 of the database file is a singleton directory mapping index names
//! to their root page ids. The tree engine reads its root from here on open
//! and writes back through [`HeaderNodeMut`] every time the root changes.
//!
//! ## Record Layout
//!
//! The page reuses the common header (`page_type = Header`, `size` = record
//! count) followed by a packed array of fixed-width records:
//!
//! ```text
//! Record (36 bytes):
//! +---------------------------+---------------------+
//! | name ([u8; 32], 0-padded) | root_page_id (i32)  |
//! +---------------------------+---------------------+
//! ```
//!
//! Records are appended in arrival order and looked up linearly; the
//! directory holds at most [`HEADER_MAX_RECORDS`] indexes. An index whose
//! tree becomes empty keeps its record with `root_page_id` set to the
//! invalid sentinel.

use eyre::{ensure, Result};
use zerocopy::little_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::page::{PageHeader, PageType};
use super::pool::BufferPool;
use crate::config::{PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::types::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};

pub const HEADER_NAME_LEN: usize = 32;
pub const HEADER_RECORD_SIZE: usize = 36;
pub const HEADER_CONTENT_START: usize = PAGE_HEADER_SIZE;
pub const HEADER_MAX_RECORDS: usize = (PAGE_SIZE - HEADER_CONTENT_START) / HEADER_RECORD_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct HeaderRecord {
    name: [u8; HEADER_NAME_LEN],
    root_page_id: I32,
}

const _: () = assert!(std::mem::size_of::<HeaderRecord>() == HEADER_RECORD_SIZE);

fn encode_name(name: &str) -> Result<[u8; HEADER_NAME_LEN]> {
    ensure!(
        name.len() <= HEADER_NAME_LEN,
        "index name '{}' exceeds {} bytes",
        name,
        HEADER_NAME_LEN
    );
    ensure!(!name.is_empty(), "index name must not be empty");

    let mut encoded = [0u8; HEADER_NAME_LEN];
    encoded[..name.len()].copy_from_slice(name.as_bytes());
    Ok(encoded)
}

#[derive(Debug)]
pub struct HeaderNode<'a> {
    data: &'a [u8],
}

pub struct HeaderNodeMut<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderNode<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = PageHeader::from_bytes(data)?;
        ensure!(
            header.page_type() == PageType::Header,
            "expected Header page, got {:?}",
            header.page_type()
        );
        ensure!(
            header.page_id() == HEADER_PAGE_ID,
            "directory page claims id {}, expected {}",
            header.page_id(),
            HEADER_PAGE_ID
        );
        Ok(Self { data })
    }

    pub fn record_count(&self) -> usize {
        let header = PageHeader::from_bytes(self.data).unwrap(); // INVARIANT: validated in from_page
        header.size() as usize
    }

    fn record_at(&self, index: usize) -> Result<&HeaderRecord> {
        ensure!(
            index < self.record_count(),
            "record index {} out of bounds (count={})",
            index,
            self.record_count()
        );
        let offset = HEADER_CONTENT_START + index * HEADER_RECORD_SIZE;
        HeaderRecord::ref_from_bytes(&self.data[offset..offset + HEADER_RECORD_SIZE])
            .map_err(|e| eyre::eyre!("failed to read directory record {}: {:?}", index, e))
    }

    pub fn get_record(&self, name: &str) -> Result<Option<PageId>> {
        let encoded = encode_name(name)?;
        for i in 0..self.record_count() {
            let record = self.record_at(i)?;
            if record.name == encoded {
                return Ok(Some(record.root_page_id.get()));
            }
        }
        Ok(None)
    }
}

impl<'a> HeaderNodeMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        HeaderNode::from_page(data)?;
        Ok(Self { data })
    }

    pub fn init(data: &'a mut [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = PageHeader::from_bytes_mut(data)?;
        header.init(
            PageType::Header,
            HEADER_PAGE_ID,
            INVALID_PAGE_ID,
            HEADER_MAX_RECORDS as u32,
        );
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> HeaderNode<'_> {
        HeaderNode { data: self.data }
    }

    pub fn record_count(&self) -> usize {
        self.as_ref().record_count()
    }

    pub fn get_record(&self, name: &str) -> Result<Option<PageId>> {
        self.as_ref().get_record(name)
    }

    fn find(&self, encoded: &[u8; HEADER_NAME_LEN]) -> Result<Option<usize>> {
        let view = self.as_ref();
        for i in 0..view.record_count() {
            if view.record_at(i)?.name == *encoded {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn write_record(&mut self, index: usize, record: HeaderRecord) {
        let offset = HEADER_CONTENT_START + index * HEADER_RECORD_SIZE;
        self.data[offset..offset + HEADER_RECORD_SIZE].copy_from_slice(record.as_bytes());
    }

    /// Registers a new index. Returns false if the name is already taken.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<bool> {
        let encoded = encode_name(name)?;
        if self.find(&encoded)?.is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        ensure!(
            count < HEADER_MAX_RECORDS,
            "directory page is full ({} records)",
            count
        );

        self.write_record(
            count,
            HeaderRecord {
                name: encoded,
                root_page_id: I32::new(root_page_id),
            },
        );
        let header = PageHeader::from_bytes_mut(self.data).unwrap(); // INVARIANT: validated in from_page/init
        header.set_size(count as u32 + 1);
        Ok(true)
    }

    /// Rewrites the root of an existing index. Returns false if the name is
    /// not registered.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> Result<bool> {
        let encoded = encode_name(name)?;
        let Some(index) = self.find(&encoded)? else {
            return Ok(false);
        };
        self.write_record(
            index,
            HeaderRecord {
                name: encoded,
                root_page_id: I32::new(root_page_id),
            },
        );
        Ok(true)
    }
}

/// Makes sure the directory page exists and is well formed. On a fresh file
/// this allocates page 0 and initializes it; on an existing file it only
/// validates.
pub fn ensure_header_page(pool: &BufferPool) -> Result<()> {
    if pool.allocated_page_count() == 0 {
        let mut guard = pool.new_page()?;
        ensure!(
            guard.page_id() == HEADER_PAGE_ID,
            "directory page must be the first allocation, got page {}",
            guard.page_id()
        );
        HeaderNodeMut::init(guard.data_mut())?;
        return Ok(());
    }

    let guard = pool.fetch_page(HEADER_PAGE_ID)?;
    HeaderNode::from_page(guard.data())?;
    Ok(())
}
