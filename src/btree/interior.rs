//! # Interior Pages
//!
//! Interior pages route lookups: each slot pairs a separator key with a
//! child page id. Slot 0 is special: only its child pointer is meaningful,
//! its key bytes are an unused sentinel that routing never reads.
//!
//! ## Page Layout
//!
//! ```text
//! +-----------------------------+
//! | PageHeader (20 bytes)       |  common header, page_type = Interior
//! +-----------------------------+
//! | InteriorSlot[0] (12 bytes)  |  child only; keys < key[1] go here
//! | InteriorSlot[1]             |  key[1] <= keys < key[2] -> child[1]
//! | ...                         |
//! | InteriorSlot[n-1]           |  keys >= key[n-1] -> child[n-1]
//! +-----------------------------+
//! ```
//!
//! `size` counts all occupied slots including slot 0, so a routing page
//! always has `size >= 2`. The separator invariant: every key reachable
//! through `child[i]` is `>= key[i]` and `< key[i+1]`.
//!
//! The derived capacity keeps one slot of headroom below the physical
//! maximum: the engine inserts the overflowing entry first and splits the
//! page afterwards, so a page configured with `max_size = m` must be able
//! to hold `m + 1` slots for the duration of the split.
//!
//! The four move operations re-parent every transferred child by fetching
//! it through the buffer pool and rewriting its `parent_page_id` before the
//! move returns. This is the one place the engine touches pages it did not
//! traverse into.

use std::cmp::Ordering;

use eyre::{ensure, Result};
use zerocopy::little_endian::I32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{KEY_SIZE, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::storage::{BufferPool, PageHeader, PageType};
use crate::types::{IndexKey, KeyComparator, PageId};

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct InteriorSlot {
    pub key: IndexKey,
    pub child: I32,
}

pub const INTERIOR_SLOT_SIZE: usize = std::mem::size_of::<InteriorSlot>();
pub const INTERIOR_CONTENT_START: usize = PAGE_HEADER_SIZE;
pub const INTERIOR_MAX_SLOTS: usize = (PAGE_SIZE - INTERIOR_CONTENT_START) / INTERIOR_SLOT_SIZE;

const _: () = assert!(INTERIOR_SLOT_SIZE == KEY_SIZE + 4);

fn slot_offset(index: usize) -> usize {
    INTERIOR_CONTENT_START + index * INTERIOR_SLOT_SIZE
}

#[derive(Debug)]
pub struct InteriorNode<'a> {
    data: &'a [u8],
}

pub struct InteriorNodeMut<'a> {
    data: &'a mut [u8],
}

impl<'a> InteriorNode<'a> {
    pub fn from_page(data: &'a [u8]) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        let header = PageHeader::from_bytes(data)?;
        ensure!(
            header.page_type() == PageType::Interior,
            "expected Interior page, got {:?}",
            header.page_type()
        );
        Ok(Self { data })
    }

    fn header(&self) -> &PageHeader {
        // INVARIANT: length and type validated in the constructor.
        PageHeader::from_bytes(self.data).unwrap()
    }

    pub fn size(&self) -> u32 {
        self.header().size()
    }

    pub fn max_size(&self) -> u32 {
        self.header().max_size()
    }

    pub fn page_id(&self) -> PageId {
        self.header().page_id()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.header().parent_page_id()
    }

    fn slot(&self, index: usize) -> &InteriorSlot {
        let offset = slot_offset(index);
        // INVARIANT: callers stay below `size`, which fits the frame.
        InteriorSlot::ref_from_bytes(&self.data[offset..offset + INTERIOR_SLOT_SIZE]).unwrap()
    }

    /// Separator key at `index`. Slot 0 has no key.
    pub fn key_at(&self, index: usize) -> Result<&IndexKey> {
        ensure!(
            index >= 1 && index < self.size() as usize,
            "separator index {} out of bounds (size={})",
            index,
            self.size()
        );
        Ok(&self.slot(index).key)
    }

    /// Child page id at `index`.
    pub fn value_at(&self, index: usize) -> Result<PageId> {
        ensure!(
            index < self.size() as usize,
            "child index {} out of bounds (size={})",
            index,
            self.size()
        );
        Ok(self.slot(index).child.get())
    }

    /// Position of `child` among this page's children.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size() as usize).find(|&i| self.slot(i).child.get() == child)
    }

    /// Routes `key` to a child: the largest `i >= 1` with `key[i] <= key`
    /// wins; if there is none the leftmost child does.
    pub fn lookup<C: KeyComparator>(&self, key: &IndexKey, cmp: &C) -> Result<PageId> {
        let size = self.size() as usize;
        ensure!(
            size >= 2,
            "interior page {} has no routing entries (size={})",
            self.page_id(),
            size
        );

        let (mut lo, mut hi) = (1usize, size);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.compare(&self.slot(mid).key, key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        // `lo` is the first separator greater than `key`.
        Ok(self.slot(lo - 1).child.get())
    }
}

impl<'a> InteriorNodeMut<'a> {
    pub fn from_page(data: &'a mut [u8]) -> Result<Self> {
        InteriorNode::from_page(data)?;
        Ok(Self { data })
    }

    pub fn init(
        data: &'a mut [u8],
        page_id: PageId,
        parent_page_id: PageId,
        max_size: u32,
    ) -> Result<Self> {
        ensure!(
            data.len() == PAGE_SIZE,
            "invalid page size: {} != {}",
            data.len(),
            PAGE_SIZE
        );
        ensure!(
            max_size >= 3 && (max_size as usize) < INTERIOR_MAX_SLOTS,
            "interior max_size {} out of range 3..{}",
            max_size,
            INTERIOR_MAX_SLOTS
        );

        let header = PageHeader::from_bytes_mut(data)?;
        header.init(PageType::Interior, page_id, parent_page_id, max_size);
        Ok(Self { data })
    }

    pub fn as_ref(&self) -> InteriorNode<'_> {
        InteriorNode { data: self.data }
    }

    fn header_mut(&mut self) -> &mut PageHeader {
        // INVARIANT: length and type validated in from_page/init.
        PageHeader::from_bytes_mut(self.data).unwrap()
    }

    fn set_size(&mut self, size: u32) {
        self.header_mut().set_size(size);
    }

    pub fn size(&self) -> u32 {
        self.as_ref().size()
    }

    pub fn max_size(&self) -> u32 {
        self.as_ref().max_size()
    }

    pub fn page_id(&self) -> PageId {
        self.as_ref().page_id()
    }

    pub fn parent_page_id(&self) -> PageId {
        self.as_ref().parent_page_id()
    }

    pub fn key_at(&self, index: usize) -> Result<IndexKey> {
        self.as_ref().key_at(index).map(|k| *k)
    }

    pub fn value_at(&self, index: usize) -> Result<PageId> {
        self.as_ref().value_at(index)
    }

    pub fn value_index(&self, child: PageId) -> Option<usize> {
        self.as_ref().value_index(child)
    }

    fn write_slot(&mut self, index: usize, slot: InteriorSlot) {
        let offset = slot_offset(index);
        self.data[offset..offset + INTERIOR_SLOT_SIZE].copy_from_slice(slot.as_bytes());
    }

    pub fn set_key_at(&mut self, index: usize, key: &IndexKey) -> Result<()> {
        ensure!(
            index >= 1 && index < self.size() as usize,
            "separator index {} out of bounds (size={})",
            index,
            self.size()
        );
        let offset = slot_offset(index);
        self.data[offset..offset + KEY_SIZE].copy_from_slice(key);
        Ok(())
    }

    /// Turns a freshly initialized page into the root produced by a split:
    /// `child[0] = left`, `(key[1], child[1]) = (key, right)`.
    pub fn populate_new_root(&mut self, left_child: PageId, key: &IndexKey, right_child: PageId) {
        self.write_slot(
            0,
            InteriorSlot {
                key: [0u8; KEY_SIZE],
                child: I32::new(left_child),
            },
        );
        self.write_slot(
            1,
            InteriorSlot {
                key: *key,
                child: I32::new(right_child),
            },
        );
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` immediately after the slot holding
    /// `old_child`. Returns the slot count after the call; a result above
    /// `max_size` tells the engine to split this page.
    pub fn insert_node_after(
        &mut self,
        old_child: PageId,
        key: &IndexKey,
        new_child: PageId,
    ) -> Result<u32> {
        let size = self.size() as usize;
        let index = self.value_index(old_child).ok_or_else(|| {
            eyre::eyre!(
                "page {} is not a child of interior page {}",
                old_child,
                self.page_id()
            )
        })?;
        ensure!(
            size < INTERIOR_MAX_SLOTS,
            "interior page {} has no slot headroom left",
            self.page_id()
        );

        self.data
            .copy_within(slot_offset(index + 1)..slot_offset(size), slot_offset(index + 2));
        self.write_slot(
            index + 1,
            InteriorSlot {
                key: *key,
                child: I32::new(new_child),
            },
        );
        self.set_size(size as u32 + 1);
        Ok(size as u32 + 1)
    }

    /// Removes the slot at `index`, shifting the suffix left.
    pub fn remove(&mut self, index: usize) -> Result<()> {
        let size = self.size() as usize;
        ensure!(
            index < size,
            "slot index {} out of bounds (size={})",
            index,
            size
        );
        self.data
            .copy_within(slot_offset(index + 1)..slot_offset(size), slot_offset(index));
        self.set_size(size as u32 - 1);
        Ok(())
    }

    /// Collapses a root that routes to a single child: empties the page and
    /// returns that child so the caller can promote it.
    pub fn remove_and_return_only_child(&mut self) -> Result<PageId> {
        ensure!(
            self.size() == 1,
            "interior page {} still has {} children",
            self.page_id(),
            self.size()
        );
        let child = self.value_at(0)?;
        self.set_size(0);
        Ok(child)
    }

    fn reparent_children(&self, from: usize, to: usize, pool: &BufferPool) -> Result<()> {
        let new_parent = self.page_id();
        for i in from..to {
            let child_id = self.value_at(i)?;
            let mut guard = pool.fetch_page(child_id)?;
            PageHeader::from_bytes_mut(guard.data_mut())?.set_parent_page_id(new_parent);
        }
        Ok(())
    }

    /// Splits this page: the upper half of the slots moves to the empty
    /// `recipient` and the moved children are re-parented. The key of the
    /// first moved slot, which becomes the recipient's sentinel slot 0,
    /// is returned as the separator to push into the parent.
    pub fn move_half_to(
        &mut self,
        recipient: &mut InteriorNodeMut<'_>,
        pool: &BufferPool,
    ) -> Result<IndexKey> {
        ensure!(
            recipient.size() == 0,
            "split recipient page {} is not empty",
            recipient.page_id()
        );
        let size = self.size() as usize;
        ensure!(
            size >= 3,
            "cannot split interior page {} with {} slots",
            self.page_id(),
            size
        );

        let keep = size.div_ceil(2);
        let moved = size - keep;
        let separator = self.key_at(keep)?;

        recipient.data[slot_offset(0)..slot_offset(moved)]
            .copy_from_slice(&self.data[slot_offset(keep)..slot_offset(size)]);
        recipient.set_size(moved as u32);
        self.set_size(keep as u32);

        recipient.reparent_children(0, moved, pool)?;
        Ok(separator)
    }

    /// Appends every slot of this page to `recipient` (its left sibling).
    /// `middle_key` is the parent separator that sat between the two pages;
    /// it becomes the key guarding this page's former slot 0. The caller
    /// removes the parent entry and deletes the emptied page.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InteriorNodeMut<'_>,
        middle_key: &IndexKey,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size() as usize;
        let rsize = recipient.size() as usize;
        ensure!(
            (rsize + size) as u32 <= recipient.max_size(),
            "merging interior {} into {} would overflow ({} + {} slots)",
            self.page_id(),
            recipient.page_id(),
            size,
            rsize
        );

        recipient.data[slot_offset(rsize)..slot_offset(rsize + size)]
            .copy_from_slice(&self.data[slot_offset(0)..slot_offset(size)]);
        let offset = slot_offset(rsize);
        recipient.data[offset..offset + KEY_SIZE].copy_from_slice(middle_key);
        recipient.set_size((rsize + size) as u32);

        recipient.reparent_children(rsize, rsize + size, pool)?;
        self.set_size(0);
        Ok(())
    }

    /// Redistribution step: this page's first child moves to the end of its
    /// left sibling, keyed by the old parent separator `middle_key`. Returns
    /// the new separator (this page's former `key[1]`) for the caller to
    /// store in the parent.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InteriorNodeMut<'_>,
        middle_key: &IndexKey,
        pool: &BufferPool,
    ) -> Result<IndexKey> {
        let size = self.size() as usize;
        ensure!(
            size >= 2,
            "interior page {} is too small to lend a slot",
            self.page_id()
        );
        let rsize = recipient.size() as usize;
        ensure!(
            (rsize as u32) < recipient.max_size(),
            "interior page {} is full",
            recipient.page_id()
        );

        let moved_child = self.value_at(0)?;
        let new_separator = self.key_at(1)?;

        recipient.write_slot(
            rsize,
            InteriorSlot {
                key: *middle_key,
                child: I32::new(moved_child),
            },
        );
        recipient.set_size(rsize as u32 + 1);

        self.data
            .copy_within(slot_offset(1)..slot_offset(size), slot_offset(0));
        self.set_size(size as u32 - 1);

        let mut guard = pool.fetch_page(moved_child)?;
        PageHeader::from_bytes_mut(guard.data_mut())?.set_parent_page_id(recipient.page_id());

        Ok(new_separator)
    }

    /// Redistribution step: this page's last child moves to the front of
    /// its right sibling. The sibling's former slot 0 shifts to slot 1 and
    /// takes the old parent separator `middle_key` as its key. Returns the
    /// new separator (this page's former last key) for the caller to store
    /// in the parent.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InteriorNodeMut<'_>,
        middle_key: &IndexKey,
        pool: &BufferPool,
    ) -> Result<IndexKey> {
        let size = self.size() as usize;
        ensure!(
            size >= 2,
            "interior page {} is too small to lend a slot",
            self.page_id()
        );
        let rsize = recipient.size() as usize;
        ensure!(
            (rsize as u32) < recipient.max_size(),
            "interior page {} is full",
            recipient.page_id()
        );

        let moved_child = self.value_at(size - 1)?;
        let new_separator = self.key_at(size - 1)?;

        recipient
            .data
            .copy_within(slot_offset(0)..slot_offset(rsize), slot_offset(1));
        recipient.write_slot(
            0,
            InteriorSlot {
                key: [0u8; KEY_SIZE],
                child: I32::new(moved_child),
            },
        );
        let offset = slot_offset(1);
        recipient.data[offset..offset + KEY_SIZE].copy_from_slice(middle_key);
        recipient.set_size(rsize as u32 + 1);
        self.set_size(size as u32 - 1);

        let mut guard = pool.fetch_page(moved_child)?;
        PageHeader::from_bytes_mut(guard.data_mut())?.set_parent_page_id(recipient.page_id());

        Ok(new_separator)
    }
}
