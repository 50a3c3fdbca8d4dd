//! # B+Tree Engine
//!
//! This module implements the tree operations over the typed page views:
//! lookup, insertion with splits propagating to the root, deletion with
//! sibling redistribution or coalescing and root collapse, plus the
//! integrity checker the tests lean on.
//!
//! ## Structure
//!
//! All data lives in leaf pages; interior pages only route. Leaves form a
//! forward chain for range scans and every leaf sits at the same depth.
//! The tree itself is a small handle (name, comparator, configured max
//! sizes, the cached root page id); everything else is pages reached
//! through the buffer pool. The root id is also persisted in the directory
//! page under the index name, and rewritten there every time it changes.
//!
//! ## Insert
//!
//! ```text
//! 1. Empty tree: allocate a leaf root, insert, publish the root id
//! 2. Descend to the target leaf (child pinned before parent unpinned)
//! 3. Duplicate key: return false, nothing changes
//! 4. Insert into the leaf; below max_size we are done
//! 5. At max_size: allocate a sibling leaf, move the upper half over,
//!    push the sibling's first key into the parent
//! 6. A parent pushed past max_size splits the same way, recursively;
//!    a split root is replaced by a fresh root with two children
//! ```
//!
//! ## Remove
//!
//! ```text
//! 1. Descend to the leaf; absent keys are a no-op
//! 2. Remove the slot; a root leaf may empty out, turning the tree empty
//! 3. A non-root page below max_size / 2 picks its left sibling
//!    (the leftmost child picks its right one) and either
//!    - redistributes one entry when both pages together exceed max_size,
//!      fixing the parent separator in place, or
//!    - coalesces right-into-left, deletes the emptied page and removes
//!      the parent entry, which may cascade upward
//! 4. An interior root left with a single child is replaced by that child
//! ```
//!
//! Pin discipline: every page is held through a [`PageRef`] guard, so each
//! fetch is paired with exactly one unpin on every exit path, and a page is
//! deleted only after its guard is dropped. Mutating operations take
//! `&mut self`; callers serialize writers externally.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result};

use super::interior::{InteriorNode, InteriorNodeMut, INTERIOR_MAX_SLOTS};
use super::iter::TreeIterator;
use super::leaf::{LeafNode, LeafNodeMut, LEAF_MAX_SLOTS};
use crate::config::KEY_SIZE;
use crate::storage::{BufferPool, HeaderNode, HeaderNodeMut, PageHeader, PageRef, PageType};
use crate::types::{
    encode_i64_key, IndexKey, KeyComparator, PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
};

/// Default page capacities: one below the physical slot count, keeping the
/// headroom slot an insert-then-split needs.
pub const LEAF_DEFAULT_MAX_SIZE: u32 = (LEAF_MAX_SLOTS - 1) as u32;
pub const INTERIOR_DEFAULT_MAX_SIZE: u32 = (INTERIOR_MAX_SLOTS - 1) as u32;

pub struct BTree<C: KeyComparator> {
    name: String,
    pool: Arc<BufferPool>,
    comparator: C,
    root_page_id: PageId,
    leaf_max_size: u32,
    interior_max_size: u32,
    header_record_exists: bool,
}

impl<C: KeyComparator> BTree<C> {
    /// Opens (or prepares to create) the index named `name`, reading its
    /// root from the directory page if it was registered before.
    pub fn new(name: impl Into<String>, pool: Arc<BufferPool>, comparator: C) -> Result<Self> {
        Self::with_max_sizes(
            name,
            pool,
            comparator,
            LEAF_DEFAULT_MAX_SIZE,
            INTERIOR_DEFAULT_MAX_SIZE,
        )
    }

    /// Like [`BTree::new`] with explicit page capacities. Small capacities
    /// keep trees shallow enough to inspect, which the scenario tests use.
    pub fn with_max_sizes(
        name: impl Into<String>,
        pool: Arc<BufferPool>,
        comparator: C,
        leaf_max_size: u32,
        interior_max_size: u32,
    ) -> Result<Self> {
        let name = name.into();
        ensure!(
            leaf_max_size >= 2 && (leaf_max_size as usize) < LEAF_MAX_SLOTS,
            "leaf max_size {} out of range 2..{}",
            leaf_max_size,
            LEAF_MAX_SLOTS
        );
        ensure!(
            interior_max_size >= 3 && (interior_max_size as usize) < INTERIOR_MAX_SLOTS,
            "interior max_size {} out of range 3..{}",
            interior_max_size,
            INTERIOR_MAX_SLOTS
        );

        let (root_page_id, header_record_exists) = {
            let guard = pool.fetch_page(HEADER_PAGE_ID)?;
            let directory = HeaderNode::from_page(guard.data())?;
            match directory.get_record(&name)? {
                Some(root) => (root, true),
                None => (INVALID_PAGE_ID, false),
            }
        };

        Ok(Self {
            name,
            pool,
            comparator,
            root_page_id,
            leaf_max_size,
            interior_max_size,
            header_record_exists,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Point query: the rid stored under `key`, if any.
    pub fn get_value(&self, key: &IndexKey) -> Result<Option<Rid>> {
        let Some(guard) = self.find_leaf(self.pool(), key, false)? else {
            return Ok(None);
        };
        let leaf = LeafNode::from_page(guard.data())?;
        Ok(leaf.lookup(key, &self.comparator))
    }

    /// Inserts `(key, rid)`. Returns false if the key is already present;
    /// the stored value is left unchanged in that case.
    pub fn insert(&mut self, key: &IndexKey, rid: Rid) -> Result<bool> {
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let pool = Arc::clone(&self.pool);
        let mut leaf_guard = self
            .find_leaf(&pool, key, false)?
            .ok_or_else(|| eyre::eyre!("descent from root page {} found no leaf", self.root_page_id))?;

        {
            let leaf = LeafNode::from_page(leaf_guard.data())?;
            if leaf.lookup(key, &self.comparator).is_some() {
                return Ok(false);
            }
        }

        let (new_size, leaf_max) = {
            let mut leaf = LeafNodeMut::from_page(leaf_guard.data_mut())?;
            (leaf.insert(key, rid, &self.comparator)?, leaf.max_size())
        };
        if new_size < leaf_max {
            return Ok(true);
        }

        // The leaf reached max_size: split it and push the separator up.
        let mut sibling_guard = pool.new_page()?;
        let separator = {
            let sibling_id = sibling_guard.page_id();
            let mut leaf = LeafNodeMut::from_page(leaf_guard.data_mut())?;
            let parent_id = leaf.parent_page_id();
            let mut sibling =
                LeafNodeMut::init(sibling_guard.data_mut(), sibling_id, parent_id, self.leaf_max_size)?;
            leaf.move_half_to(&mut sibling)?
        };
        self.insert_into_parent(&mut leaf_guard, separator, &mut sibling_guard)?;
        Ok(true)
    }

    /// Removes `key` if present; absent keys are a no-op.
    pub fn remove(&mut self, key: &IndexKey) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let pool = Arc::clone(&self.pool);
        let mut leaf_guard = self
            .find_leaf(&pool, key, false)?
            .ok_or_else(|| eyre::eyre!("descent from root page {} found no leaf", self.root_page_id))?;

        {
            let leaf = LeafNode::from_page(leaf_guard.data())?;
            if leaf.lookup(key, &self.comparator).is_none() {
                return Ok(());
            }
        }

        let (new_size, is_root, min_size) = {
            let mut leaf = LeafNodeMut::from_page(leaf_guard.data_mut())?;
            let new_size = leaf.remove(key, &self.comparator);
            (
                new_size,
                leaf.parent_page_id() == INVALID_PAGE_ID,
                leaf.max_size() / 2,
            )
        };

        if is_root {
            if new_size == 0 {
                // Last key of the whole tree: transition to the empty state.
                let root_id = leaf_guard.page_id();
                drop(leaf_guard);
                self.root_page_id = INVALID_PAGE_ID;
                self.update_root_page_id(false)?;
                pool.delete_page(root_id)?;
            }
            return Ok(());
        }

        if new_size < min_size {
            self.coalesce_or_redistribute(leaf_guard)?;
        }
        Ok(())
    }

    /// Forward scan over the whole tree, starting at the smallest key.
    pub fn iter(&self) -> Result<TreeIterator<'_, C>> {
        let leaf = self.find_leaf(self.pool(), &[0u8; KEY_SIZE], true)?;
        Ok(TreeIterator::new(self, leaf, 0))
    }

    /// Forward scan starting at the first key `>= key`.
    pub fn iter_from(&self, key: &IndexKey) -> Result<TreeIterator<'_, C>> {
        let Some(guard) = self.find_leaf(self.pool(), key, false)? else {
            return Ok(TreeIterator::new(self, None, 0));
        };
        let index = LeafNode::from_page(guard.data())?.key_index(key, &self.comparator);
        Ok(TreeIterator::new(self, Some(guard), index))
    }

    /// Bulk ingestion for tests and tooling: one 64-bit integer key per
    /// line, the rid synthesized from the key. Returns how many keys were
    /// newly inserted.
    pub fn insert_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file = File::open(path.as_ref())?;
        let mut inserted = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let key: i64 = text.parse()?;
            if self.insert(&encode_i64_key(key), rid_for_key(key))? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Counterpart of [`BTree::insert_from_file`]: removes one key per
    /// line. Returns how many lines were processed.
    pub fn remove_from_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let file = File::open(path.as_ref())?;
        let mut processed = 0;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let key: i64 = text.parse()?;
            self.remove(&encode_i64_key(key))?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Descends from the root to the leaf responsible for `key` (or the
    /// leftmost leaf). Each child is pinned before its parent is unpinned,
    /// and only the leaf pin survives the call.
    fn find_leaf<'p>(
        &self,
        pool: &'p BufferPool,
        key: &IndexKey,
        left_most: bool,
    ) -> Result<Option<PageRef<'p>>> {
        if self.root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = pool.fetch_page(self.root_page_id)?;
        loop {
            let child = {
                let header = PageHeader::from_bytes(guard.data())?;
                match header.page_type() {
                    PageType::Leaf => break,
                    PageType::Interior => {
                        let interior = InteriorNode::from_page(guard.data())?;
                        if left_most {
                            interior.value_at(0)?
                        } else {
                            interior.lookup(key, &self.comparator)?
                        }
                    }
                    other => bail!(
                        "unexpected page type {:?} during descent at page {}",
                        other,
                        header.page_id()
                    ),
                }
            };
            guard = pool.fetch_page(child)?;
        }
        Ok(Some(guard))
    }

    /// Builds the first leaf of an empty tree and publishes the root id.
    fn start_new_tree(&mut self, key: &IndexKey, rid: Rid) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let mut root_guard = pool.new_page()?;
        let root_id = root_guard.page_id();
        {
            let mut leaf =
                LeafNodeMut::init(root_guard.data_mut(), root_id, INVALID_PAGE_ID, self.leaf_max_size)?;
            leaf.insert(key, rid, &self.comparator)?;
        }
        self.root_page_id = root_id;
        let insert_record = !self.header_record_exists;
        self.update_root_page_id(insert_record)
    }

    /// Hooks a freshly split-off page into the tree: `key` separates `old`
    /// from `new`. Splitting the root grows the tree by one level; an
    /// overflowing parent splits recursively.
    fn insert_into_parent(
        &mut self,
        old: &mut PageRef<'_>,
        key: IndexKey,
        new: &mut PageRef<'_>,
    ) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let (old_id, parent_id) = {
            let header = PageHeader::from_bytes(old.data())?;
            (header.page_id(), header.parent_page_id())
        };
        let new_id = PageHeader::from_bytes(new.data())?.page_id();

        if parent_id == INVALID_PAGE_ID {
            // `old` was the root: grow the tree by one level.
            let mut root_guard = pool.new_page()?;
            let root_id = root_guard.page_id();
            {
                let mut root = InteriorNodeMut::init(
                    root_guard.data_mut(),
                    root_id,
                    INVALID_PAGE_ID,
                    self.interior_max_size,
                )?;
                root.populate_new_root(old_id, &key, new_id);
            }
            PageHeader::from_bytes_mut(old.data_mut())?.set_parent_page_id(root_id);
            PageHeader::from_bytes_mut(new.data_mut())?.set_parent_page_id(root_id);
            self.root_page_id = root_id;
            return self.update_root_page_id(false);
        }

        let mut parent_guard = pool.fetch_page(parent_id)?;
        let new_size = {
            let mut parent = InteriorNodeMut::from_page(parent_guard.data_mut())?;
            parent.insert_node_after(old_id, &key, new_id)?
        };
        if new_size <= self.interior_max_size {
            return Ok(());
        }

        // The parent overflowed its configured capacity: split it too.
        let mut split_guard = pool.new_page()?;
        let separator = {
            let split_id = split_guard.page_id();
            let mut parent = InteriorNodeMut::from_page(parent_guard.data_mut())?;
            let grandparent_id = parent.parent_page_id();
            let mut sibling = InteriorNodeMut::init(
                split_guard.data_mut(),
                split_id,
                grandparent_id,
                self.interior_max_size,
            )?;
            parent.move_half_to(&mut sibling, &pool)?
        };
        self.insert_into_parent(&mut parent_guard, separator, &mut split_guard)
    }

    /// Fixes an underflowing non-root page by borrowing from or merging
    /// with a sibling. Prefers the left sibling; the leftmost child uses
    /// its right one. May cascade up to the root.
    fn coalesce_or_redistribute(&mut self, mut node_guard: PageRef<'_>) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let (node_id, parent_id, node_is_leaf) = {
            let header = PageHeader::from_bytes(node_guard.data())?;
            (header.page_id(), header.parent_page_id(), header.is_leaf())
        };
        ensure!(
            parent_id != INVALID_PAGE_ID,
            "page {} underflowed but has no parent",
            node_id
        );

        let mut parent_guard = pool.fetch_page(parent_id)?;
        let (node_index, sibling_index, sibling_is_left, sibling_id) = {
            let parent = InteriorNode::from_page(parent_guard.data())?;
            let node_index = parent.value_index(node_id).ok_or_else(|| {
                eyre::eyre!("page {} is not a child of its parent {}", node_id, parent_id)
            })?;
            let (sibling_index, left) = if node_index == 0 {
                (1, false)
            } else {
                (node_index - 1, true)
            };
            (node_index, sibling_index, left, parent.value_at(sibling_index)?)
        };
        let mut sibling_guard = pool.fetch_page(sibling_id)?;

        let (node_size, max_size) = {
            let header = PageHeader::from_bytes(node_guard.data())?;
            (header.size(), header.max_size())
        };
        let sibling_size = PageHeader::from_bytes(sibling_guard.data())?.size();

        if node_size + sibling_size > max_size {
            return self.redistribute(
                &mut node_guard,
                &mut sibling_guard,
                &mut parent_guard,
                node_index,
                sibling_index,
                sibling_is_left,
                node_is_leaf,
            );
        }

        // Coalesce: always merge the right page into the left one.
        let (mut left_guard, mut right_guard, right_index) = if sibling_is_left {
            (sibling_guard, node_guard, node_index)
        } else {
            (node_guard, sibling_guard, sibling_index)
        };

        if node_is_leaf {
            let mut right = LeafNodeMut::from_page(right_guard.data_mut())?;
            let mut left = LeafNodeMut::from_page(left_guard.data_mut())?;
            right.move_all_to(&mut left)?;
        } else {
            let middle_key = *InteriorNode::from_page(parent_guard.data())?.key_at(right_index)?;
            let mut right = InteriorNodeMut::from_page(right_guard.data_mut())?;
            let mut left = InteriorNodeMut::from_page(left_guard.data_mut())?;
            right.move_all_to(&mut left, &middle_key, &pool)?;
        }

        {
            let mut parent = InteriorNodeMut::from_page(parent_guard.data_mut())?;
            parent.remove(right_index)?;
        }

        let right_id = right_guard.page_id();
        drop(right_guard);
        drop(left_guard);
        pool.delete_page(right_id)?;

        let (parent_is_root, parent_size, parent_min) = {
            let header = PageHeader::from_bytes(parent_guard.data())?;
            (header.is_root(), header.size(), header.max_size() / 2)
        };
        if parent_is_root {
            return self.adjust_root(parent_guard);
        }
        if parent_size < parent_min {
            return self.coalesce_or_redistribute(parent_guard);
        }
        Ok(())
    }

    /// Moves a single entry from the sibling into the underflowing node
    /// and refreshes the parent separator on the boundary between them.
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &mut self,
        node_guard: &mut PageRef<'_>,
        sibling_guard: &mut PageRef<'_>,
        parent_guard: &mut PageRef<'_>,
        node_index: usize,
        sibling_index: usize,
        sibling_is_left: bool,
        node_is_leaf: bool,
    ) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        if node_is_leaf {
            let mut node = LeafNodeMut::from_page(node_guard.data_mut())?;
            let mut sibling = LeafNodeMut::from_page(sibling_guard.data_mut())?;
            let mut parent = InteriorNodeMut::from_page(parent_guard.data_mut())?;
            if sibling_is_left {
                sibling.move_last_to_front_of(&mut node)?;
                let boundary = node.as_ref().first_key()?;
                parent.set_key_at(node_index, &boundary)?;
            } else {
                sibling.move_first_to_end_of(&mut node)?;
                let boundary = sibling.as_ref().first_key()?;
                parent.set_key_at(sibling_index, &boundary)?;
            }
        } else {
            let mut node = InteriorNodeMut::from_page(node_guard.data_mut())?;
            let mut sibling = InteriorNodeMut::from_page(sibling_guard.data_mut())?;
            let mut parent = InteriorNodeMut::from_page(parent_guard.data_mut())?;
            if sibling_is_left {
                let middle_key = parent.key_at(node_index)?;
                let new_separator = sibling.move_last_to_front_of(&mut node, &middle_key, &pool)?;
                parent.set_key_at(node_index, &new_separator)?;
            } else {
                let middle_key = parent.key_at(sibling_index)?;
                let new_separator = sibling.move_first_to_end_of(&mut node, &middle_key, &pool)?;
                parent.set_key_at(sibling_index, &new_separator)?;
            }
        }
        Ok(())
    }

    /// Shrinks the tree when deletion emptied the root: an interior root
    /// with one remaining child is replaced by that child, an empty leaf
    /// root turns the tree empty. Anything else is left alone.
    fn adjust_root(&mut self, mut old_root_guard: PageRef<'_>) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let (root_id, page_type, size) = {
            let header = PageHeader::from_bytes(old_root_guard.data())?;
            (header.page_id(), header.page_type(), header.size())
        };

        match page_type {
            PageType::Interior if size == 1 => {
                let child_id = {
                    let mut root = InteriorNodeMut::from_page(old_root_guard.data_mut())?;
                    root.remove_and_return_only_child()?
                };
                {
                    let mut child_guard = pool.fetch_page(child_id)?;
                    PageHeader::from_bytes_mut(child_guard.data_mut())?
                        .set_parent_page_id(INVALID_PAGE_ID);
                }
                drop(old_root_guard);
                self.root_page_id = child_id;
                self.update_root_page_id(false)?;
                pool.delete_page(root_id)?;
            }
            PageType::Leaf if size == 0 => {
                drop(old_root_guard);
                self.root_page_id = INVALID_PAGE_ID;
                self.update_root_page_id(false)?;
                pool.delete_page(root_id)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Publishes the current root id into the directory page: a new record
    /// when the index is registered for the first time, an update after.
    fn update_root_page_id(&mut self, insert_record: bool) -> Result<()> {
        let pool = Arc::clone(&self.pool);
        let mut guard = pool.fetch_page(HEADER_PAGE_ID)?;
        let mut directory = HeaderNodeMut::from_page(guard.data_mut())?;
        if insert_record {
            ensure!(
                directory.insert_record(&self.name, self.root_page_id)?,
                "index '{}' is already registered in the directory page",
                self.name
            );
            self.header_record_exists = true;
        } else {
            ensure!(
                directory.update_record(&self.name, self.root_page_id)?,
                "index '{}' is missing from the directory page",
                self.name
            );
        }
        Ok(())
    }

    /// Full-tree structural check: sorted unique keys, occupancy bounds,
    /// uniform leaf depth, parent pointers, and an ordered sibling chain
    /// covering exactly the keys the tree holds. Intended for tests; cost
    /// is a full traversal.
    pub fn verify_integrity(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut leaf_depth: Option<usize> = None;
        let mut key_count: usize = 0;
        self.check_subtree(
            self.root_page_id,
            INVALID_PAGE_ID,
            None,
            None,
            0,
            &mut leaf_depth,
            &mut key_count,
        )?;

        let mut current_id = {
            let guard = self
                .find_leaf(self.pool(), &[0u8; KEY_SIZE], true)?
                .ok_or_else(|| eyre::eyre!("non-empty tree has no leftmost leaf"))?;
            guard.page_id()
        };
        let mut chain_count = 0usize;
        let mut previous: Option<IndexKey> = None;
        loop {
            let guard = self.pool.fetch_page(current_id)?;
            let leaf = LeafNode::from_page(guard.data())?;
            for i in 0..leaf.size() as usize {
                let key = *leaf.key_at(i)?;
                if let Some(prev) = previous {
                    ensure!(
                        self.comparator.compare(&prev, &key) == Ordering::Less,
                        "sibling chain keys out of order at page {}",
                        current_id
                    );
                }
                previous = Some(key);
                chain_count += 1;
            }
            let next = leaf.next_page_id();
            drop(guard);
            if next == INVALID_PAGE_ID {
                break;
            }
            current_id = next;
        }
        ensure!(
            chain_count == key_count,
            "sibling chain sees {} keys but the tree holds {}",
            chain_count,
            key_count
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<IndexKey>,
        upper: Option<IndexKey>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        key_count: &mut usize,
    ) -> Result<()> {
        let guard = self.pool.fetch_page(page_id)?;
        let header = PageHeader::from_bytes(guard.data())?;
        ensure!(
            header.page_id() == page_id,
            "page {} claims id {}",
            page_id,
            header.page_id()
        );
        ensure!(
            header.parent_page_id() == expected_parent,
            "page {} stores parent {} but page {} points at it",
            page_id,
            header.parent_page_id(),
            expected_parent
        );
        let size = header.size();
        let max_size = header.max_size();
        ensure!(
            size <= max_size,
            "page {} holds {} slots above max_size {}",
            page_id,
            size,
            max_size
        );

        let is_root = expected_parent == INVALID_PAGE_ID;
        let in_bounds = |key: &IndexKey| -> Result<()> {
            if let Some(lo) = &lower {
                ensure!(
                    self.comparator.compare(key, lo) != Ordering::Less,
                    "key below subtree lower bound at page {}",
                    page_id
                );
            }
            if let Some(up) = &upper {
                ensure!(
                    self.comparator.compare(key, up) == Ordering::Less,
                    "key at or above subtree upper bound at page {}",
                    page_id
                );
            }
            Ok(())
        };

        match header.page_type() {
            PageType::Leaf => {
                if is_root {
                    ensure!(size >= 1, "root leaf {} is empty", page_id);
                } else {
                    ensure!(
                        size >= max_size / 2,
                        "leaf {} below minimum occupancy: {} < {}",
                        page_id,
                        size,
                        max_size / 2
                    );
                }
                match leaf_depth {
                    Some(d) => ensure!(
                        *d == depth,
                        "leaf {} at depth {} but earlier leaves at depth {}",
                        page_id,
                        depth,
                        d
                    ),
                    None => *leaf_depth = Some(depth),
                }

                let leaf = LeafNode::from_page(guard.data())?;
                for i in 0..size as usize {
                    let key = leaf.key_at(i)?;
                    if i > 0 {
                        ensure!(
                            self.comparator.compare(leaf.key_at(i - 1)?, key) == Ordering::Less,
                            "leaf {} slots out of order at index {}",
                            page_id,
                            i
                        );
                    }
                    in_bounds(key)?;
                }
                *key_count += size as usize;
            }
            PageType::Interior => {
                if is_root {
                    ensure!(size >= 2, "interior root {} routes {} children", page_id, size);
                } else {
                    ensure!(
                        size >= max_size / 2,
                        "interior {} below minimum occupancy: {} < {}",
                        page_id,
                        size,
                        max_size / 2
                    );
                }

                let interior = InteriorNode::from_page(guard.data())?;
                for i in 1..size as usize {
                    let key = interior.key_at(i)?;
                    if i > 1 {
                        ensure!(
                            self.comparator.compare(interior.key_at(i - 1)?, key) == Ordering::Less,
                            "interior {} separators out of order at index {}",
                            page_id,
                            i
                        );
                    }
                    in_bounds(key)?;
                }

                for i in 0..size as usize {
                    let child = interior.value_at(i)?;
                    let child_lower = if i == 0 {
                        lower
                    } else {
                        Some(*interior.key_at(i)?)
                    };
                    let child_upper = if i + 1 < size as usize {
                        Some(*interior.key_at(i + 1)?)
                    } else {
                        upper
                    };
                    self.check_subtree(
                        child,
                        page_id,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaf_depth,
                        key_count,
                    )?;
                }
            }
            other => bail!("unexpected page type {:?} at page {}", other, page_id),
        }
        Ok(())
    }
}

/// Synthesizes the rid the bulk-ingestion helpers store for an integer key.
fn rid_for_key(key: i64) -> Rid {
    Rid::new((key >> 32) as PageId, key as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ensure_header_page, DiskManager};
    use crate::types::{decode_i64_key, Int64Comparator};
    use tempfile::tempdir;

    fn test_tree(
        leaf_max: u32,
        interior_max: u32,
    ) -> (tempfile::TempDir, Arc<BufferPool>, BTree<Int64Comparator>) {
        let dir = tempdir().unwrap();
        let disk = DiskManager::create(dir.path().join("index.db")).unwrap();
        let pool = Arc::new(BufferPool::new(64, disk).unwrap());
        ensure_header_page(&pool).unwrap();
        let tree =
            BTree::with_max_sizes("test_index", Arc::clone(&pool), Int64Comparator, leaf_max, interior_max)
                .unwrap();
        (dir, pool, tree)
    }

    fn key(k: i64) -> IndexKey {
        encode_i64_key(k)
    }

    fn rid(k: i64) -> Rid {
        Rid::new(k as PageId, k as u32)
    }

    #[test]
    fn empty_tree_reports_empty() {
        let (_dir, _pool, tree) = test_tree(4, 4);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    }

    #[test]
    fn first_insert_creates_leaf_root() {
        let (_dir, pool, mut tree) = test_tree(4, 4);

        assert!(tree.insert(&key(10), rid(10)).unwrap());
        assert!(!tree.is_empty());
        assert_eq!(tree.get_value(&key(10)).unwrap(), Some(rid(10)));

        // The root id is published in the directory page.
        let guard = pool.fetch_page(HEADER_PAGE_ID).unwrap();
        let directory = HeaderNode::from_page(guard.data()).unwrap();
        assert_eq!(
            directory.get_record("test_index").unwrap(),
            Some(tree.root_page_id())
        );
    }

    #[test]
    fn duplicate_insert_returns_false_and_keeps_value() {
        let (_dir, _pool, mut tree) = test_tree(4, 4);

        assert!(tree.insert(&key(10), rid(10)).unwrap());
        assert!(!tree.insert(&key(10), rid(99)).unwrap());
        assert_eq!(tree.get_value(&key(10)).unwrap(), Some(rid(10)));
    }

    #[test]
    fn remove_of_missing_key_is_noop() {
        let (_dir, _pool, mut tree) = test_tree(4, 4);
        tree.insert(&key(1), rid(1)).unwrap();
        tree.remove(&key(2)).unwrap();
        assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
    }

    #[test]
    fn insert_until_split_keeps_all_keys() {
        let (_dir, _pool, mut tree) = test_tree(4, 4);

        for k in 1..=20 {
            assert!(tree.insert(&key(k), rid(k)).unwrap(), "insert {}", k);
            tree.verify_integrity().unwrap();
        }
        for k in 1..=20 {
            assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)), "lookup {}", k);
        }
    }

    #[test]
    fn reverse_insert_order_reaches_same_keys() {
        let (_dir, _pool, mut tree) = test_tree(4, 4);

        for k in (1..=20).rev() {
            tree.insert(&key(k), rid(k)).unwrap();
            tree.verify_integrity().unwrap();
        }
        let keys: Vec<i64> = tree
            .iter()
            .unwrap()
            .map(|entry| decode_i64_key(&entry.unwrap().0))
            .collect();
        assert_eq!(keys, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn remove_everything_empties_the_tree() {
        let (_dir, pool, mut tree) = test_tree(4, 4);

        for k in 1..=20 {
            tree.insert(&key(k), rid(k)).unwrap();
        }
        for k in 1..=20 {
            tree.remove(&key(k)).unwrap();
            tree.verify_integrity().unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(pool.pinned_page_count(), 0);

        let guard = pool.fetch_page(HEADER_PAGE_ID).unwrap();
        let directory = HeaderNode::from_page(guard.data()).unwrap();
        assert_eq!(
            directory.get_record("test_index").unwrap(),
            Some(INVALID_PAGE_ID)
        );
    }

    #[test]
    fn tree_state_survives_reopen_through_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let disk = DiskManager::create(&path).unwrap();
            let pool = Arc::new(BufferPool::new(16, disk).unwrap());
            ensure_header_page(&pool).unwrap();
            let mut tree =
                BTree::with_max_sizes("orders_pk", Arc::clone(&pool), Int64Comparator, 4, 4).unwrap();
            for k in 1..=50 {
                tree.insert(&key(k), rid(k)).unwrap();
            }
            pool.flush_all().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        let pool = Arc::new(BufferPool::new(16, disk).unwrap());
        ensure_header_page(&pool).unwrap();
        let tree =
            BTree::with_max_sizes("orders_pk", Arc::clone(&pool), Int64Comparator, 4, 4).unwrap();
        assert!(!tree.is_empty());
        for k in 1..=50 {
            assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
        }
        tree.verify_integrity().unwrap();
    }

    #[test]
    fn operations_leave_no_pins_behind() {
        let (_dir, pool, mut tree) = test_tree(4, 4);

        for k in 1..=100 {
            tree.insert(&key(k), rid(k)).unwrap();
            assert_eq!(pool.pinned_page_count(), 0, "pins leaked after insert {}", k);
        }
        for k in 1..=100 {
            tree.get_value(&key(k)).unwrap();
            assert_eq!(pool.pinned_page_count(), 0, "pins leaked after lookup {}", k);
        }
        for k in 1..=100 {
            tree.remove(&key(k)).unwrap();
            assert_eq!(pool.pinned_page_count(), 0, "pins leaked after remove {}", k);
        }
    }
}
