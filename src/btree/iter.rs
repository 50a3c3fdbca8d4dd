//! Forward scan over the leaf chain.
//!
//! The iterator holds at most one pinned leaf at a time: when it runs off
//! the end of the current page it unpins it, follows `next_page_id`, and
//! pins the successor. It borrows the tree immutably, so the borrow checker
//! rules out structural modifications while a scan is live; the iterator
//! cannot observe a chain mid-splice.

use eyre::Result;

use super::leaf::LeafNode;
use super::tree::BTree;
use crate::storage::PageRef;
use crate::types::{IndexKey, KeyComparator, Rid, INVALID_PAGE_ID};

pub struct TreeIterator<'a, C: KeyComparator> {
    tree: &'a BTree<C>,
    leaf: Option<PageRef<'a>>,
    index: usize,
}

impl<'a, C: KeyComparator> TreeIterator<'a, C> {
    pub(crate) fn new(tree: &'a BTree<C>, leaf: Option<PageRef<'a>>, index: usize) -> Self {
        Self { tree, leaf, index }
    }
}

impl<C: KeyComparator> Iterator for TreeIterator<'_, C> {
    type Item = Result<(IndexKey, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let guard = self.leaf.as_ref()?;

            let step = (|| -> Result<Option<(IndexKey, Rid)>> {
                let leaf = LeafNode::from_page(guard.data())?;
                if self.index < leaf.size() as usize {
                    let slot = leaf.slot_at(self.index)?;
                    return Ok(Some((slot.key, slot.rid)));
                }
                Ok(None)
            })();

            match step {
                Ok(Some(entry)) => {
                    self.index += 1;
                    return Some(Ok(entry));
                }
                Ok(None) => {
                    // Exhausted this leaf: unpin it, then follow the chain.
                    let next_id = match LeafNode::from_page(guard.data()) {
                        Ok(leaf) => leaf.next_page_id(),
                        Err(e) => {
                            self.leaf = None;
                            return Some(Err(e));
                        }
                    };
                    self.leaf = None;
                    if next_id == INVALID_PAGE_ID {
                        return None;
                    }
                    match self.tree.pool().fetch_page(next_id) {
                        Ok(next_guard) => {
                            self.leaf = Some(next_guard);
                            self.index = 0;
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => {
                    self.leaf = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
