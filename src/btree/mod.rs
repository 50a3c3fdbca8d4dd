//! # B+Tree Index
//!
//! A disk-backed B+tree over fixed-width keys, layered on the buffer pool:
//!
//! - **Leaf pages** hold the sorted `(key, rid)` pairs and chain forward
//!   for range scans.
//! - **Interior pages** hold separator keys and child page ids; slot 0
//!   carries only a child pointer.
//! - **The tree engine** walks pages top-down for lookups and inserts and
//!   propagates splits and merges bottom-up, keeping every leaf at the
//!   same depth and every non-root page at or above half occupancy.
//! - **The iterator** scans the leaf chain with one page pinned at a time.
//!
//! Keys are opaque `[u8; KEY_SIZE]` values; their order comes entirely from
//! the comparator the tree is constructed with. Values in leaves are record
//! ids pointing at tuples stored elsewhere; the index never dereferences
//! them. Keys are unique: inserting an existing key returns false and
//! leaves the stored value untouched.
//!
//! Pages reference each other by page id only. Every access goes through a
//! pinned buffer-pool guard, and the engine unpins on every exit path, so
//! any intermediate state the pool could flush is a structurally valid
//! tree.

mod interior;
mod iter;
mod leaf;
mod tree;

pub use interior::{
    InteriorNode, InteriorNodeMut, InteriorSlot, INTERIOR_CONTENT_START, INTERIOR_MAX_SLOTS,
    INTERIOR_SLOT_SIZE,
};
pub use iter::TreeIterator;
pub use leaf::{
    LeafNode, LeafNodeMut, LeafSlot, LEAF_CONTENT_START, LEAF_HEADER_SIZE, LEAF_MAX_SLOTS,
    LEAF_SLOT_SIZE,
};
pub use tree::{BTree, INTERIOR_DEFAULT_MAX_SIZE, LEAF_DEFAULT_MAX_SIZE};
