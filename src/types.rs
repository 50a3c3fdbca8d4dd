//! Core identifier types shared across the storage and index layers: page
//! ids and their sentinels, record identifiers, the fixed-width key alias,
//! and the comparator trait the tree orders keys with.

use std::cmp::Ordering;

use zerocopy::little_endian::{I32, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::KEY_SIZE;

/// Identifier of a page inside the database file.
pub type PageId = i32;

/// Sentinel page id outside any valid allocation range.
pub const INVALID_PAGE_ID: PageId = -1;

/// The singleton directory page always lives at this id.
pub const HEADER_PAGE_ID: PageId = 0;

/// A fixed-width index key. The bytes are opaque to the tree; only the
/// injected [`KeyComparator`] gives them an order.
pub type IndexKey = [u8; KEY_SIZE];

/// Record identifier: the location of a tuple stored outside the index.
///
/// Stored verbatim inside leaf slots, so the struct doubles as the on-page
/// little-endian representation.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Rid {
    page_id: I32,
    slot_num: U32,
}

const _: () = assert!(std::mem::size_of::<Rid>() == 8);

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self {
            page_id: I32::new(page_id),
            slot_num: U32::new(slot_num),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.get()
    }

    pub fn slot_num(&self) -> u32 {
        self.slot_num.get()
    }
}

impl std::fmt::Debug for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rid({}:{})", self.page_id.get(), self.slot_num.get())
    }
}

/// Total order over fixed-width keys, injected into the tree.
///
/// Returns the ordering of `a` relative to `b`. Implementations must be a
/// strict total order; the tree relies on it for binary search, slot
/// ordering, and separator maintenance.
pub trait KeyComparator {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering;
}

/// Numeric order over keys holding a little-endian `i64` payload.
///
/// This is the comparator the file-ingestion helpers pair with
/// [`encode_i64_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Int64Comparator;

impl KeyComparator for Int64Comparator {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        i64::from_le_bytes(*a).cmp(&i64::from_le_bytes(*b))
    }
}

/// Plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &IndexKey, b: &IndexKey) -> Ordering {
        a.cmp(b)
    }
}

/// Encodes an `i64` into the key representation [`Int64Comparator`] orders.
pub fn encode_i64_key(key: i64) -> IndexKey {
    key.to_le_bytes()
}

/// Inverse of [`encode_i64_key`].
pub fn decode_i64_key(key: &IndexKey) -> i64 {
    i64::from_le_bytes(*key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_roundtrips_fields() {
        let rid = Rid::new(7, 42);
        assert_eq!(rid.page_id(), 7);
        assert_eq!(rid.slot_num(), 42);
    }

    #[test]
    fn rid_is_eight_bytes_on_page() {
        assert_eq!(std::mem::size_of::<Rid>(), 8);
    }

    #[test]
    fn int64_comparator_orders_numerically() {
        let cmp = Int64Comparator;
        let a = encode_i64_key(-5);
        let b = encode_i64_key(3);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn int64_key_roundtrip() {
        for k in [i64::MIN, -1, 0, 1, i64::MAX] {
            assert_eq!(decode_i64_key(&encode_i64_key(k)), k);
        }
    }

    #[test]
    fn bytewise_comparator_orders_lexicographically() {
        let cmp = BytewiseComparator;
        let a = *b"aaaaaaaa";
        let b = *b"aaaaaaab";
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
    }
}
