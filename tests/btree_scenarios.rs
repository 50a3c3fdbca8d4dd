//! End-to-end scenarios over small trees (`max_size = 4`) whose shapes can
//! be checked page by page, plus larger randomized runs validated with the
//! integrity checker.

use std::io::Write;
use std::sync::Arc;

use oakdb::btree::{InteriorNode, LeafNode};
use oakdb::storage::{ensure_header_page, HeaderNode, PageHeader, PageType};
use oakdb::{
    decode_i64_key, encode_i64_key, BTree, BufferPool, DiskManager, IndexKey, Int64Comparator,
    PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID,
};

fn key(k: i64) -> IndexKey {
    encode_i64_key(k)
}

fn rid(k: i64) -> Rid {
    Rid::new(k as PageId, k as u32)
}

fn small_tree() -> (tempfile::TempDir, Arc<BufferPool>, BTree<Int64Comparator>) {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskManager::create(dir.path().join("index.db")).unwrap();
    let pool = Arc::new(BufferPool::new(64, disk).unwrap());
    ensure_header_page(&pool).unwrap();
    let tree = BTree::with_max_sizes("scenario", Arc::clone(&pool), Int64Comparator, 4, 4).unwrap();
    (dir, pool, tree)
}

fn insert_all(tree: &mut BTree<Int64Comparator>, keys: impl IntoIterator<Item = i64>) {
    for k in keys {
        assert!(tree.insert(&key(k), rid(k)).unwrap(), "insert {}", k);
        tree.verify_integrity().unwrap();
    }
}

fn scan_keys(tree: &BTree<Int64Comparator>) -> Vec<i64> {
    tree.iter()
        .unwrap()
        .map(|entry| decode_i64_key(&entry.unwrap().0))
        .collect()
}

/// The keys of each leaf, left to right along the sibling chain.
fn leaves_of(pool: &BufferPool, tree: &BTree<Int64Comparator>) -> Vec<Vec<i64>> {
    let mut page_id = tree.root_page_id();
    assert_ne!(page_id, INVALID_PAGE_ID);

    // Descend along child 0 to the leftmost leaf.
    loop {
        let guard = pool.fetch_page(page_id).unwrap();
        let header = PageHeader::from_bytes(guard.data()).unwrap();
        if header.page_type() == PageType::Leaf {
            break;
        }
        let interior = InteriorNode::from_page(guard.data()).unwrap();
        page_id = interior.value_at(0).unwrap();
    }

    let mut leaves = Vec::new();
    loop {
        let guard = pool.fetch_page(page_id).unwrap();
        let leaf = LeafNode::from_page(guard.data()).unwrap();
        let keys = (0..leaf.size() as usize)
            .map(|i| decode_i64_key(leaf.key_at(i).unwrap()))
            .collect();
        leaves.push(keys);
        let next = leaf.next_page_id();
        if next == INVALID_PAGE_ID {
            break;
        }
        page_id = next;
    }
    leaves
}

/// The separator keys of the root, assuming the root is an interior page.
fn root_separators(pool: &BufferPool, tree: &BTree<Int64Comparator>) -> Vec<i64> {
    let guard = pool.fetch_page(tree.root_page_id()).unwrap();
    let interior = InteriorNode::from_page(guard.data()).unwrap();
    (1..interior.size() as usize)
        .map(|i| decode_i64_key(interior.key_at(i).unwrap()))
        .collect()
}

#[test]
fn sequential_inserts_split_into_expected_shape() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=5);

    assert_eq!(leaves_of(&pool, &tree), vec![vec![1, 2], vec![3, 4, 5]]);
    assert_eq!(root_separators(&pool, &tree), vec![3]);
}

#[test]
fn continued_inserts_split_root_children_evenly() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=8);

    assert_eq!(
        leaves_of(&pool, &tree),
        vec![vec![1, 2], vec![3, 4], vec![5, 6], vec![7, 8]]
    );
    assert_eq!(root_separators(&pool, &tree), vec![3, 5, 7]);
}

#[test]
fn underflow_with_small_left_sibling_coalesces() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=8);

    // Removing 4 drops leaf [3, 4] below minimum occupancy. Its left
    // sibling [1, 2] is small enough to absorb it, so the pages merge and
    // the separator 3 disappears from the root.
    tree.remove(&key(4)).unwrap();
    tree.verify_integrity().unwrap();

    assert_eq!(leaves_of(&pool, &tree), vec![vec![1, 2, 3], vec![5, 6], vec![7, 8]]);
    assert_eq!(root_separators(&pool, &tree), vec![5, 7]);
}

#[test]
fn leftmost_underflow_coalesces_with_right_sibling() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=8);

    tree.remove(&key(1)).unwrap();
    tree.verify_integrity().unwrap();
    tree.remove(&key(2)).unwrap();
    tree.verify_integrity().unwrap();

    assert_eq!(leaves_of(&pool, &tree), vec![vec![3, 4], vec![5, 6], vec![7, 8]]);
    assert_eq!(root_separators(&pool, &tree), vec![5, 7]);
}

#[test]
fn coalesce_can_fill_a_leaf_to_max_size() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, [1, 2, 3, 4, 5]);
    // Leaves: [1, 2] and [3, 4, 5]. Removing 1 underflows the left leaf;
    // together the pages hold exactly max_size keys, so they merge and the
    // root collapses to a single full leaf.
    tree.remove(&key(1)).unwrap();
    tree.verify_integrity().unwrap();

    assert_eq!(leaves_of(&pool, &tree), vec![vec![2, 3, 4, 5]]);
    let guard = pool.fetch_page(tree.root_page_id()).unwrap();
    assert_eq!(
        PageHeader::from_bytes(guard.data()).unwrap().page_type(),
        PageType::Leaf
    );
    drop(guard);

    // The full leaf still accepts an insert, splitting right away.
    tree.insert(&key(1), rid(1)).unwrap();
    tree.verify_integrity().unwrap();
    assert_eq!(scan_keys(&tree), vec![1, 2, 3, 4, 5]);
}

#[test]
fn redistribution_borrows_from_large_sibling() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=8);

    // Two merges first leave leaves [1, 2, 3, 5] and [7, 8].
    tree.remove(&key(4)).unwrap();
    tree.verify_integrity().unwrap();
    tree.remove(&key(6)).unwrap();
    tree.verify_integrity().unwrap();
    assert_eq!(leaves_of(&pool, &tree), vec![vec![1, 2, 3, 5], vec![7, 8]]);

    // Removing 8 underflows the right leaf. Together the pages hold five
    // keys, too many to merge, so the left sibling lends its last key and
    // the separator follows the new boundary.
    tree.remove(&key(8)).unwrap();
    tree.verify_integrity().unwrap();

    assert_eq!(leaves_of(&pool, &tree), vec![vec![1, 2, 3], vec![5, 7]]);
    assert_eq!(root_separators(&pool, &tree), vec![5]);
}

#[test]
fn range_scan_from_key_yields_suffix_in_order() {
    let (_dir, _pool, mut tree) = small_tree();
    insert_all(&mut tree, [10, 20, 30, 40, 50, 25, 35]);

    let from_25: Vec<i64> = tree
        .iter_from(&key(25))
        .unwrap()
        .map(|entry| decode_i64_key(&entry.unwrap().0))
        .collect();
    assert_eq!(from_25, vec![25, 30, 35, 40, 50]);

    // A start key between stored keys lands on the next larger one.
    let from_26: Vec<i64> = tree
        .iter_from(&key(26))
        .unwrap()
        .map(|entry| decode_i64_key(&entry.unwrap().0))
        .collect();
    assert_eq!(from_26, vec![30, 35, 40, 50]);
}

#[test]
fn full_cycle_returns_to_empty_state() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=100);

    for k in (1..=100).rev() {
        tree.remove(&key(k)).unwrap();
        tree.verify_integrity().unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(pool.pinned_page_count(), 0);

    let guard = pool.fetch_page(HEADER_PAGE_ID).unwrap();
    let directory = HeaderNode::from_page(guard.data()).unwrap();
    assert_eq!(directory.get_record("scenario").unwrap(), Some(INVALID_PAGE_ID));
}

#[test]
fn root_leaf_splits_exactly_at_max_size() {
    let (_dir, _pool, mut tree) = small_tree();

    // Three keys fit in the root leaf without splitting.
    insert_all(&mut tree, 1..=3);
    let root_before = tree.root_page_id();

    // The fourth insert fills the leaf to max_size and must split it,
    // creating a two-level tree under a fresh root.
    tree.insert(&key(4), rid(4)).unwrap();
    tree.verify_integrity().unwrap();
    assert_ne!(tree.root_page_id(), root_before);
}

#[test]
fn deleting_last_key_invalidates_root() {
    let (_dir, _pool, mut tree) = small_tree();
    tree.insert(&key(7), rid(7)).unwrap();

    tree.remove(&key(7)).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);

    // The tree is usable again afterwards.
    tree.insert(&key(9), rid(9)).unwrap();
    assert_eq!(tree.get_value(&key(9)).unwrap(), Some(rid(9)));
}

#[test]
fn collapsing_internal_root_promotes_only_child() {
    let (_dir, pool, mut tree) = small_tree();
    insert_all(&mut tree, 1..=5);
    assert_eq!(root_separators(&pool, &tree), vec![3]);

    // Removing down to a single leaf's worth of keys collapses the
    // two-level tree back to a leaf root with no parent.
    for k in [1, 2, 3] {
        tree.remove(&key(k)).unwrap();
        tree.verify_integrity().unwrap();
    }

    let guard = pool.fetch_page(tree.root_page_id()).unwrap();
    let header = PageHeader::from_bytes(guard.data()).unwrap();
    assert_eq!(header.page_type(), PageType::Leaf);
    assert_eq!(header.parent_page_id(), INVALID_PAGE_ID);
    drop(guard);

    assert_eq!(scan_keys(&tree), vec![4, 5]);
}

#[test]
fn insert_get_remove_roundtrip_laws() {
    let (_dir, _pool, mut tree) = small_tree();

    assert!(tree.insert(&key(1), rid(1)).unwrap());
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));

    assert!(!tree.insert(&key(1), rid(999)).unwrap());
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));

    tree.remove(&key(1)).unwrap();
    assert_eq!(tree.get_value(&key(1)).unwrap(), None);
}

#[test]
fn any_permutation_reaches_the_same_key_set() {
    let orders: [&[i64]; 4] = [
        &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
        &[12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1],
        &[6, 1, 12, 7, 2, 11, 8, 3, 10, 9, 4, 5],
        &[2, 4, 6, 8, 10, 12, 1, 3, 5, 7, 9, 11],
    ];

    for order in orders {
        let (_dir, _pool, mut tree) = small_tree();
        insert_all(&mut tree, order.iter().copied());
        assert_eq!(scan_keys(&tree), (1..=12).collect::<Vec<_>>());
    }
}

#[test]
fn interleaved_inserts_and_removes_stay_consistent() {
    let (_dir, pool, mut tree) = small_tree();
    let mut expected: Vec<i64> = Vec::new();

    // Deterministic pseudo-random walk over a small key space.
    let mut state: u64 = 0x9E3779B97F4A7C15;
    for _ in 0..600 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let k = (state >> 33) as i64 % 128;
        if state & 1 == 0 {
            let inserted = tree.insert(&key(k), rid(k)).unwrap();
            assert_eq!(inserted, !expected.contains(&k), "insert {}", k);
            if inserted {
                expected.push(k);
            }
        } else {
            tree.remove(&key(k)).unwrap();
            expected.retain(|&e| e != k);
        }
        tree.verify_integrity().unwrap();
    }

    expected.sort_unstable();
    assert_eq!(scan_keys(&tree), expected);
    assert_eq!(pool.pinned_page_count(), 0);
}

#[test]
fn default_capacity_tree_handles_thousands_of_keys() {
    let dir = tempfile::tempdir().unwrap();
    let disk = DiskManager::create(dir.path().join("index.db")).unwrap();
    let pool = Arc::new(BufferPool::new(64, disk).unwrap());
    ensure_header_page(&pool).unwrap();
    let mut tree = BTree::new("big", Arc::clone(&pool), Int64Comparator).unwrap();

    // Interleave two ranges so both split directions occur.
    for k in 0..2000 {
        tree.insert(&key(k * 2), rid(k * 2)).unwrap();
    }
    for k in 0..2000 {
        tree.insert(&key(k * 2 + 1), rid(k * 2 + 1)).unwrap();
    }
    tree.verify_integrity().unwrap();

    assert_eq!(scan_keys(&tree), (0..4000).collect::<Vec<_>>());
    for k in (0..4000).step_by(97) {
        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(rid(k)));
    }

    for k in 0..4000 {
        tree.remove(&key(k)).unwrap();
    }
    assert!(tree.is_empty());
    assert_eq!(pool.pinned_page_count(), 0);
}

#[test]
fn bulk_ingestion_from_files() {
    let (_dir, _pool, mut tree) = small_tree();

    let dir = tempfile::tempdir().unwrap();
    let insert_path = dir.path().join("insert.txt");
    let remove_path = dir.path().join("remove.txt");

    {
        let mut f = std::fs::File::create(&insert_path).unwrap();
        for k in [5i64, 3, 9, 1, 7, 3] {
            writeln!(f, "{}", k).unwrap();
        }
    }
    {
        let mut f = std::fs::File::create(&remove_path).unwrap();
        for k in [3i64, 9] {
            writeln!(f, "{}", k).unwrap();
        }
    }

    // Six lines, one duplicate: five distinct keys land in the tree.
    assert_eq!(tree.insert_from_file(&insert_path).unwrap(), 5);
    tree.verify_integrity().unwrap();
    assert_eq!(scan_keys(&tree), vec![1, 3, 5, 7, 9]);

    assert_eq!(tree.remove_from_file(&remove_path).unwrap(), 2);
    tree.verify_integrity().unwrap();
    assert_eq!(scan_keys(&tree), vec![1, 5, 7]);

    // Rids are synthesized from the key value.
    let stored = tree.get_value(&key(7)).unwrap().unwrap();
    assert_eq!(stored.slot_num(), 7);
}
