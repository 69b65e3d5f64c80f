//! B+-tree search, insert, and delete.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use castor_cache::PageCache;
use castor_common::error::{CastorError, CastorResult};
use castor_common::types::PageId;
use castor_common::{KeyCodec, ValueCodec};
use castor_store::{ContentStore, Page, PageFlags};
use castor_writer::WriterQueue;

/// Structural statistics for a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Tree height (1 for a lone leaf).
    pub height: usize,
    /// Number of keys stored.
    pub key_count: usize,
    /// Number of reachable pages.
    pub page_count: usize,
}

/// A B+-tree keyed by `K` storing fixed-width `V` values.
///
/// The tree owns only its root page ID; pages live in the cache and the
/// content store. All mutations run on a single writer thread (the engine
/// serialises them), while `search` is safe against the cache's own lock.
pub struct BTree<K: KeyCodec, V: ValueCodec> {
    root: PageId,
    max_keys: usize,
    cache: Arc<PageCache<K>>,
    store: Arc<ContentStore<K>>,
    writer: Arc<WriterQueue<K>>,
    _value: PhantomData<V>,
}

impl<K: KeyCodec, V: ValueCodec> BTree<K, V> {
    /// Creates an empty tree: a single leaf root.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `max_keys < 3`, or a store failure.
    pub fn new(
        store: Arc<ContentStore<K>>,
        cache: Arc<PageCache<K>>,
        writer: Arc<WriterQueue<K>>,
        max_keys: usize,
    ) -> CastorResult<Self> {
        if max_keys < 3 {
            return Err(CastorError::invalid_argument(
                "max_keys_per_node must be at least 3",
            ));
        }
        let root = store.store(&Page::new_leaf())?;
        Ok(Self {
            root,
            max_keys,
            cache,
            store,
            writer,
            _value: PhantomData,
        })
    }

    /// Returns the current root page ID.
    #[must_use]
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Minimum keys a non-root page must hold.
    ///
    /// `(M - 1) / 2` keeps merges within capacity: two minimal internal
    /// nodes plus the pulled-down separator fit in one node.
    #[must_use]
    pub fn min_keys(&self) -> usize {
        (self.max_keys - 1) / 2
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns storage errors; a missing key is `Ok(None)`.
    pub fn search(&self, key: &K) -> CastorResult<Option<V>> {
        let mut cur = self.root;
        loop {
            let page = self.cache.get(cur)?;
            if page.is_leaf {
                return match page.keys.binary_search(key) {
                    Ok(i) => Ok(Some(V::read_from(page.leaf_slot(i, V::SIZE))?)),
                    Err(_) => Ok(None),
                };
            }
            cur = page.children[child_index(&page, key)];
        }
    }

    /// Returns the leaf page a key belongs to.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn locate_leaf(&self, key: &K) -> CastorResult<PageId> {
        let mut cur = self.root;
        loop {
            let page = self.cache.get(cur)?;
            if page.is_leaf {
                return Ok(cur);
            }
            cur = page.children[child_index(&page, key)];
        }
    }

    /// Inserts a key-value pair. An existing key has its value
    /// overwritten in place.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn insert(&mut self, key: K, value: &V) -> CastorResult<()> {
        let root_page = self.cache.get(self.root)?;
        if root_page.keys.len() == self.max_keys {
            self.split_root()?;
        }

        let value_bytes = value.to_vec();
        let mut cur = self.root;
        loop {
            let page = self.cache.get(cur)?;
            if page.is_leaf {
                let mut leaf = (*page).clone();
                match leaf.keys.binary_search(&key) {
                    Ok(i) => leaf.leaf_overwrite_slot(i, &value_bytes),
                    Err(i) => {
                        leaf.keys.insert(i, key.clone());
                        leaf.leaf_insert_slot(i, &value_bytes);
                    }
                }
                self.write_page(cur, leaf)?;
                return Ok(());
            }

            let idx = child_index(&page, &key);
            let child_id = page.children[idx];
            let child = self.cache.get(child_id)?;
            if child.keys.len() == self.max_keys {
                let sep = self.split_child(cur, idx)?;
                let parent = self.cache.get(cur)?;
                let idx = if key > sep { idx + 1 } else { idx };
                cur = parent.children[idx];
            } else {
                cur = child_id;
            }
        }
    }

    /// Deletes a key. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn delete(&mut self, key: &K) -> CastorResult<bool> {
        let mut cur = self.root;
        loop {
            let page = self.cache.get(cur)?;
            if page.is_leaf {
                let mut leaf = (*page).clone();
                return match leaf.keys.binary_search(key) {
                    Err(_) => Ok(false),
                    Ok(i) => {
                        leaf.keys.remove(i);
                        leaf.leaf_remove_slot(i, V::SIZE);
                        self.write_page(cur, leaf)?;
                        Ok(true)
                    }
                };
            }

            let idx = child_index(&page, key);
            let child_id = page.children[idx];
            let child = self.cache.get(child_id)?;
            if child.keys.len() <= self.min_keys() {
                // The child could underflow; fix it before descending.
                self.rebalance_child(cur, idx)?;

                let page = self.cache.get(cur)?;
                if cur == self.root && !page.is_leaf && page.keys.is_empty() {
                    // Merging drained the root: promote its only child.
                    let only = page.children[0];
                    trace!(old_root = %cur, new_root = %only, "collapsing root");
                    self.root = only;
                    cur = only;
                    continue;
                }
                cur = page.children[child_index(&page, key)];
            } else {
                cur = child_id;
            }
        }
    }

    /// Tree height: 1 for a lone leaf.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn height(&self) -> CastorResult<usize> {
        let mut height = 1;
        let mut cur = self.root;
        loop {
            let page = self.cache.get(cur)?;
            if page.is_leaf {
                return Ok(height);
            }
            height += 1;
            cur = page.children[0];
        }
    }

    /// Structural statistics: height, key count, reachable pages.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn stats(&self) -> CastorResult<TreeStats> {
        let mut stats = TreeStats {
            height: self.height()?,
            ..Default::default()
        };
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let page = self.cache.get(id)?;
            stats.page_count += 1;
            if page.is_leaf {
                stats.key_count += page.keys.len();
            } else {
                stack.extend(page.children.iter().copied());
            }
        }
        Ok(stats)
    }

    /// Renders the tree structure for debugging and the CLI.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn dump(&self) -> CastorResult<String> {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out)?;
        Ok(out)
    }

    /// Walks the whole tree checking structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `Internal` describing the first violation.
    pub fn verify(&self) -> CastorResult<()> {
        let mut leaf_keys: Vec<K> = Vec::new();
        self.verify_node(self.root, true, &mut leaf_keys)?;
        for pair in leaf_keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(CastorError::internal(format!(
                    "leaf keys out of order: {:?} then {:?}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    fn verify_node(&self, id: PageId, is_root: bool, leaf_keys: &mut Vec<K>) -> CastorResult<()> {
        let page = self.cache.get(id)?;

        page.check_invariants(V::SIZE)
            .map_err(|reason| CastorError::internal(format!("page {id}: {reason}")))?;

        if page.keys.len() > self.max_keys {
            return Err(CastorError::internal(format!(
                "page {id} holds {} keys, max is {}",
                page.keys.len(),
                self.max_keys
            )));
        }
        if !is_root && page.keys.len() < self.min_keys() {
            return Err(CastorError::internal(format!(
                "page {id} holds {} keys, min is {}",
                page.keys.len(),
                self.min_keys()
            )));
        }
        if page.header.content_hash != page.compute_content_hash() {
            return Err(CastorError::internal(format!(
                "page {id} content hash is stale"
            )));
        }

        if page.is_leaf {
            leaf_keys.extend(page.keys.iter().cloned());
        } else {
            for (i, child) in page.children.iter().enumerate() {
                self.verify_node(*child, false, leaf_keys)?;
                // Separator bounds: child i keys <= keys[i] < child i+1 keys.
                if i < page.keys.len() {
                    if let Some(last) = leaf_keys.last() {
                        if last > &page.keys[i] {
                            return Err(CastorError::internal(format!(
                                "page {id}: separator {:?} below subtree max {:?}",
                                page.keys[i], last
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn dump_node(&self, id: PageId, depth: usize, out: &mut String) -> CastorResult<()> {
        let page = self.cache.get(id)?;
        let indent = "  ".repeat(depth);
        if page.is_leaf {
            out.push_str(&format!("{indent}leaf p{id} keys={:?}\n", page.keys));
        } else {
            out.push_str(&format!("{indent}node p{id} keys={:?}\n", page.keys));
            for child in &page.children {
                self.dump_node(*child, depth + 1, out)?;
            }
        }
        Ok(())
    }

    /// Replaces the cache entry for `id` with the mutated page and hands
    /// a snapshot to the writer. A refused enqueue just leaves the page
    /// dirty; eviction or the next checkpoint persists it.
    fn write_page(&self, id: PageId, mut page: Page<K>) -> CastorResult<()> {
        page.header.page_id = id;
        page.update_hashes();
        let page = Arc::new(page);
        self.cache.put(id, Arc::clone(&page));
        if !self.writer.enqueue(id, page) {
            trace!(page_id = %id, "writer queue full; page stays dirty");
        }
        Ok(())
    }

    /// Splits a full root, growing the tree by one level.
    fn split_root(&mut self) -> CastorResult<()> {
        let mut new_root = Page::new_internal();
        new_root.children.push(self.root);
        let new_root_id = self.store.store(&new_root)?;
        trace!(old_root = %self.root, new_root = %new_root_id, "splitting root");

        new_root.header.page_id = new_root_id;
        self.write_page(new_root_id, new_root)?;
        self.root = new_root_id;
        self.split_child(new_root_id, 0)?;
        Ok(())
    }

    /// Splits the full child at `idx`, promoting one separator into the
    /// parent. Returns the separator. Leaf splits keep the separator in
    /// the left leaf; internal splits remove it from the child.
    fn split_child(&mut self, parent_id: PageId, idx: usize) -> CastorResult<K> {
        let mut parent = (*self.cache.get(parent_id)?).clone();
        let child_id = parent.children[idx];
        let mut child = (*self.cache.get(child_id)?).clone();
        let mid = self.max_keys / 2;

        let mut right = if child.is_leaf {
            Page::new_leaf()
        } else {
            Page::new_internal()
        };

        let sep = if child.is_leaf {
            let sep = child.keys[mid].clone();
            right.keys = child.keys.split_off(mid + 1);
            right.data = child.data.split_off((mid + 1) * V::SIZE);
            sep
        } else {
            right.keys = child.keys.split_off(mid + 1);
            right.children = child.children.split_off(mid + 1);
            child.keys.pop().expect("full internal node has a median")
        };

        let right_id = self.store.store(&right)?;
        right.header.page_id = right_id;

        parent.keys.insert(idx, sep.clone());
        parent.children.insert(idx + 1, right_id);

        self.write_page(child_id, child)?;
        self.write_page(right_id, right)?;
        self.write_page(parent_id, parent)?;
        Ok(sep)
    }

    /// Gives the child at `idx` at least one spare key: borrow from the
    /// left sibling, else from the right, else merge with a sibling and
    /// pull the separator down.
    fn rebalance_child(&mut self, parent_id: PageId, idx: usize) -> CastorResult<()> {
        let mut parent = (*self.cache.get(parent_id)?).clone();
        let child_id = parent.children[idx];
        let mut child = (*self.cache.get(child_id)?).clone();

        if idx > 0 {
            let left_id = parent.children[idx - 1];
            let mut left = (*self.cache.get(left_id)?).clone();
            if left.keys.len() > self.min_keys() {
                if child.is_leaf {
                    let moved = left.keys.pop().expect("left sibling has spare keys");
                    let slot = left.data.split_off(left.data.len() - V::SIZE);
                    child.keys.insert(0, moved);
                    child.data.splice(0..0, slot);
                    parent.keys[idx - 1] = left
                        .keys
                        .last()
                        .expect("left sibling keeps its minimum")
                        .clone();
                } else {
                    let spare = left.keys.pop().expect("left sibling has spare keys");
                    let sep = std::mem::replace(&mut parent.keys[idx - 1], spare);
                    child.keys.insert(0, sep);
                    child
                        .children
                        .insert(0, left.children.pop().expect("internal node has children"));
                }
                self.write_page(left_id, left)?;
                self.write_page(child_id, child)?;
                self.write_page(parent_id, parent)?;
                return Ok(());
            }
        }

        if idx + 1 < parent.children.len() {
            let right_id = parent.children[idx + 1];
            let mut right = (*self.cache.get(right_id)?).clone();
            if right.keys.len() > self.min_keys() {
                if child.is_leaf {
                    let moved = right.keys.remove(0);
                    let slot: Vec<u8> = right.data.drain(..V::SIZE).collect();
                    child.keys.push(moved.clone());
                    child.data.extend_from_slice(&slot);
                    parent.keys[idx] = moved;
                } else {
                    let spare = right.keys.remove(0);
                    let sep = std::mem::replace(&mut parent.keys[idx], spare);
                    child.keys.push(sep);
                    child.children.push(right.children.remove(0));
                }
                self.write_page(right_id, right)?;
                self.write_page(child_id, child)?;
                self.write_page(parent_id, parent)?;
                return Ok(());
            }
        }

        // Both siblings are minimal: merge around a separator.
        if idx > 0 {
            self.merge_children(parent_id, parent, idx - 1)
        } else {
            self.merge_children(parent_id, parent, idx)
        }
    }

    /// Merges `children[j + 1]` into `children[j]`, removing the
    /// separator between them (internal merges pull it down into the
    /// merged node). The absorbed page is marked deleted; its blob leaks.
    fn merge_children(
        &mut self,
        parent_id: PageId,
        mut parent: Page<K>,
        j: usize,
    ) -> CastorResult<()> {
        let left_id = parent.children[j];
        let right_id = parent.children[j + 1];
        let mut left = (*self.cache.get(left_id)?).clone();
        let mut right = (*self.cache.get(right_id)?).clone();
        let mut absorbed = right.clone();

        let sep = parent.keys.remove(j);
        parent.children.remove(j + 1);

        if left.is_leaf {
            left.keys.append(&mut right.keys);
            left.data.append(&mut right.data);
        } else {
            left.keys.push(sep);
            left.keys.append(&mut right.keys);
            left.children.append(&mut right.children);
        }
        trace!(left = %left_id, right = %right_id, "merged siblings");

        absorbed.header.flags.insert(PageFlags::DELETED);
        self.write_page(right_id, absorbed)?;
        self.write_page(left_id, left)?;
        self.write_page(parent_id, parent)?;
        Ok(())
    }
}

/// Smallest `i` with `key <= keys[i]`, else the last child.
fn child_index<K: KeyCodec>(page: &Page<K>, key: &K) -> usize {
    page.keys
        .iter()
        .position(|k| key <= k)
        .unwrap_or(page.keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use castor_common::config::WriterConfig;
    use rand::prelude::*;
    use std::collections::BTreeMap;

    struct Fixture {
        store: Arc<ContentStore<u32>>,
        cache: Arc<PageCache<u32>>,
        writer: Arc<WriterQueue<u32>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(ContentStore::new());
        let cache = Arc::new(PageCache::new(Arc::clone(&store), 256));
        let writer = WriterQueue::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            WriterConfig::default(),
        );
        Fixture {
            store,
            cache,
            writer,
        }
    }

    fn tree_with(f: &Fixture, max_keys: usize) -> BTree<u32, u64> {
        BTree::new(
            Arc::clone(&f.store),
            Arc::clone(&f.cache),
            Arc::clone(&f.writer),
            max_keys,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_tree_is_one_leaf() {
        let f = fixture();
        let tree = tree_with(&f, 3);
        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.search(&1).unwrap(), None);
    }

    #[test]
    fn test_single_insert() {
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        tree.insert(1, &100).unwrap();

        assert_eq!(tree.height().unwrap(), 1);
        assert_eq!(tree.search(&1).unwrap(), Some(100));
        let stats = tree.stats().unwrap();
        assert_eq!(stats.key_count, 1);
    }

    #[test]
    fn test_root_split_shape() {
        // M=3: inserting 1..4 splits the root into keys=[2] over
        // leaves (1,2) and (3,4).
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        for k in 1..=4u32 {
            tree.insert(k, &u64::from(k * 10)).unwrap();
        }

        let root = f.cache.get(tree.root()).unwrap();
        assert!(!root.is_leaf);
        assert_eq!(root.keys, vec![2]);
        assert_eq!(root.children.len(), 2);

        let left = f.cache.get(root.children[0]).unwrap();
        let right = f.cache.get(root.children[1]).unwrap();
        assert_eq!(left.keys, vec![1, 2]);
        assert_eq!(right.keys, vec![3, 4]);

        assert_eq!(tree.search(&3).unwrap(), Some(30));
        tree.verify().unwrap();
    }

    #[test]
    fn test_sequential_inserts() {
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        for k in 1..=100u32 {
            tree.insert(k, &u64::from(k)).unwrap();
        }

        for k in 1..=100u32 {
            assert_eq!(tree.search(&k).unwrap(), Some(u64::from(k)), "key {k}");
        }
        assert_eq!(tree.search(&101).unwrap(), None);
        assert!(tree.height().unwrap() >= 3);
        assert_eq!(tree.stats().unwrap().key_count, 100);
        tree.verify().unwrap();
    }

    #[test]
    fn test_duplicate_insert_overwrites() {
        let f = fixture();
        let mut tree = tree_with(&f, 4);
        tree.insert(5, &1).unwrap();
        tree.insert(5, &2).unwrap();

        assert_eq!(tree.search(&5).unwrap(), Some(2));
        assert_eq!(tree.stats().unwrap().key_count, 1);
        tree.verify().unwrap();
    }

    #[test]
    fn test_delete_from_leaf() {
        let f = fixture();
        let mut tree = tree_with(&f, 4);
        for k in [1u32, 2, 3] {
            tree.insert(k, &u64::from(k)).unwrap();
        }

        assert!(tree.delete(&2).unwrap());
        assert_eq!(tree.search(&2).unwrap(), None);
        assert_eq!(tree.search(&1).unwrap(), Some(1));
        assert_eq!(tree.search(&3).unwrap(), Some(3));
        assert!(!tree.delete(&2).unwrap());
        tree.verify().unwrap();
    }

    #[test]
    fn test_delete_with_rebalancing() {
        let f = fixture();
        let mut tree = tree_with(&f, 4);
        for k in 1..=50u32 {
            tree.insert(k, &u64::from(k)).unwrap();
        }

        // Delete enough keys to force borrows and merges.
        for k in (1..=40u32).rev() {
            assert!(tree.delete(&k).unwrap(), "key {k}");
            tree.verify().unwrap();
        }
        for k in 41..=50u32 {
            assert_eq!(tree.search(&k).unwrap(), Some(u64::from(k)));
        }
        assert_eq!(tree.stats().unwrap().key_count, 10);
    }

    #[test]
    fn test_delete_everything_collapses_root() {
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        for k in 1..=20u32 {
            tree.insert(k, &u64::from(k)).unwrap();
        }
        assert!(tree.height().unwrap() > 1);

        for k in 1..=20u32 {
            assert!(tree.delete(&k).unwrap());
        }
        assert_eq!(tree.stats().unwrap().key_count, 0);
        assert_eq!(tree.height().unwrap(), 1);
        tree.verify().unwrap();
    }

    #[test]
    fn test_random_workload_matches_btreemap() {
        let f = fixture();
        let mut tree = tree_with(&f, 5);
        let mut model: BTreeMap<u32, u64> = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(0xCA5702);

        for _ in 0..2000 {
            let key = rng.gen_range(0..300u32);
            if rng.gen_bool(0.6) {
                let value = rng.gen::<u64>();
                tree.insert(key, &value).unwrap();
                model.insert(key, value);
            } else {
                let expected = model.remove(&key).is_some();
                assert_eq!(tree.delete(&key).unwrap(), expected);
            }
        }

        tree.verify().unwrap();
        for key in 0..300u32 {
            assert_eq!(tree.search(&key).unwrap(), model.get(&key).copied());
        }
        assert_eq!(tree.stats().unwrap().key_count, model.len());
    }

    #[test]
    fn test_locate_leaf_matches_search_path() {
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        for k in 1..=10u32 {
            tree.insert(k, &u64::from(k)).unwrap();
        }

        let leaf_id = tree.locate_leaf(&7).unwrap();
        let leaf = f.cache.get(leaf_id).unwrap();
        assert!(leaf.is_leaf);
        assert!(leaf.keys.contains(&7));
    }

    #[test]
    fn test_dump_mentions_all_levels() {
        let f = fixture();
        let mut tree = tree_with(&f, 3);
        for k in 1..=10u32 {
            tree.insert(k, &u64::from(k)).unwrap();
        }
        let dump = tree.dump().unwrap();
        assert!(dump.contains("node"));
        assert!(dump.contains("leaf"));
    }

    #[test]
    fn test_small_max_keys_rejected() {
        let f = fixture();
        let result: CastorResult<BTree<u32, u64>> = BTree::new(
            Arc::clone(&f.store),
            Arc::clone(&f.cache),
            Arc::clone(&f.writer),
            2,
        );
        assert!(result.is_err());
    }
}
