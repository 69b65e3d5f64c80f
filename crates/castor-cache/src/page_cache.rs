//! The page cache.
//!
//! Layers LRU ordering, dirty tracking, and write-back over the content
//! store. One lock protects the whole cache; per-operation work is a map
//! probe plus, at worst, one CAS store for an evicted dirty page.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error};

use castor_common::error::CastorResult;
use castor_common::types::PageId;
use castor_common::KeyCodec;
use castor_store::{ContentStore, Page};

use crate::lru::LruList;
use crate::stats::{CacheStats, CacheStatsSnapshot};

/// A cached page with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedPage<K> {
    /// Shared snapshot of the page. Copy-on-write: mutations replace the
    /// whole entry, they never modify this value in place.
    pub page: Arc<Page<K>>,
    /// Whether this content has reached the content store yet.
    pub dirty: bool,
    /// When the entry was last touched.
    pub last_access: Instant,
}

/// LRU page cache in front of the content store.
pub struct PageCache<K: KeyCodec> {
    inner: Mutex<LruList<PageId, CachedPage<K>>>,
    store: Arc<ContentStore<K>>,
    stats: CacheStats,
}

impl<K: KeyCodec> PageCache<K> {
    /// Creates a cache holding at most `max_cache_size` pages.
    #[must_use]
    pub fn new(store: Arc<ContentStore<K>>, max_cache_size: usize) -> Self {
        Self {
            inner: Mutex::new(LruList::new(max_cache_size)),
            store,
            stats: CacheStats::new(),
        }
    }

    /// Returns the cached page, loading it from the content store on a
    /// miss.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if the page resolves through neither the
    /// cache nor the content store.
    pub fn get(&self, page_id: PageId) -> CastorResult<Arc<Page<K>>> {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.get_mut(&page_id) {
            entry.last_access = Instant::now();
            self.stats.record_hit();
            return Ok(Arc::clone(&entry.page));
        }

        self.stats.record_miss();
        let page = self.store.get(page_id)?;
        let entry = CachedPage {
            page: Arc::clone(&page),
            dirty: false,
            last_access: Instant::now(),
        };
        let evicted = inner.insert(page_id, entry);
        self.handle_eviction(evicted);
        Ok(page)
    }

    /// Inserts or replaces a page, marking it dirty.
    pub fn put(&self, page_id: PageId, page: Arc<Page<K>>) {
        let mut inner = self.inner.lock();
        let entry = CachedPage {
            page,
            dirty: true,
            last_access: Instant::now(),
        };
        let evicted = inner.insert(page_id, entry);
        self.stats.record_insert();
        self.handle_eviction(evicted);
    }

    /// Sets the dirty bit. Returns false if the page is not cached.
    pub fn mark_dirty(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        match inner.peek_mut(&page_id) {
            Some(entry) => {
                entry.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Clears the dirty bit. Returns false if the page is not cached.
    ///
    /// Called by the writer pipeline once a snapshot has been persisted.
    pub fn clear_dirty(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        match inner.peek_mut(&page_id) {
            Some(entry) => {
                entry.dirty = false;
                true
            }
            None => false,
        }
    }

    /// Clears the dirty bit only if `snapshot` is still the cached
    /// entry for this page. Used by writer workers so a persisted but
    /// superseded snapshot never marks newer content clean.
    pub fn clear_dirty_if_current(&self, page_id: PageId, snapshot: &Arc<Page<K>>) -> bool {
        let mut inner = self.inner.lock();
        match inner.peek_mut(&page_id) {
            Some(entry) if Arc::ptr_eq(&entry.page, snapshot) => {
                entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Returns whether `snapshot` is still the cached entry for this
    /// page.
    #[must_use]
    pub fn snapshot_is_current(&self, page_id: PageId, snapshot: &Arc<Page<K>>) -> bool {
        self.inner
            .lock()
            .peek(&page_id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.page, snapshot))
    }

    /// Returns whether the page is cached and dirty.
    #[must_use]
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        self.inner.lock().peek(&page_id).map(|entry| entry.dirty)
    }

    /// Snapshot of all currently dirty entries.
    #[must_use]
    pub fn dirty_pages(&self) -> Vec<(PageId, Arc<Page<K>>)> {
        self.inner
            .lock()
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, entry)| (*id, Arc::clone(&entry.page)))
            .collect()
    }

    /// Number of dirty entries.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .count()
    }

    /// Writes every dirty entry back to the content store, clearing the
    /// dirty bits. Returns the number of pages written; a second call
    /// with no intervening writes is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates the first content store failure.
    pub fn flush_all(&self) -> CastorResult<usize> {
        let mut inner = self.inner.lock();
        let dirty: Vec<(PageId, Arc<Page<K>>)> = inner
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, entry)| (*id, Arc::clone(&entry.page)))
            .collect();

        for (page_id, page) in &dirty {
            self.store.store(page)?;
            if let Some(entry) = inner.peek_mut(page_id) {
                entry.dirty = false;
            }
        }

        self.stats.record_flushed(dirty.len() as u64);
        if !dirty.is_empty() {
            debug!(pages = dirty.len(), "flushed dirty pages");
        }
        Ok(dirty.len())
    }

    /// Returns true if the page is cached.
    #[must_use]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().contains(&page_id)
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Cache capacity in pages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Writes an evicted dirty page back to the content store before it
    /// is dropped.
    fn handle_eviction(&self, evicted: Option<(PageId, CachedPage<K>)>) {
        let Some((page_id, entry)) = evicted else {
            return;
        };
        self.stats.record_eviction();
        if entry.dirty {
            match self.store.store(&entry.page) {
                Ok(_) => self.stats.record_write_back(),
                Err(e) => {
                    error!(page_id = %page_id, error = %e, "eviction write-back failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[u32], values: &[u64]) -> Page<u32> {
        let mut page = Page::new_leaf();
        page.keys = keys.to_vec();
        for v in values {
            page.data.extend_from_slice(&v.to_le_bytes());
        }
        page
    }

    fn setup(capacity: usize) -> (Arc<ContentStore<u32>>, PageCache<u32>) {
        let store = Arc::new(ContentStore::new());
        let cache = PageCache::new(Arc::clone(&store), capacity);
        (store, cache)
    }

    #[test]
    fn test_get_loads_from_store() {
        let (store, cache) = setup(4);
        let id = store.store(&leaf_with(&[1], &[10])).unwrap();

        let page = cache.get(id).unwrap();
        assert_eq!(page.keys, vec![1]);
        assert_eq!(cache.stats().misses, 1);

        // Second get is a hit.
        cache.get(id).unwrap();
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_get_missing_page() {
        let (_store, cache) = setup(4);
        assert!(cache.get(PageId::new(42)).is_err());
    }

    #[test]
    fn test_put_marks_dirty() {
        let (store, cache) = setup(4);
        let id = store.store(&leaf_with(&[1], &[10])).unwrap();

        let mut page = leaf_with(&[1, 2], &[10, 20]);
        page.header.page_id = id;
        cache.put(id, Arc::new(page));

        assert_eq!(cache.is_dirty(id), Some(true));
        assert_eq!(cache.dirty_pages().len(), 1);
    }

    #[test]
    fn test_dirty_bit_ops() {
        let (store, cache) = setup(4);
        let id = store.store(&leaf_with(&[1], &[10])).unwrap();
        cache.get(id).unwrap();

        assert_eq!(cache.is_dirty(id), Some(false));
        assert!(cache.mark_dirty(id));
        assert_eq!(cache.is_dirty(id), Some(true));
        assert!(cache.clear_dirty(id));
        assert_eq!(cache.is_dirty(id), Some(false));
        assert!(!cache.mark_dirty(PageId::new(99)));
    }

    #[test]
    fn test_flush_all_idempotent() {
        let (store, cache) = setup(8);
        let id = store.store(&leaf_with(&[1], &[10])).unwrap();

        let mut page = leaf_with(&[1, 2], &[10, 20]);
        page.header.page_id = id;
        cache.put(id, Arc::new(page));

        assert_eq!(cache.flush_all().unwrap(), 1);
        assert_eq!(cache.dirty_count(), 0);

        // Second flush writes nothing.
        assert_eq!(cache.flush_all().unwrap(), 0);

        // The store now resolves the id to the flushed content.
        let loaded = store.get(id).unwrap();
        assert_eq!(loaded.keys, vec![1, 2]);
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let (store, cache) = setup(2);
        let id1 = store.store(&leaf_with(&[1], &[10])).unwrap();

        let mut updated = leaf_with(&[1, 9], &[10, 90]);
        updated.header.page_id = id1;
        cache.put(id1, Arc::new(updated));

        // Fill the cache so id1 gets evicted while dirty.
        let id2 = store.store(&leaf_with(&[2], &[20])).unwrap();
        let id3 = store.store(&leaf_with(&[3], &[30])).unwrap();
        cache.get(id2).unwrap();
        cache.get(id3).unwrap();

        assert!(!cache.contains(id1));
        assert_eq!(cache.stats().write_backs, 1);

        // A reload sees the written-back content.
        let reloaded = cache.get(id1).unwrap();
        assert_eq!(reloaded.keys, vec![1, 9]);
    }

    #[test]
    fn test_lru_eviction_order() {
        let (store, cache) = setup(2);
        let id1 = store.store(&leaf_with(&[1], &[10])).unwrap();
        let id2 = store.store(&leaf_with(&[2], &[20])).unwrap();
        let id3 = store.store(&leaf_with(&[3], &[30])).unwrap();

        cache.get(id1).unwrap();
        cache.get(id2).unwrap();
        cache.get(id1).unwrap(); // touch id1 so id2 is the victim
        cache.get(id3).unwrap();

        assert!(cache.contains(id1));
        assert!(!cache.contains(id2));
        assert!(cache.contains(id3));
    }
}
