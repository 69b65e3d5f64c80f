//! The content-addressed store (CAS).
//!
//! Two maps and a counter: `content_map` keys immutable page blobs by the
//! SHA-256 of their canonical image, `page_to_hash` resolves a logical
//! page ID to the hash of its current content, and `next_page_id` is the
//! dense ID allocator. Storing a page whose content already exists is a
//! dedup hit: the blob is shared rather than duplicated.
//!
//! All operations are serialised by one lock; the work under the lock is
//! a map probe or two after hashing, so hold times are short.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use castor_common::error::{CastorError, CastorResult};
use castor_common::hash::ContentHash;
use castor_common::types::PageId;
use castor_common::KeyCodec;

use crate::page::Page;

/// Storage usage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of unique content blobs.
    pub unique_blobs: usize,
    /// Number of page IDs with a current mapping.
    pub assigned_ids: usize,
    /// Next page ID to be allocated.
    pub next_page_id: u16,
    /// Total keys across all unique blobs.
    pub total_keys: usize,
    /// Total leaf data bytes across all unique blobs.
    pub total_data_bytes: usize,
    /// Number of dedup hits observed.
    pub dedup_hits: u64,
}

struct CasInner<K> {
    content_map: HashMap<ContentHash, Arc<Page<K>>>,
    page_to_hash: HashMap<PageId, ContentHash>,
    next_page_id: u16,
    dedup_hits: u64,
}

/// The content-addressed page store.
///
/// A stored page with a valid `page_id` keeps that logical identity: its
/// `page_to_hash` entry is repointed at the new content (the superseded
/// hash simply becomes unreachable). A stored page without an ID is
/// allocated one, unless its content already exists, in which case the
/// existing ID is returned (a dedup hit).
pub struct ContentStore<K> {
    inner: Mutex<CasInner<K>>,
}

impl<K: KeyCodec> ContentStore<K> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CasInner {
                content_map: HashMap::new(),
                page_to_hash: HashMap::new(),
                next_page_id: PageId::FIRST.as_u16(),
                dedup_hits: 0,
            }),
        }
    }

    /// Stores a page and returns the page ID that now resolves to it.
    ///
    /// # Errors
    ///
    /// Returns `PageIdExhausted` when the 16-bit ID space runs out.
    pub fn store(&self, page: &Page<K>) -> CastorResult<PageId> {
        let mut stored = page.clone();
        stored.update_hashes();
        let hash = stored.header.content_hash;

        let mut inner = self.inner.lock();

        if stored.header.page_id.is_valid() {
            // Write-back of an existing logical page: repoint its mapping.
            let id = stored.header.page_id;
            if inner.content_map.contains_key(&hash) {
                inner.dedup_hits += 1;
                debug!(page_id = %id, hash = %hash, "dedup hit on write-back");
            } else {
                inner.content_map.insert(hash, Arc::new(stored));
            }
            inner.page_to_hash.insert(id, hash);
            return Ok(id);
        }

        // Fresh page: a known content hash resolves to the existing ID.
        let existing_id = inner.content_map.get(&hash).map(|blob| blob.header.page_id);
        if let Some(id) = existing_id {
            inner.dedup_hits += 1;
            debug!(page_id = %id, hash = %hash, "dedup hit, reusing page id");
            return Ok(id);
        }

        if inner.next_page_id == u16::MAX {
            return Err(CastorError::PageIdExhausted);
        }
        let id = PageId::new(inner.next_page_id);
        inner.next_page_id += 1;

        stored.header.page_id = id;
        inner.page_to_hash.insert(id, hash);
        inner.content_map.insert(hash, Arc::new(stored));
        debug!(page_id = %id, hash = %hash, "stored new content");
        Ok(id)
    }

    /// Retrieves the page currently mapped to `page_id`.
    ///
    /// # Errors
    ///
    /// Returns `PageNotFound` if either mapping step misses.
    pub fn get(&self, page_id: PageId) -> CastorResult<Arc<Page<K>>> {
        let inner = self.inner.lock();
        let hash = inner
            .page_to_hash
            .get(&page_id)
            .ok_or(CastorError::PageNotFound { page_id })?;
        inner
            .content_map
            .get(hash)
            .cloned()
            .ok_or(CastorError::PageNotFound { page_id })
    }

    /// Returns true if a blob with this page's content already exists.
    #[must_use]
    pub fn has_content(&self, page: &Page<K>) -> bool {
        let hash = page.compute_content_hash();
        self.inner.lock().content_map.contains_key(&hash)
    }

    /// Returns the page ID for existing content, if any.
    #[must_use]
    pub fn id_for_content(&self, page: &Page<K>) -> Option<PageId> {
        let hash = page.compute_content_hash();
        self.inner
            .lock()
            .content_map
            .get(&hash)
            .map(|blob| blob.header.page_id)
    }

    /// Returns true if `page_id` has a current mapping.
    #[must_use]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_to_hash.contains_key(&page_id)
    }

    /// Returns the next page ID that will be allocated.
    #[must_use]
    pub fn next_page_id(&self) -> PageId {
        PageId::new(self.inner.lock().next_page_id)
    }

    /// Advances the allocator to at least `next`; used when restoring
    /// persisted metadata so IDs stay unique across restarts.
    pub fn restore_next_page_id(&self, next: PageId) {
        let mut inner = self.inner.lock();
        if next.as_u16() > inner.next_page_id {
            inner.next_page_id = next.as_u16();
        }
    }

    /// Returns storage statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        let mut total_keys = 0;
        let mut total_data_bytes = 0;
        for blob in inner.content_map.values() {
            total_keys += blob.keys.len();
            total_data_bytes += blob.data.len();
        }
        StoreStats {
            unique_blobs: inner.content_map.len(),
            assigned_ids: inner.page_to_hash.len(),
            next_page_id: inner.next_page_id,
            total_keys,
            total_data_bytes,
            dedup_hits: inner.dedup_hits,
        }
    }
}

impl<K: KeyCodec> Default for ContentStore<K> {
    fn default() -> Self {
        Self::new()
    }
}
