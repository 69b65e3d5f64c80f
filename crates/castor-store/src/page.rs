//! The page structure and its canonical serialisation.
//!
//! A page is either a leaf (keys plus a fixed-width value buffer) or an
//! internal node (keys plus child page IDs). The canonical byte image is:
//!
//! ```text
//! header || is_leaf (u8) || key_count (u32 LE) || keys
//!        || children (u16 LE each, internal only)
//!        || data (verbatim, leaf only)
//! ```
//!
//! The header carries the page ID, flags, an integrity checksum (SHA-256
//! over `data`) and the content hash (SHA-256 over everything after the
//! header). Deserialisation recomputes both and fails with a corruption
//! error on mismatch.

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};

use castor_common::constants::PAGE_HEADER_SIZE;
use castor_common::error::{CastorError, CastorResult};
use castor_common::hash::{sha256, ContentHash};
use castor_common::types::PageId;
use castor_common::KeyCodec;

bitflags! {
    /// Page header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Page content differs from what the CAS holds.
        const DIRTY = 0b0000_0001;
        /// Page was merged away and is no longer reachable from the root.
        const DELETED = 0b0000_0010;
    }
}

/// Page header metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Stable logical identifier, dense-allocated from 1.
    pub page_id: PageId,
    /// Header flags.
    pub flags: PageFlags,
    /// SHA-256 over the leaf data buffer.
    pub checksum: ContentHash,
    /// SHA-256 over the canonical byte image (everything after the header).
    pub content_hash: ContentHash,
}

impl PageHeader {
    fn new() -> Self {
        Self {
            page_id: PageId::INVALID,
            flags: PageFlags::empty(),
            checksum: ContentHash::ZERO,
            content_hash: ContentHash::ZERO,
        }
    }
}

/// The unit of B+-tree node storage and of content-addressed storage.
///
/// Invariants:
/// - keys are strictly ascending
/// - leaf: `data.len() == keys.len() * value_size`
/// - internal: `children.len() == keys.len() + 1`
#[derive(Debug, Clone)]
pub struct Page<K> {
    /// Header metadata.
    pub header: PageHeader,
    /// Whether this page is a leaf.
    pub is_leaf: bool,
    /// Ordered keys.
    pub keys: Vec<K>,
    /// Child page IDs (internal pages only).
    pub children: Vec<PageId>,
    /// Fixed-width value buffer (leaf pages only).
    pub data: Vec<u8>,
}

impl<K: KeyCodec> Page<K> {
    /// Creates an empty leaf page with no assigned ID.
    #[must_use]
    pub fn new_leaf() -> Self {
        Self {
            header: PageHeader::new(),
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Creates an empty internal page with no assigned ID.
    #[must_use]
    pub fn new_internal() -> Self {
        Self {
            header: PageHeader::new(),
            is_leaf: false,
            keys: Vec::new(),
            children: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Returns the canonical byte image (everything after the header).
    #[must_use]
    pub fn content_image(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(16 + self.data.len());
        buf.put_u8(u8::from(self.is_leaf));
        buf.put_u32_le(self.keys.len() as u32);
        for key in &self.keys {
            key.encode(&mut buf);
        }
        if self.is_leaf {
            buf.put_slice(&self.data);
        } else {
            for child in &self.children {
                buf.put_u16_le(child.as_u16());
            }
        }
        buf.to_vec()
    }

    /// Computes the content hash of the canonical byte image.
    #[must_use]
    pub fn compute_content_hash(&self) -> ContentHash {
        sha256(&self.content_image())
    }

    /// Recomputes and stores both header hashes.
    pub fn update_hashes(&mut self) {
        self.header.checksum = sha256(&self.data);
        self.header.content_hash = self.compute_content_hash();
    }

    /// Serialises the page (header plus canonical image).
    ///
    /// The header hashes are recomputed first so the stored digests always
    /// match the image being written.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.content_image();
        let checksum = sha256(&self.data);
        let content_hash = sha256(&body);

        let mut buf = BytesMut::with_capacity(PAGE_HEADER_SIZE + body.len());
        buf.put_u16_le(self.header.page_id.as_u16());
        buf.put_u8(self.header.flags.bits());
        buf.put_slice(checksum.as_bytes());
        buf.put_slice(content_hash.as_bytes());
        buf.put_slice(&body);
        buf.to_vec()
    }

    /// Deserialises a page, verifying checksum and content hash.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if any length prefix exceeds the buffer
    /// or a stored digest does not match the recomputed one.
    pub fn deserialize(bytes: &[u8]) -> CastorResult<Self> {
        if bytes.len() < PAGE_HEADER_SIZE + 5 {
            return Err(CastorError::corruption("page image too short"));
        }

        let mut buf = bytes;
        let page_id = PageId::new(buf.get_u16_le());
        let flags = PageFlags::from_bits_truncate(buf.get_u8());
        let mut checksum = [0u8; 32];
        buf.copy_to_slice(&mut checksum);
        let mut content_hash = [0u8; 32];
        buf.copy_to_slice(&mut content_hash);

        let body = buf;
        let is_leaf = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(CastorError::page_corrupted(
                    page_id,
                    format!("invalid is_leaf byte {other}"),
                ))
            }
        };
        let key_count = buf.get_u32_le() as usize;

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(K::decode(&mut buf).map_err(|e| {
                CastorError::page_corrupted(page_id, format!("key decode failed: {e}"))
            })?);
        }

        let (children, data) = if is_leaf {
            (Vec::new(), buf.to_vec())
        } else {
            let child_count = key_count + 1;
            if buf.remaining() < child_count * 2 {
                return Err(CastorError::page_corrupted(
                    page_id,
                    "child list exceeds buffer",
                ));
            }
            let mut children = Vec::with_capacity(child_count);
            for _ in 0..child_count {
                children.push(PageId::new(buf.get_u16_le()));
            }
            if buf.has_remaining() {
                return Err(CastorError::page_corrupted(
                    page_id,
                    "trailing bytes after child list",
                ));
            }
            (children, Vec::new())
        };

        let stored_content_hash = ContentHash::from_bytes(content_hash);
        let computed_content_hash = sha256(body);
        if stored_content_hash != computed_content_hash {
            return Err(CastorError::page_corrupted(
                page_id,
                "content hash mismatch",
            ));
        }

        let stored_checksum = ContentHash::from_bytes(checksum);
        if stored_checksum != sha256(&data) {
            return Err(CastorError::page_corrupted(page_id, "checksum mismatch"));
        }

        Ok(Self {
            header: PageHeader {
                page_id,
                flags,
                checksum: stored_checksum,
                content_hash: stored_content_hash,
            },
            is_leaf,
            keys,
            children,
            data,
        })
    }

    /// Returns the value bytes at leaf slot `idx`.
    #[must_use]
    pub fn leaf_slot(&self, idx: usize, value_size: usize) -> &[u8] {
        let start = idx * value_size;
        &self.data[start..start + value_size]
    }

    /// Inserts value bytes at leaf slot `idx`, shifting later slots.
    pub fn leaf_insert_slot(&mut self, idx: usize, value: &[u8]) {
        let pos = idx * value.len();
        self.data.splice(pos..pos, value.iter().copied());
    }

    /// Overwrites the value bytes at leaf slot `idx`.
    pub fn leaf_overwrite_slot(&mut self, idx: usize, value: &[u8]) {
        let pos = idx * value.len();
        self.data[pos..pos + value.len()].copy_from_slice(value);
    }

    /// Removes the value bytes at leaf slot `idx`, shifting later slots.
    pub fn leaf_remove_slot(&mut self, idx: usize, value_size: usize) {
        let pos = idx * value_size;
        self.data.drain(pos..pos + value_size);
    }

    /// Checks structural invariants; used by tests and debugging.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check_invariants(&self, value_size: usize) -> Result<(), String> {
        for pair in self.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(format!(
                    "keys not strictly ascending: {:?} then {:?}",
                    pair[0], pair[1]
                ));
            }
        }
        if self.is_leaf {
            if !self.children.is_empty() {
                return Err("leaf page has children".to_string());
            }
            if self.data.len() != self.keys.len() * value_size {
                return Err(format!(
                    "leaf data length {} != {} keys * {} bytes",
                    self.data.len(),
                    self.keys.len(),
                    value_size
                ));
            }
        } else {
            if !self.data.is_empty() {
                return Err("internal page has data".to_string());
            }
            if self.children.len() != self.keys.len() + 1 {
                return Err(format!(
                    "internal page has {} children for {} keys",
                    self.children.len(),
                    self.keys.len()
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_leaf() -> Page<u32> {
        let mut page = Page::new_leaf();
        page.keys = vec![1, 2, 3];
        page.data = vec![0u8; 24];
        page.data[0..8].copy_from_slice(&10u64.to_le_bytes());
        page.data[8..16].copy_from_slice(&20u64.to_le_bytes());
        page.data[16..24].copy_from_slice(&30u64.to_le_bytes());
        page.header.page_id = PageId::new(7);
        page.update_hashes();
        page
    }

    fn sample_internal() -> Page<u32> {
        let mut page = Page::new_internal();
        page.keys = vec![5, 9];
        page.children = vec![PageId::new(1), PageId::new(2), PageId::new(3)];
        page.header.page_id = PageId::new(4);
        page.update_hashes();
        page
    }

    #[test]
    fn test_leaf_roundtrip() {
        let page = sample_leaf();
        let bytes = page.serialize();
        let decoded = Page::<u32>::deserialize(&bytes).unwrap();

        assert_eq!(decoded.header.page_id, page.header.page_id);
        assert!(decoded.is_leaf);
        assert_eq!(decoded.keys, page.keys);
        assert_eq!(decoded.data, page.data);
        assert_eq!(decoded.header.content_hash, page.header.content_hash);
    }

    #[test]
    fn test_internal_roundtrip() {
        let page = sample_internal();
        let bytes = page.serialize();
        let decoded = Page::<u32>::deserialize(&bytes).unwrap();

        assert!(!decoded.is_leaf);
        assert_eq!(decoded.keys, page.keys);
        assert_eq!(decoded.children, page.children);
    }

    #[test]
    fn test_corrupt_body_detected() {
        let page = sample_leaf();
        let mut bytes = page.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let err = Page::<u32>::deserialize(&bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_truncated_image_detected() {
        let page = sample_internal();
        let bytes = page.serialize();
        let err = Page::<u32>::deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_content_hash_ignores_page_id() {
        // Two pages with identical content but different IDs share a hash.
        let mut a = sample_leaf();
        let mut b = sample_leaf();
        a.header.page_id = PageId::new(1);
        b.header.page_id = PageId::new(2);
        assert_eq!(a.compute_content_hash(), b.compute_content_hash());
    }

    #[test]
    fn test_content_hash_tracks_content() {
        let a = sample_leaf();
        let mut b = sample_leaf();
        b.keys[0] = 100;
        b.keys.sort_unstable();
        assert_ne!(a.compute_content_hash(), b.compute_content_hash());
    }

    #[test]
    fn test_leaf_slot_ops() {
        let mut page: Page<u32> = Page::new_leaf();
        page.keys = vec![1, 3];
        page.leaf_insert_slot(0, &1u64.to_le_bytes());
        page.leaf_insert_slot(1, &3u64.to_le_bytes());

        page.keys.insert(1, 2);
        page.leaf_insert_slot(1, &2u64.to_le_bytes());
        assert_eq!(page.leaf_slot(1, 8), &2u64.to_le_bytes());
        assert_eq!(page.leaf_slot(2, 8), &3u64.to_le_bytes());

        page.keys.remove(0);
        page.leaf_remove_slot(0, 8);
        assert_eq!(page.leaf_slot(0, 8), &2u64.to_le_bytes());
        assert!(page.check_invariants(8).is_ok());
    }

    #[test]
    fn test_invariant_checks() {
        let mut page = sample_internal();
        assert!(page.check_invariants(8).is_ok());
        page.children.pop();
        assert!(page.check_invariants(8).is_err());
    }
}
