//! The small persisted metadata file.
//!
//! Holds the page ID allocator position and the last checkpoint LSN.
//! Written at close and after checkpoints; absence or corruption is
//! tolerated (recovery replays the full log either way).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use castor_common::error::{CastorError, CastorResult};

/// Persisted engine metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMeta {
    /// Next page ID the allocator should hand out.
    pub next_page_id: u16,
    /// LSN of the last completed checkpoint.
    pub last_checkpoint_lsn: u64,
}

impl EngineMeta {
    /// Loads metadata, returning `None` when the file is missing or
    /// unreadable.
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        let bytes = std::fs::read(path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt metadata file");
                None
            }
        }
    }

    /// Writes metadata to `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on failure.
    pub fn save(&self, path: &Path) -> CastorResult<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| CastorError::internal(format!("metadata serialisation: {e}")))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castor.meta");

        let meta = EngineMeta {
            next_page_id: 42,
            last_checkpoint_lsn: 100,
        };
        meta.save(&path).unwrap();
        assert_eq!(EngineMeta::load(&path), Some(meta));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(EngineMeta::load(&dir.path().join("nope")), None);
    }

    #[test]
    fn test_corrupt_file_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castor.meta");
        std::fs::write(&path, b"not json").unwrap();
        assert_eq!(EngineMeta::load(&path), None);
    }
}
