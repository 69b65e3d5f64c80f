//! REDO replay.
//!
//! Replay is logical: the log records operations (insert/delete/update of
//! a key), not physical page diffs, and recovery re-applies them through
//! a handler bundle so the same code can drive the real tree or a test
//! harness. Only transactions whose COMMIT record made it to the log are
//! re-applied; an ABORT (or a missing COMMIT) drops the transaction's
//! records without compensation.

use castor_common::error::CastorResult;
use castor_common::types::{Lsn, PageId};
use castor_common::KeyCodec;

/// Recovery handlers invoked once per re-applied data record.
pub trait ReplayHandler<K: KeyCodec> {
    /// Re-applies an insert.
    fn on_insert(&mut self, page_id: PageId, key: &K, value: &[u8]) -> CastorResult<()>;

    /// Re-applies a delete.
    fn on_delete(&mut self, page_id: PageId, key: &K) -> CastorResult<()>;

    /// Re-applies an update (overwrite of an existing key).
    fn on_update(&mut self, page_id: PageId, key: &K, old: &[u8], new: &[u8])
        -> CastorResult<()>;
}

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records read from the log.
    pub records_scanned: u64,
    /// Data records re-applied through the handler.
    pub records_applied: u64,
    /// Distinct committed transactions observed.
    pub committed_txns: u64,
    /// Distinct aborted transactions observed.
    pub aborted_txns: u64,
    /// Highest LSN observed.
    pub last_lsn: Lsn,
    /// True when the scan ended at a corrupt or torn record rather than
    /// the end of the file.
    pub stopped_at_corruption: bool,
}
