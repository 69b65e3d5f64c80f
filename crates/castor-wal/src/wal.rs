//! The WAL manager.
//!
//! A single append-only file. Appends coalesce in a small in-memory
//! buffer; the buffer is flushed when it reaches its threshold and forced
//! to disk (fsync) on commit and on checkpoint. LSNs are allocated one
//! per record under the append lock, so file order equals LSN order.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use castor_common::config::WalConfig;
use castor_common::error::{CastorError, CastorResult};
use castor_common::types::{Lsn, PageId, TxnId};
use castor_common::KeyCodec;

use crate::record::{DataPayload, RecordType, WalRecord};
use crate::replay::{ReplayHandler, ReplayStats};

/// A point-in-time view of WAL counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStatsSnapshot {
    /// Records appended.
    pub records_appended: u64,
    /// Bytes appended (buffered or written).
    pub bytes_appended: u64,
    /// Buffer flushes to the file.
    pub buffer_flushes: u64,
    /// fsync calls.
    pub syncs: u64,
    /// Checkpoint records written.
    pub checkpoints: u64,
}

#[derive(Debug, Default)]
struct WalStats {
    records_appended: AtomicU64,
    bytes_appended: AtomicU64,
    buffer_flushes: AtomicU64,
    syncs: AtomicU64,
    checkpoints: AtomicU64,
}

struct WalFile {
    file: File,
    buffer: Vec<u8>,
}

/// The write-ahead log manager.
pub struct Wal<K: KeyCodec> {
    path: PathBuf,
    inner: Mutex<WalFile>,
    next_lsn: AtomicU64,
    next_txn_id: AtomicU64,
    last_checkpoint_lsn: AtomicU64,
    buffer_capacity: usize,
    sync_on_commit: bool,
    closed: AtomicBool,
    stats: WalStats,
    _key: PhantomData<K>,
}

/// Everything the tail scan learns from an existing log.
struct TailState {
    max_lsn: Lsn,
    max_txn: TxnId,
    last_checkpoint_lsn: Lsn,
}

impl<K: KeyCodec> Wal<K> {
    /// Opens (or creates) the WAL at `path`, scanning any existing
    /// records to restore the LSN, transaction, and checkpoint counters.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: &WalConfig) -> CastorResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let wal = Self {
            path,
            inner: Mutex::new(WalFile {
                file,
                buffer: Vec::with_capacity(config.buffer_capacity),
            }),
            next_lsn: AtomicU64::new(Lsn::FIRST.as_u64()),
            next_txn_id: AtomicU64::new(TxnId::FIRST.as_u64()),
            last_checkpoint_lsn: AtomicU64::new(Lsn::INVALID.as_u64()),
            buffer_capacity: config.buffer_capacity,
            sync_on_commit: config.sync_on_commit,
            closed: AtomicBool::new(false),
            stats: WalStats::default(),
            _key: PhantomData,
        };

        let tail = wal.scan_tail()?;
        if tail.max_lsn.is_valid() {
            wal.next_lsn
                .store(tail.max_lsn.as_u64() + 1, Ordering::SeqCst);
            wal.next_txn_id
                .store(tail.max_txn.as_u64() + 1, Ordering::SeqCst);
            wal.last_checkpoint_lsn
                .store(tail.last_checkpoint_lsn.as_u64(), Ordering::SeqCst);
            debug!(
                next_lsn = wal.next_lsn.load(Ordering::SeqCst),
                "opened existing WAL"
            );
        }
        Ok(wal)
    }

    /// Returns the WAL file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocates a transaction ID. No record is written.
    pub fn begin_transaction(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Logs an insert.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn log_insert(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        key: &K,
        new_data: &[u8],
    ) -> CastorResult<Lsn> {
        self.append(
            RecordType::Insert,
            txn_id,
            Some(DataPayload {
                page_id,
                key: key.clone(),
                old_data: Vec::new(),
                new_data: new_data.to_vec(),
            }),
        )
    }

    /// Logs a delete, keeping the before image.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn log_delete(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        key: &K,
        old_data: &[u8],
    ) -> CastorResult<Lsn> {
        self.append(
            RecordType::Delete,
            txn_id,
            Some(DataPayload {
                page_id,
                key: key.clone(),
                old_data: old_data.to_vec(),
                new_data: Vec::new(),
            }),
        )
    }

    /// Logs an update with explicit before and after images.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn log_update(
        &self,
        txn_id: TxnId,
        page_id: PageId,
        key: &K,
        old_data: &[u8],
        new_data: &[u8],
    ) -> CastorResult<Lsn> {
        self.append(
            RecordType::Update,
            txn_id,
            Some(DataPayload {
                page_id,
                key: key.clone(),
                old_data: old_data.to_vec(),
                new_data: new_data.to_vec(),
            }),
        )
    }

    /// Commits a transaction. After this returns the transaction's
    /// records are durable.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn commit(&self, txn_id: TxnId) -> CastorResult<Lsn> {
        let lsn = self.append(RecordType::Commit, txn_id, None)?;
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;
        if self.sync_on_commit {
            inner.file.sync_data()?;
            self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        }
        Ok(lsn)
    }

    /// Aborts a transaction. No undo is performed and no fsync is
    /// mandated; replay drops the transaction's records.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn abort(&self, txn_id: TxnId) -> CastorResult<Lsn> {
        self.append(RecordType::Abort, txn_id, None)
    }

    /// Writes a CHECKPOINT record and forces it to disk.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error.
    pub fn write_checkpoint(&self) -> CastorResult<Lsn> {
        let lsn = self.append(RecordType::Checkpoint, TxnId::INVALID, None)?;
        {
            let mut inner = self.inner.lock();
            self.flush_locked(&mut inner)?;
            inner.file.sync_data()?;
        }
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        self.stats.checkpoints.fetch_add(1, Ordering::Relaxed);
        self.last_checkpoint_lsn
            .store(lsn.as_u64(), Ordering::SeqCst);
        info!(lsn = %lsn, "checkpoint written");
        Ok(lsn)
    }

    /// Flushes the buffer and fsyncs the file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on failure.
    pub fn sync(&self) -> CastorResult<()> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;
        inner.file.sync_data()?;
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Prunes the log prefix whose records all have `lsn < up_to`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on failure.
    pub fn truncate(&self, up_to: Lsn) -> CastorResult<()> {
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;

        let bytes = read_file(&mut inner.file)?;
        let (records, _clean) = parse_records::<K>(&bytes);

        let mut kept = Vec::new();
        let mut dropped = 0u64;
        for record in &records {
            if record.lsn() >= up_to {
                kept.extend_from_slice(&record.serialize());
            } else {
                dropped += 1;
            }
        }

        inner.file.set_len(0)?;
        inner.file.write_all(&kept)?;
        inner.file.sync_data()?;
        debug!(up_to = %up_to, dropped, "truncated WAL prefix");
        Ok(())
    }

    /// Replays the log through `handler`.
    ///
    /// Pass 1 scans for COMMIT records; pass 2 re-applies the data
    /// records of committed transactions with `lsn >= from_lsn`. A
    /// corrupt or torn record terminates the scan cleanly.
    ///
    /// # Errors
    ///
    /// Returns an I/O error reading the log, or the first handler error.
    pub fn replay(
        &self,
        from_lsn: Lsn,
        handler: &mut dyn ReplayHandler<K>,
    ) -> CastorResult<ReplayStats> {
        let bytes = {
            let mut inner = self.inner.lock();
            self.flush_locked(&mut inner)?;
            read_file(&mut inner.file)?
        };

        let (records, clean) = parse_records::<K>(&bytes);
        if !clean {
            warn!("replay stopped at a corrupt record; trailing log ignored");
        }

        let mut committed: HashSet<TxnId> = HashSet::new();
        let mut aborted: HashSet<TxnId> = HashSet::new();
        let mut stats = ReplayStats {
            stopped_at_corruption: !clean,
            ..Default::default()
        };

        for record in &records {
            stats.records_scanned += 1;
            stats.last_lsn = stats.last_lsn.max(record.lsn());
            match record.record_type() {
                RecordType::Commit => {
                    committed.insert(record.txn_id());
                }
                RecordType::Abort => {
                    aborted.insert(record.txn_id());
                }
                _ => {}
            }
        }
        stats.committed_txns = committed.len() as u64;
        stats.aborted_txns = aborted.len() as u64;

        for record in &records {
            if record.lsn() < from_lsn || !committed.contains(&record.txn_id()) {
                continue;
            }
            let Some(payload) = &record.payload else {
                continue;
            };
            match record.record_type() {
                RecordType::Insert => {
                    handler.on_insert(payload.page_id, &payload.key, &payload.new_data)?;
                }
                RecordType::Delete => {
                    handler.on_delete(payload.page_id, &payload.key)?;
                }
                RecordType::Update => {
                    handler.on_update(
                        payload.page_id,
                        &payload.key,
                        &payload.old_data,
                        &payload.new_data,
                    )?;
                }
                _ => {}
            }
            stats.records_applied += 1;
        }

        info!(
            scanned = stats.records_scanned,
            applied = stats.records_applied,
            committed = stats.committed_txns,
            "WAL replay finished"
        );
        Ok(stats)
    }

    /// Current log size in bytes, buffered appends included.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file metadata cannot be read.
    pub fn size(&self) -> CastorResult<u64> {
        let inner = self.inner.lock();
        Ok(inner.file.metadata()?.len() + inner.buffer.len() as u64)
    }

    /// The next LSN that will be assigned.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        Lsn::new(self.next_lsn.load(Ordering::SeqCst))
    }

    /// LSN of the most recent checkpoint, or `Lsn::INVALID`.
    #[must_use]
    pub fn last_checkpoint_lsn(&self) -> Lsn {
        Lsn::new(self.last_checkpoint_lsn.load(Ordering::SeqCst))
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> WalStatsSnapshot {
        WalStatsSnapshot {
            records_appended: self.stats.records_appended.load(Ordering::Relaxed),
            bytes_appended: self.stats.bytes_appended.load(Ordering::Relaxed),
            buffer_flushes: self.stats.buffer_flushes.load(Ordering::Relaxed),
            syncs: self.stats.syncs.load(Ordering::Relaxed),
            checkpoints: self.stats.checkpoints.load(Ordering::Relaxed),
        }
    }

    /// Flushes, syncs, and marks the WAL closed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on the final flush.
    pub fn close(&self) -> CastorResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> CastorResult<()> {
        if self.is_closed() {
            Err(CastorError::Closed { component: "WAL" })
        } else {
            Ok(())
        }
    }

    /// Serialises and buffers one record, allocating its LSN under the
    /// lock so file order matches LSN order.
    fn append(
        &self,
        record_type: RecordType,
        txn_id: TxnId,
        payload: Option<DataPayload<K>>,
    ) -> CastorResult<Lsn> {
        self.check_closed()?;

        let mut inner = self.inner.lock();
        let lsn = Lsn::new(self.next_lsn.fetch_add(1, Ordering::SeqCst));
        let record = WalRecord::new(record_type, txn_id, lsn, now_millis(), payload);
        let bytes = record.serialize();

        inner.buffer.extend_from_slice(&bytes);
        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_appended
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        if inner.buffer.len() >= self.buffer_capacity {
            self.flush_locked(&mut inner)?;
        }
        Ok(lsn)
    }

    fn flush_locked(&self, inner: &mut WalFile) -> CastorResult<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        inner.file.write_all(&inner.buffer)?;
        inner.buffer.clear();
        self.stats.buffer_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Scans the whole log to restore counters at open time.
    fn scan_tail(&self) -> CastorResult<TailState> {
        let bytes = {
            let mut inner = self.inner.lock();
            read_file(&mut inner.file)?
        };
        let (records, clean) = parse_records::<K>(&bytes);
        if !clean {
            warn!(path = %self.path.display(), "WAL has a corrupt tail; it will be ignored");
        }

        let mut state = TailState {
            max_lsn: Lsn::INVALID,
            max_txn: TxnId::INVALID,
            last_checkpoint_lsn: Lsn::INVALID,
        };
        for record in &records {
            state.max_lsn = state.max_lsn.max(record.lsn());
            state.max_txn = state.max_txn.max(record.txn_id());
            if record.record_type() == RecordType::Checkpoint {
                state.last_checkpoint_lsn = record.lsn();
            }
        }
        Ok(state)
    }
}

/// Reads the whole file from the start. The cursor is shared with the
/// append path, but the file is in append mode so writes are unaffected.
fn read_file(file: &mut File) -> CastorResult<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Parses records until the end of the buffer or the first corrupt
/// record. Returns the records and whether the scan ended cleanly.
fn parse_records<K: KeyCodec>(bytes: &[u8]) -> (Vec<WalRecord<K>>, bool) {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        match WalRecord::<K>::deserialize(&bytes[offset..]) {
            Ok((record, consumed)) => {
                records.push(record);
                offset += consumed;
            }
            Err(e) => {
                debug!(offset, error = %e, "stopping WAL scan at corrupt record");
                return (records, false);
            }
        }
    }
    (records, true)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
