//! The checkpoint manager.
//!
//! A checkpoint flushes every dirty cache page to the content store,
//! appends a CHECKPOINT record, and fsyncs the WAL. Afterwards the log
//! prefix below the checkpoint (minus a safety margin) can be truncated
//! by the recurring cleanup job.
//!
//! Triggers: elapsed time since the last checkpoint, WAL size, or dirty
//! page count. The recurring "checkpoint" job polls the triggers; the
//! recurring "wal-cleanup" job prunes the log.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

use castor_cache::PageCache;
use castor_common::config::CheckpointConfig;
use castor_common::error::CastorResult;
use castor_common::types::{JobId, Lsn};
use castor_common::KeyCodec;
use castor_jobs::{JobPriority, JobScheduler};
use castor_wal::Wal;

/// Checkpoint activity statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Checkpoints completed.
    pub completed: u64,
    /// Checkpoints that failed.
    pub failed: u64,
    /// LSN of the last completed checkpoint.
    pub last_checkpoint_lsn: Lsn,
    /// Age of the last completed checkpoint, if any.
    pub last_checkpoint_age: Option<Duration>,
}

/// Coordinates periodic checkpoints and WAL truncation.
pub struct CheckpointManager<K: KeyCodec> {
    cache: Arc<PageCache<K>>,
    wal: Arc<Wal<K>>,
    config: CheckpointConfig,
    started_at: Instant,
    last_checkpoint_at: Mutex<Option<Instant>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl<K: KeyCodec> CheckpointManager<K> {
    /// Creates a manager over the given cache and WAL.
    #[must_use]
    pub fn new(
        cache: Arc<PageCache<K>>,
        wal: Arc<Wal<K>>,
        config: CheckpointConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            wal,
            config,
            started_at: Instant::now(),
            last_checkpoint_at: Mutex::new(None),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Registers the recurring checkpoint and cleanup jobs.
    pub fn register(self: &Arc<Self>, scheduler: &JobScheduler) {
        let this = Arc::clone(self);
        scheduler.add_recurring(
            "checkpoint",
            self.config.poll_interval,
            Arc::new(move |_cancel: &AtomicBool| this.checkpoint_if_needed()),
            "periodic checkpoint",
            JobPriority::High,
        );

        let this = Arc::clone(self);
        scheduler.add_recurring(
            "wal-cleanup",
            self.config.cleanup_interval,
            Arc::new(move |_cancel: &AtomicBool| this.cleanup()),
            "WAL truncation behind the last checkpoint",
            JobPriority::Low,
        );
    }

    /// Submits an immediate checkpoint job through the scheduler and
    /// returns its handle.
    pub fn schedule_now(self: &Arc<Self>, scheduler: &JobScheduler) -> JobId {
        let this = Arc::clone(self);
        scheduler
            .schedule_checkpoint(Box::new(move |_cancel: &AtomicBool| this.perform().is_ok()))
    }

    /// Performs a checkpoint: flush dirty pages, write the CHECKPOINT
    /// record, fsync. Idempotent when nothing is dirty.
    ///
    /// # Errors
    ///
    /// Propagates flush or WAL failures (counted in `failed`).
    pub fn perform(&self) -> CastorResult<Lsn> {
        let result = self.perform_inner();
        match &result {
            Ok(lsn) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                *self.last_checkpoint_at.lock() = Some(Instant::now());
                info!(lsn = %lsn, "checkpoint completed");
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "checkpoint failed");
            }
        }
        result
    }

    fn perform_inner(&self) -> CastorResult<Lsn> {
        let flushed = self.cache.flush_all()?;
        let lsn = self.wal.write_checkpoint()?;
        info!(flushed, lsn = %lsn, "flushed dirty pages for checkpoint");
        Ok(lsn)
    }

    /// Returns true when any trigger condition holds.
    #[must_use]
    pub fn should_checkpoint(&self) -> bool {
        let last = self.last_checkpoint_at.lock().unwrap_or(self.started_at);
        if last.elapsed() >= self.config.interval {
            return true;
        }
        if self.wal.size().unwrap_or(0) >= self.config.wal_size_threshold {
            return true;
        }
        self.cache.dirty_count() >= self.config.dirty_page_threshold
    }

    /// Job body: checkpoint when a trigger fires. Returns false only on
    /// a failed checkpoint.
    pub fn checkpoint_if_needed(&self) -> bool {
        if self.should_checkpoint() {
            self.perform().is_ok()
        } else {
            true
        }
    }

    /// Job body: truncates the WAL up to the last checkpoint minus the
    /// safety margin.
    pub fn cleanup(&self) -> bool {
        let checkpoint = self.wal.last_checkpoint_lsn();
        if !checkpoint.is_valid() {
            return true;
        }
        let up_to = checkpoint.saturating_sub(self.config.safety_margin);
        if up_to.as_u64() <= Lsn::FIRST.as_u64() {
            return true;
        }
        match self.wal.truncate(up_to) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "WAL cleanup failed");
                false
            }
        }
    }

    /// Takes a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_checkpoint_lsn: self.wal.last_checkpoint_lsn(),
            last_checkpoint_age: self.last_checkpoint_at.lock().map(|at| at.elapsed()),
        }
    }
}
