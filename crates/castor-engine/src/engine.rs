//! The engine façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use castor_cache::{CacheStatsSnapshot, PageCache};
use castor_common::config::EngineConfig;
use castor_common::constants::META_FILE_NAME;
use castor_common::error::{CastorError, CastorResult};
use castor_common::types::{JobId, Lsn, PageId};
use castor_common::{KeyCodec, ValueCodec};
use castor_jobs::{JobScheduler, SchedulerStats};
use castor_store::{ContentStore, StoreStats};
use castor_tree::{BTree, TreeStats};
use castor_wal::{Wal, WalStatsSnapshot};
use castor_writer::{WriterQueue, WriterStatsSnapshot};

use crate::checkpoint::{CheckpointManager, CheckpointStats};
use crate::meta::EngineMeta;
use crate::recovery::RedoApplier;

/// Aggregated engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Content store usage.
    pub store: StoreStats,
    /// Cache counters.
    pub cache: CacheStatsSnapshot,
    /// Pages currently cached.
    pub cached_pages: usize,
    /// Pages currently dirty.
    pub dirty_pages: usize,
    /// Writer pipeline counters.
    pub writer: WriterStatsSnapshot,
    /// WAL counters.
    pub wal: WalStatsSnapshot,
    /// WAL size in bytes.
    pub wal_size: u64,
    /// Next LSN to be assigned.
    pub next_lsn: Lsn,
    /// LSN of the last checkpoint.
    pub last_checkpoint_lsn: Lsn,
    /// Scheduler health.
    pub scheduler: SchedulerStats,
    /// Checkpoint activity.
    pub checkpoints: CheckpointStats,
    /// Tree shape.
    pub tree: TreeStats,
}

/// The CastorDB storage engine.
///
/// Mutations are serialised through an exclusive tree lock (the engine is
/// a single-writer design); lookups take the shared side. Each mutating
/// call runs in its own transaction: the operation is logged, the tree is
/// mutated copy-on-write, and the transaction commits with an fsync.
///
/// Lock acquisition order across components is tree, then WAL, then
/// cache, then writer queue, then content store; no component takes a
/// lock that precedes its own in that order.
pub struct Engine<K: KeyCodec, V: ValueCodec> {
    config: EngineConfig,
    store: Arc<ContentStore<K>>,
    cache: Arc<PageCache<K>>,
    writer: Arc<WriterQueue<K>>,
    wal: Arc<Wal<K>>,
    tree: RwLock<BTree<K, V>>,
    scheduler: Arc<JobScheduler>,
    checkpoints: Arc<CheckpointManager<K>>,
    closed: AtomicBool,
}

impl<K: KeyCodec, V: ValueCodec> Engine<K, V> {
    /// Opens the engine: wires the components, replays the WAL to
    /// rebuild the tree, and starts the background threads.
    ///
    /// # Errors
    ///
    /// Returns configuration, I/O, or replay failures.
    pub fn open(config: EngineConfig) -> CastorResult<Self> {
        config.validate().map_err(CastorError::invalid_config)?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(ContentStore::new());
        let cache = Arc::new(PageCache::new(
            Arc::clone(&store),
            config.cache.max_cache_size,
        ));
        let writer = WriterQueue::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.writer.clone(),
        );
        let wal = Arc::new(Wal::open(config.wal_path(), &config.wal)?);

        if let Some(meta) = EngineMeta::load(&config.data_dir.join(META_FILE_NAME)) {
            store.restore_next_page_id(PageId::new(meta.next_page_id));
            debug!(next_page_id = meta.next_page_id, "restored metadata");
        }

        writer.start();

        let mut tree = BTree::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&writer),
            config.max_keys_per_node,
        )?;

        // Blobs are memory-resident, so recovery is a full logical REDO.
        let mut applier = RedoApplier::new(&mut tree);
        let replay = wal.replay(Lsn::INVALID, &mut applier)?;
        if replay.records_scanned > 0 {
            info!(
                applied = replay.records_applied,
                committed = replay.committed_txns,
                "recovered tree from WAL"
            );
        }

        let scheduler = JobScheduler::new(config.scheduler.clone());
        scheduler.start();

        let checkpoints = CheckpointManager::new(
            Arc::clone(&cache),
            Arc::clone(&wal),
            config.checkpoint.clone(),
        );
        checkpoints.register(&scheduler);

        Ok(Self {
            config,
            store,
            cache,
            writer,
            wal,
            tree: RwLock::new(tree),
            scheduler,
            checkpoints,
            closed: AtomicBool::new(false),
        })
    }

    /// Inserts a key-value pair; an existing key is overwritten.
    ///
    /// # Errors
    ///
    /// Returns WAL or storage failures. A failed mutation aborts its
    /// transaction.
    pub fn insert(&self, key: K, value: V) -> CastorResult<()> {
        self.check_closed()?;
        let mut tree = self.tree.write();

        let txn = self.wal.begin_transaction();
        let page_id = tree.locate_leaf(&key)?;
        let existing = tree.search(&key)?;
        let new_bytes = value.to_vec();
        match &existing {
            Some(old) => {
                self.wal
                    .log_update(txn, page_id, &key, &old.to_vec(), &new_bytes)?;
            }
            None => {
                self.wal.log_insert(txn, page_id, &key, &new_bytes)?;
            }
        }

        match tree.insert(key, &value) {
            Ok(()) => {
                self.wal.commit(txn)?;
                Ok(())
            }
            Err(e) => {
                let _ = self.wal.abort(txn);
                Err(e)
            }
        }
    }

    /// Deletes a key. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns WAL or storage failures. A failed mutation aborts its
    /// transaction.
    pub fn delete(&self, key: &K) -> CastorResult<bool> {
        self.check_closed()?;
        let mut tree = self.tree.write();

        let txn = self.wal.begin_transaction();
        let page_id = tree.locate_leaf(key)?;
        let old_bytes = tree
            .search(key)?
            .map(|v| v.to_vec())
            .unwrap_or_default();
        self.wal.log_delete(txn, page_id, key, &old_bytes)?;

        match tree.delete(key) {
            Ok(found) => {
                self.wal.commit(txn)?;
                Ok(found)
            }
            Err(e) => {
                let _ = self.wal.abort(txn);
                Err(e)
            }
        }
    }

    /// Point lookup.
    ///
    /// # Errors
    ///
    /// Returns storage failures; a missing key is `Ok(None)`.
    pub fn search(&self, key: &K) -> CastorResult<Option<V>> {
        self.check_closed()?;
        self.tree.read().search(key)
    }

    /// Drains the writer queue, flushes dirty pages, and syncs the WAL.
    ///
    /// # Errors
    ///
    /// Returns storage or I/O failures.
    pub fn flush(&self) -> CastorResult<()> {
        self.check_closed()?;
        self.writer.wait_for_empty();
        self.cache.flush_all()?;
        self.wal.sync()
    }

    /// Runs a checkpoint now, on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns flush or WAL failures.
    pub fn checkpoint(&self) -> CastorResult<Lsn> {
        self.check_closed()?;
        self.checkpoints.perform()
    }

    /// Submits a checkpoint job through the scheduler and returns its
    /// handle; poll the scheduler for completion.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after shutdown.
    pub fn schedule_checkpoint(&self) -> CastorResult<JobId> {
        self.check_closed()?;
        Ok(self.checkpoints.schedule_now(&self.scheduler))
    }

    /// Renders the tree structure.
    ///
    /// # Errors
    ///
    /// Returns storage failures.
    pub fn dump_tree(&self) -> CastorResult<String> {
        self.check_closed()?;
        self.tree.read().dump()
    }

    /// Collects statistics from every component.
    ///
    /// # Errors
    ///
    /// Returns storage failures while walking the tree.
    pub fn stats(&self) -> CastorResult<EngineStats> {
        let tree_stats = self.tree.read().stats()?;
        Ok(EngineStats {
            store: self.store.stats(),
            cache: self.cache.stats(),
            cached_pages: self.cache.len(),
            dirty_pages: self.cache.dirty_count(),
            writer: self.writer.stats(),
            wal: self.wal.stats(),
            wal_size: self.wal.size()?,
            next_lsn: self.wal.next_lsn(),
            last_checkpoint_lsn: self.wal.last_checkpoint_lsn(),
            scheduler: self.scheduler.stats(),
            checkpoints: self.checkpoints.stats(),
            tree: tree_stats,
        })
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the job scheduler (for collaborators scheduling their own
    /// maintenance).
    #[must_use]
    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Graceful shutdown: stop background work, drain the writer, flush
    /// the cache, take a final checkpoint, and persist metadata.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the engine is marked closed regardless.
    pub fn close(&self) -> CastorResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("shutting down engine");
        self.scheduler.stop();
        self.writer.stop();
        self.cache.flush_all()?;
        self.wal.write_checkpoint()?;

        let meta = EngineMeta {
            next_page_id: self.store.next_page_id().as_u16(),
            last_checkpoint_lsn: self.wal.last_checkpoint_lsn().as_u64(),
        };
        meta.save(&self.config.data_dir.join(META_FILE_NAME))?;
        self.wal.close()
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_closed(&self) -> CastorResult<()> {
        if self.is_closed() {
            Err(CastorError::Closed { component: "engine" })
        } else {
            Ok(())
        }
    }
}

impl<K: KeyCodec, V: ValueCodec> Drop for Engine<K, V> {
    fn drop(&mut self) {
        // Stop the background threads, but do not flush or checkpoint:
        // durability comes from the WAL, and tests rely on a plain drop
        // behaving like a crash.
        if !self.is_closed() {
            self.scheduler.stop();
            self.writer.stop();
        }
    }
}
