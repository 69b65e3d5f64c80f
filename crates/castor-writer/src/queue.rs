//! The bounded writer queue and its worker pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use castor_cache::PageCache;
use castor_common::config::WriterConfig;
use castor_common::types::PageId;
use castor_common::KeyCodec;
use castor_store::{ContentStore, Page};

/// A pending page write.
///
/// Holds an immutable snapshot: copy-on-write mutation upstream
/// guarantees the bytes cannot change while the write is in flight.
#[derive(Debug, Clone)]
pub struct WriteRequest<K> {
    /// Logical page being persisted.
    pub page_id: PageId,
    /// The snapshot to persist.
    pub page: Arc<Page<K>>,
    /// When the request entered the queue.
    pub enqueued_at: Instant,
}

/// Atomic counters for the writer pipeline.
#[derive(Debug, Default)]
pub struct WriterStats {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    pages_written: AtomicU64,
    write_failures: AtomicU64,
    superseded: AtomicU64,
    batches: AtomicU64,
}

/// A point-in-time view of writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStatsSnapshot {
    /// Requests accepted into the queue.
    pub enqueued: u64,
    /// Requests refused because the queue was full.
    pub rejected: u64,
    /// Pages persisted to the content store.
    pub pages_written: u64,
    /// Persist attempts that failed (dirty bit left set).
    pub write_failures: u64,
    /// Snapshots skipped because a newer one replaced them in the cache.
    pub superseded: u64,
    /// Batches processed by workers.
    pub batches: u64,
    /// Requests currently queued.
    pub queue_depth: usize,
}

struct QueueState<K> {
    queue: VecDeque<WriteRequest<K>>,
    in_flight: usize,
}

/// Bounded FIFO of page writes drained by a worker pool.
pub struct WriterQueue<K: KeyCodec> {
    state: Mutex<QueueState<K>>,
    work_available: Condvar,
    queue_empty: Condvar,
    store: Arc<ContentStore<K>>,
    cache: Arc<PageCache<K>>,
    config: WriterConfig,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: WriterStats,
}

impl<K: KeyCodec> WriterQueue<K> {
    /// Creates a stopped queue; call [`start`](Self::start) to spawn the
    /// workers.
    #[must_use]
    pub fn new(
        store: Arc<ContentStore<K>>,
        cache: Arc<PageCache<K>>,
        config: WriterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(config.max_queue_size.min(1024)),
                in_flight: 0,
            }),
            work_available: Condvar::new(),
            queue_empty: Condvar::new(),
            store,
            cache,
            config,
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            stats: WriterStats::default(),
        })
    }

    /// Spawns the worker pool. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.num_workers {
            let this = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("castor-writer-{worker_id}"))
                .spawn(move || this.worker_loop(worker_id))
                .expect("failed to spawn writer worker");
            workers.push(handle);
        }
        debug!(workers = self.config.num_workers, "writer queue started");
    }

    /// Enqueues a page snapshot for persistence.
    ///
    /// Returns false when the queue is at capacity; the caller keeps the
    /// page dirty and retries, flushes, or lets eviction persist it.
    pub fn enqueue(&self, page_id: PageId, page: Arc<Page<K>>) -> bool {
        let mut state = self.state.lock();
        if state.queue.len() >= self.config.max_queue_size {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(page_id = %page_id, "writer queue full, rejecting");
            return false;
        }
        state.queue.push_back(WriteRequest {
            page_id,
            page,
            enqueued_at: Instant::now(),
        });
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.work_available.notify_one();
        true
    }

    /// Blocks until the queue is empty and no batch is in flight.
    pub fn wait_for_empty(&self) {
        let mut state = self.state.lock();
        while !(state.queue.is_empty() && state.in_flight == 0) {
            self.queue_empty.wait(&mut state);
        }
    }

    /// Stops the workers, draining every pending request first.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            // Notify under the state lock so a worker between its
            // running check and its wait cannot miss the wakeup.
            let _state = self.state.lock();
            self.work_available.notify_all();
        }
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("writer queue stopped");
    }

    /// Returns true while workers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Takes a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            pages_written: self.stats.pages_written.load(Ordering::Relaxed),
            write_failures: self.stats.write_failures.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
            batches: self.stats.batches.load(Ordering::Relaxed),
            queue_depth: self.queue_depth(),
        }
    }

    fn worker_loop(&self, worker_id: usize) {
        trace!(worker_id, "writer worker started");
        while let Some(batch) = self.next_batch() {
            self.process_batch(&batch, worker_id);

            let mut state = self.state.lock();
            state.in_flight -= batch.len();
            if state.queue.is_empty() && state.in_flight == 0 {
                self.queue_empty.notify_all();
            }
        }
        trace!(worker_id, "writer worker exiting");
    }

    /// Takes the next batch, or None once stopped and drained.
    fn next_batch(&self) -> Option<Vec<WriteRequest<K>>> {
        let max_batch = self.config.max_batch_size;
        let mut state = self.state.lock();
        loop {
            if !state.queue.is_empty() {
                // Give a short window for the batch to fill.
                if state.queue.len() < max_batch && self.is_running() {
                    let deadline = Instant::now() + self.config.batch_timeout;
                    while state.queue.len() < max_batch && self.is_running() {
                        if self
                            .work_available
                            .wait_until(&mut state, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                }
                let take = state.queue.len().min(max_batch);
                let batch: Vec<WriteRequest<K>> = state.queue.drain(..take).collect();
                state.in_flight += batch.len();
                return Some(batch);
            }

            if !self.is_running() {
                return None;
            }
            self.work_available.wait(&mut state);
        }
    }

    /// Persists a batch. One failing request does not stop the batch;
    /// its dirty bit stays set so eviction or checkpoint retries it.
    ///
    /// A snapshot the cache has already replaced is skipped: the newer
    /// entry is dirty (or was written back on eviction), so persisting
    /// the old bytes would repoint the page backwards. The dirty bit is
    /// likewise only cleared while the written snapshot is still
    /// current.
    fn process_batch(&self, batch: &[WriteRequest<K>], worker_id: usize) {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        trace!(worker_id, batch_size = batch.len(), "processing batch");

        for request in batch {
            if !self.cache.snapshot_is_current(request.page_id, &request.page) {
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                trace!(page_id = %request.page_id, "skipping superseded snapshot");
                continue;
            }
            match self.store.store(&request.page) {
                Ok(_) => {
                    self.cache
                        .clear_dirty_if_current(request.page_id, &request.page);
                    self.stats.pages_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        worker_id,
                        page_id = %request.page_id,
                        error = %e,
                        "page write failed, leaving dirty"
                    );
                }
            }
        }
    }
}

impl<K: KeyCodec> Drop for WriterQueue<K> {
    fn drop(&mut self) {
        // Workers hold Arcs to the queue, so by the time this drops they
        // are already joined; stop() here only covers early exits.
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn leaf_with(keys: &[u32], values: &[u64]) -> Page<u32> {
        let mut page = Page::new_leaf();
        page.keys = keys.to_vec();
        for v in values {
            page.data.extend_from_slice(&v.to_le_bytes());
        }
        page
    }

    struct Fixture {
        store: Arc<ContentStore<u32>>,
        cache: Arc<PageCache<u32>>,
        writer: Arc<WriterQueue<u32>>,
    }

    fn setup(config: WriterConfig) -> Fixture {
        let store = Arc::new(ContentStore::new());
        let cache = Arc::new(PageCache::new(Arc::clone(&store), 64));
        let writer = WriterQueue::new(Arc::clone(&store), Arc::clone(&cache), config);
        Fixture {
            store,
            cache,
            writer,
        }
    }

    /// Puts a dirty page into the cache and returns its id + snapshot.
    fn dirty_page(f: &Fixture, keys: &[u32], values: &[u64]) -> (PageId, Arc<Page<u32>>) {
        let id = f.store.store(&leaf_with(&[1000 + keys[0]], &[0])).unwrap();
        let mut page = leaf_with(keys, values);
        page.header.page_id = id;
        let page = Arc::new(page);
        f.cache.put(id, Arc::clone(&page));
        (id, page)
    }

    #[test]
    fn test_write_clears_dirty() {
        let f = setup(WriterConfig {
            batch_timeout: Duration::from_millis(1),
            ..Default::default()
        });
        f.writer.start();

        let (id, page) = dirty_page(&f, &[1, 2], &[10, 20]);
        assert!(f.writer.enqueue(id, page));
        f.writer.wait_for_empty();

        assert_eq!(f.cache.is_dirty(id), Some(false));
        let loaded = f.store.get(id).unwrap();
        assert_eq!(loaded.keys, vec![1, 2]);
        assert_eq!(f.writer.stats().pages_written, 1);
        f.writer.stop();
    }

    #[test]
    fn test_backpressure_at_capacity() {
        let f = setup(WriterConfig {
            max_queue_size: 2,
            ..Default::default()
        });
        // Workers not started: the queue fills up.

        let (id1, p1) = dirty_page(&f, &[1], &[10]);
        let (id2, p2) = dirty_page(&f, &[2], &[20]);
        let (id3, p3) = dirty_page(&f, &[3], &[30]);

        assert!(f.writer.enqueue(id1, p1));
        assert!(f.writer.enqueue(id2, p2));
        assert!(!f.writer.enqueue(id3, Arc::clone(&p3)));

        // The rejected page keeps its dirty bit.
        assert_eq!(f.cache.is_dirty(id3), Some(true));
        assert_eq!(f.writer.stats().rejected, 1);

        // Draining makes room again.
        f.writer.start();
        f.writer.wait_for_empty();
        assert!(f.writer.enqueue(id3, p3));
        f.writer.wait_for_empty();
        assert_eq!(f.cache.is_dirty(id3), Some(false));
        f.writer.stop();
    }

    #[test]
    fn test_stop_drains_pending_writes() {
        let f = setup(WriterConfig {
            batch_timeout: Duration::from_millis(1),
            ..Default::default()
        });

        let mut ids = Vec::new();
        for i in 0..20u32 {
            let (id, page) = dirty_page(&f, &[i], &[u64::from(i)]);
            assert!(f.writer.enqueue(id, page));
            ids.push(id);
        }

        f.writer.start();
        f.writer.stop();

        assert_eq!(f.writer.queue_depth(), 0);
        for id in ids {
            assert_eq!(f.cache.is_dirty(id), Some(false));
        }
    }

    #[test]
    fn test_superseded_snapshot_is_skipped() {
        let f = setup(WriterConfig {
            batch_timeout: Duration::from_millis(1),
            ..Default::default()
        });

        let (id, old_snapshot) = dirty_page(&f, &[1], &[10]);

        // Replace the cache entry before the worker runs; the queued
        // snapshot is now stale.
        let mut newer = leaf_with(&[1, 2], &[10, 20]);
        newer.header.page_id = id;
        f.cache.put(id, Arc::new(newer));

        assert!(f.writer.enqueue(id, old_snapshot));
        f.writer.start();
        f.writer.wait_for_empty();
        f.writer.stop();

        // The stale snapshot was skipped and the newer content stays
        // dirty until flushed.
        assert_eq!(f.writer.stats().superseded, 1);
        assert_eq!(f.cache.is_dirty(id), Some(true));
        assert_eq!(f.cache.flush_all().unwrap(), 1);
        assert_eq!(f.store.get(id).unwrap().keys, vec![1, 2]);
    }

    #[test]
    fn test_batching_counts() {
        let f = setup(WriterConfig {
            max_batch_size: 5,
            batch_timeout: Duration::from_millis(5),
            num_workers: 1,
            ..Default::default()
        });

        for i in 0..10u32 {
            let (id, page) = dirty_page(&f, &[i], &[u64::from(i)]);
            assert!(f.writer.enqueue(id, page));
        }
        f.writer.start();
        f.writer.wait_for_empty();

        let stats = f.writer.stats();
        assert_eq!(stats.pages_written, 10);
        assert!(stats.batches >= 2);
        f.writer.stop();
    }
}
