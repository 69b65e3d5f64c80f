//! The job scheduler: priority queue, worker pool, promoter thread.

use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use castor_common::config::SchedulerConfig;
use castor_common::types::JobId;

use crate::job::{JobPriority, JobStatus, JobType};

/// A job's work function. Returns true on success.
///
/// The argument is the job's cancellation flag. It is raised when the
/// job is cancelled while running or when its timeout elapses; a
/// long-running job is expected to poll it and bail out.
pub type JobFn = Box<dyn Fn(&AtomicBool) -> bool + Send + Sync>;

struct Job {
    id: JobId,
    job_type: JobType,
    priority: JobPriority,
    description: String,
    scheduled_at: Instant,
    timeout: Duration,
    cancel_flag: Arc<AtomicBool>,
    execute: JobFn,
}

/// Heap wrapper ordering by priority, then earliest `scheduled_at`,
/// then lowest ID (for a total order).
struct QueuedJob(Arc<Job>);

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.scheduled_at.cmp(&self.0.scheduled_at))
            .then_with(|| other.0.id.cmp(&self.0.id))
    }
}

struct JobRecord {
    status: JobStatus,
    finished_at: Option<Instant>,
    cancel_flag: Arc<AtomicBool>,
}

struct RecurringJob {
    interval: Duration,
    next_run: Instant,
    priority: JobPriority,
    description: String,
    enabled: bool,
    func: Arc<dyn Fn(&AtomicBool) -> bool + Send + Sync>,
}

struct SchedulerState {
    ready: BinaryHeap<QueuedJob>,
    deferred: Vec<Arc<Job>>,
}

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Scheduler health and throughput statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerStats {
    /// Jobs waiting in the ready queue or deferred list.
    pub pending_jobs: usize,
    /// Jobs currently running on workers.
    pub active_jobs: usize,
    /// Jobs executed in total.
    pub total_executed: u64,
    /// Jobs that succeeded.
    pub successful: u64,
    /// Jobs that failed (returned false, panicked, or timed out).
    pub failed: u64,
    /// Jobs cancelled before execution.
    pub cancelled: u64,
    /// successful / total_executed; 1.0 when nothing ran yet.
    pub success_rate: f64,
    /// Worker thread count.
    pub worker_threads: usize,
    /// Whether the success rate clears the health bar.
    pub is_healthy: bool,
}

/// Minimum success rate for [`JobScheduler::is_healthy`].
const HEALTHY_SUCCESS_RATE: f64 = 0.9998;

/// Priority job scheduler with a worker pool and recurring jobs.
pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    work_available: Condvar,
    tick: Condvar,
    records: Mutex<HashMap<JobId, JobRecord>>,
    recurring: Mutex<HashMap<String, RecurringJob>>,
    next_job_id: AtomicU64,
    running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
    config: SchedulerConfig,
}

impl JobScheduler {
    /// Creates a stopped scheduler; call [`start`](Self::start) to spawn
    /// its threads.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                ready: BinaryHeap::new(),
                deferred: Vec::new(),
            }),
            work_available: Condvar::new(),
            tick: Condvar::new(),
            records: Mutex::new(HashMap::new()),
            recurring: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
            counters: Counters::default(),
            config,
        })
    }

    /// Spawns the worker pool and the promoter thread. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut threads = self.threads.lock();
        for worker_id in 0..self.config.num_workers {
            let this = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("castor-jobs-{worker_id}"))
                .spawn(move || this.worker_loop(worker_id))
                .expect("failed to spawn scheduler worker");
            threads.push(handle);
        }
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("castor-jobs-promoter".to_string())
            .spawn(move || this.promoter_loop())
            .expect("failed to spawn promoter thread");
        threads.push(handle);
        debug!(workers = self.config.num_workers, "job scheduler started");
    }

    /// Stops all threads. Pending jobs stay pending.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            // Notify under the state lock so a thread between its
            // running check and its wait cannot miss the wakeup.
            let _state = self.state.lock();
            self.work_available.notify_all();
            self.tick.notify_all();
        }
        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!("job scheduler stopped");
    }

    /// Returns true while the scheduler threads run.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Schedules a job.
    pub fn schedule(
        &self,
        job_type: JobType,
        priority: JobPriority,
        execute: JobFn,
        description: impl Into<String>,
        delay: Duration,
        timeout: Duration,
    ) -> JobId {
        let job = self.make_job(job_type, priority, execute, description.into(), delay, timeout);
        let id = job.id;
        {
            let mut state = self.state.lock();
            if delay.is_zero() {
                state.ready.push(QueuedJob(job));
            } else {
                state.deferred.push(job);
            }
        }
        if delay.is_zero() {
            self.work_available.notify_one();
        }
        id
    }

    /// Schedules a checkpoint job at HIGH priority.
    pub fn schedule_checkpoint(&self, execute: JobFn) -> JobId {
        self.schedule(
            JobType::Checkpoint,
            JobPriority::High,
            execute,
            "checkpoint",
            Duration::ZERO,
            self.config.default_timeout,
        )
    }

    /// Schedules a version-prune job at LOW priority.
    pub fn schedule_version_prune(&self, execute: JobFn) -> JobId {
        self.schedule(
            JobType::VersionPrune,
            JobPriority::Low,
            execute,
            "version prune",
            Duration::ZERO,
            self.config.default_timeout,
        )
    }

    /// Registers a named recurring job. Returns false if the name is
    /// taken.
    pub fn add_recurring(
        &self,
        name: impl Into<String>,
        interval: Duration,
        func: Arc<dyn Fn(&AtomicBool) -> bool + Send + Sync>,
        description: impl Into<String>,
        priority: JobPriority,
    ) -> bool {
        let name = name.into();
        let mut recurring = self.recurring.lock();
        if recurring.contains_key(&name) {
            return false;
        }
        recurring.insert(
            name,
            RecurringJob {
                interval,
                next_run: Instant::now() + interval,
                priority,
                description: description.into(),
                enabled: true,
                func,
            },
        );
        true
    }

    /// Removes a recurring job. Returns false if the name is unknown.
    pub fn remove_recurring(&self, name: &str) -> bool {
        self.recurring.lock().remove(name).is_some()
    }

    /// Enables or disables a recurring job. Returns false if unknown.
    pub fn set_recurring_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.recurring.lock().get_mut(name) {
            Some(rec) => {
                rec.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Cancels a job. A pending job is dropped before it runs; a running
    /// job has its cancellation flag raised for it to observe. Finished
    /// jobs are not touched.
    pub fn cancel(&self, job_id: JobId) -> bool {
        let mut records = self.records.lock();
        match records.get_mut(&job_id) {
            Some(record) if record.status == JobStatus::Pending => {
                record.status = JobStatus::Cancelled;
                record.finished_at = Some(Instant::now());
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                true
            }
            Some(record) if record.status == JobStatus::Running => {
                record.cancel_flag.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Returns a job's status.
    #[must_use]
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.records.lock().get(&job_id).map(|r| r.status)
    }

    /// Success rate at or above 99.98% (vacuously healthy when idle).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let executed = self.counters.executed.load(Ordering::Relaxed);
        if executed == 0 {
            return true;
        }
        let succeeded = self.counters.succeeded.load(Ordering::Relaxed);
        succeeded as f64 / executed as f64 >= HEALTHY_SUCCESS_RATE
    }

    /// Takes a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let pending = {
            let state = self.state.lock();
            state.ready.len() + state.deferred.len()
        };
        let active = self
            .records
            .lock()
            .values()
            .filter(|r| r.status == JobStatus::Running)
            .count();
        let executed = self.counters.executed.load(Ordering::Relaxed);
        let succeeded = self.counters.succeeded.load(Ordering::Relaxed);
        let success_rate = if executed == 0 {
            1.0
        } else {
            succeeded as f64 / executed as f64
        };
        SchedulerStats {
            pending_jobs: pending,
            active_jobs: active,
            total_executed: executed,
            successful: succeeded,
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            success_rate,
            worker_threads: self.config.num_workers,
            is_healthy: self.is_healthy(),
        }
    }

    /// Drops records of terminal jobs older than `max_age`.
    pub fn cleanup_completed(&self, max_age: Duration) {
        let now = Instant::now();
        self.records.lock().retain(|_, record| {
            !(record.status.is_terminal()
                && record
                    .finished_at
                    .is_some_and(|at| now.duration_since(at) > max_age))
        });
    }

    fn make_job(
        &self,
        job_type: JobType,
        priority: JobPriority,
        execute: JobFn,
        description: String,
        delay: Duration,
        timeout: Duration,
    ) -> Arc<Job> {
        let id = JobId::new(self.next_job_id.fetch_add(1, Ordering::SeqCst));
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.records.lock().insert(
            id,
            JobRecord {
                status: JobStatus::Pending,
                finished_at: None,
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );
        Arc::new(Job {
            id,
            job_type,
            priority,
            description,
            scheduled_at: Instant::now() + delay,
            timeout,
            cancel_flag,
            execute,
        })
    }

    fn worker_loop(&self, worker_id: usize) {
        trace!(worker_id, "scheduler worker started");
        loop {
            let job = {
                let mut state = self.state.lock();
                loop {
                    if !self.is_running() {
                        return;
                    }
                    if let Some(QueuedJob(job)) = state.ready.pop() {
                        break job;
                    }
                    self.work_available.wait(&mut state);
                }
            };
            self.run_job(&job, worker_id);
        }
    }

    fn run_job(&self, job: &Job, worker_id: usize) {
        {
            let mut records = self.records.lock();
            match records.get_mut(&job.id) {
                Some(record) if record.status == JobStatus::Pending => {
                    record.status = JobStatus::Running;
                }
                // Cancelled (or lost) while queued.
                _ => return,
            }
        }

        trace!(worker_id, job_id = %job.id, job_type = %job.job_type, "running job");
        let start = Instant::now();

        // A watchdog raises the cancellation flag once the timeout
        // elapses; the job is expected to poll the flag and bail out.
        let finished = Arc::new((Mutex::new(false), Condvar::new()));
        let watchdog = {
            let finished = Arc::clone(&finished);
            let flag = Arc::clone(&job.cancel_flag);
            let deadline = start + job.timeout;
            std::thread::spawn(move || {
                let (lock, done_cv) = &*finished;
                let mut done = lock.lock();
                while !*done {
                    if done_cv.wait_until(&mut done, deadline).timed_out() {
                        break;
                    }
                }
                if !*done {
                    flag.store(true, Ordering::Release);
                }
            })
        };

        let result = catch_unwind(AssertUnwindSafe(|| (job.execute)(&job.cancel_flag)));

        {
            let (lock, done_cv) = &*finished;
            *lock.lock() = true;
            done_cv.notify_all();
        }
        let _ = watchdog.join();
        let elapsed = start.elapsed();

        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        let status = match result {
            Ok(true) if elapsed <= job.timeout => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                JobStatus::Completed
            }
            Ok(true) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job.id,
                    description = %job.description,
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_ms = job.timeout.as_millis() as u64,
                    "job exceeded its timeout"
                );
                JobStatus::Failed
            }
            Ok(false) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = %job.id, description = %job.description, "job reported failure");
                JobStatus::Failed
            }
            Err(_) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job_id = %job.id, description = %job.description, "job panicked");
                JobStatus::Failed
            }
        };

        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(&job.id) {
            record.status = status;
            record.finished_at = Some(Instant::now());
        }
    }

    fn promoter_loop(&self) {
        trace!("promoter thread started");
        loop {
            if !self.is_running() {
                return;
            }
            self.promote_due();

            let mut state = self.state.lock();
            if !self.is_running() {
                return;
            }
            let _ = self.tick.wait_for(&mut state, self.config.tick_interval);
        }
    }

    /// Moves due deferred jobs and fires due recurring jobs.
    fn promote_due(&self) {
        let now = Instant::now();
        let mut to_ready: Vec<Arc<Job>> = Vec::new();

        {
            let mut state = self.state.lock();
            let deferred = std::mem::take(&mut state.deferred);
            for job in deferred {
                if job.scheduled_at <= now {
                    to_ready.push(job);
                } else {
                    state.deferred.push(job);
                }
            }
        }

        {
            let mut recurring = self.recurring.lock();
            for (name, rec) in recurring.iter_mut() {
                if rec.enabled && rec.next_run <= now {
                    rec.next_run = now + rec.interval;
                    let func = Arc::clone(&rec.func);
                    let job = self.make_job(
                        JobType::Custom,
                        rec.priority,
                        Box::new(move |cancel: &AtomicBool| func(cancel)),
                        rec.description.clone(),
                        Duration::ZERO,
                        self.config.default_timeout,
                    );
                    trace!(name = %name, "promoted recurring job");
                    to_ready.push(job);
                }
            }
        }

        if !to_ready.is_empty() {
            let mut state = self.state.lock();
            for job in to_ready {
                state.ready.push(QueuedJob(job));
            }
            drop(state);
            self.work_available.notify_all();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SchedulerConfig {
        SchedulerConfig {
            num_workers: 1,
            tick_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_priority_beats_fifo() {
        let scheduler = JobScheduler::new(test_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        // NORMAL first, HIGH second; the single worker must run HIGH
        // before NORMAL.
        let o = Arc::clone(&order);
        let a = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(move |_: &AtomicBool| {
                o.lock().push("A");
                true
            }),
            "job A",
            Duration::ZERO,
            Duration::from_secs(5),
        );
        let o = Arc::clone(&order);
        let b = scheduler.schedule(
            JobType::Custom,
            JobPriority::High,
            Box::new(move |_: &AtomicBool| {
                o.lock().push("B");
                true
            }),
            "job B",
            Duration::ZERO,
            Duration::from_secs(5),
        );

        scheduler.start();
        wait_until(|| {
            scheduler.status(a) == Some(JobStatus::Completed)
                && scheduler.status(b) == Some(JobStatus::Completed)
        });
        scheduler.stop();

        assert_eq!(*order.lock(), vec!["B", "A"]);
    }

    #[test]
    fn test_delayed_job_runs_after_delay() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(move |_: &AtomicBool| {
                flag.store(true, Ordering::SeqCst);
                true
            }),
            "delayed",
            Duration::from_millis(30),
            Duration::from_secs(5),
        );

        assert_eq!(scheduler.status(id), Some(JobStatus::Pending));
        wait_until(|| scheduler.status(id) == Some(JobStatus::Completed));
        assert!(ran.load(Ordering::SeqCst));
        scheduler.stop();
    }

    #[test]
    fn test_failure_and_panic_counted() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        let fail = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(|_: &AtomicBool| false),
            "fails",
            Duration::ZERO,
            Duration::from_secs(5),
        );
        let panic = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(|_: &AtomicBool| panic!("boom")),
            "panics",
            Duration::ZERO,
            Duration::from_secs(5),
        );

        wait_until(|| {
            scheduler.status(fail) == Some(JobStatus::Failed)
                && scheduler.status(panic) == Some(JobStatus::Failed)
        });
        scheduler.stop();

        let stats = scheduler.stats();
        assert_eq!(stats.failed, 2);
        assert!(!stats.is_healthy);
    }

    #[test]
    fn test_cancel_pending_job() {
        let scheduler = JobScheduler::new(test_config());
        // Not started: jobs stay pending.
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(move |_: &AtomicBool| {
                flag.store(true, Ordering::SeqCst);
                true
            }),
            "cancel me",
            Duration::ZERO,
            Duration::from_secs(5),
        );

        assert!(scheduler.cancel(id));
        assert_eq!(scheduler.status(id), Some(JobStatus::Cancelled));
        assert!(!scheduler.cancel(id));

        scheduler.start();
        // Give the worker a chance to (incorrectly) run it.
        std::thread::sleep(Duration::from_millis(30));
        scheduler.stop();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_recurring_job_fires_repeatedly() {
        let scheduler = JobScheduler::new(test_config());
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);

        assert!(scheduler.add_recurring(
            "tick",
            Duration::from_millis(10),
            Arc::new(move |_: &AtomicBool| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }),
            "test tick",
            JobPriority::Normal,
        ));
        // Duplicate names are rejected.
        assert!(!scheduler.add_recurring(
            "tick",
            Duration::from_millis(10),
            Arc::new(|_: &AtomicBool| true),
            "dup",
            JobPriority::Normal,
        ));

        scheduler.start();
        wait_until(|| count.load(Ordering::SeqCst) >= 3);

        assert!(scheduler.set_recurring_enabled("tick", false));
        let frozen = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert!(count.load(Ordering::SeqCst) <= frozen + 1);

        assert!(scheduler.remove_recurring("tick"));
        assert!(!scheduler.remove_recurring("tick"));
        scheduler.stop();
    }

    #[test]
    fn test_timeout_marks_failed() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        // A job that ignores the flag and finishes late is still failed.
        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(|_: &AtomicBool| {
                std::thread::sleep(Duration::from_millis(20));
                true
            }),
            "slow",
            Duration::ZERO,
            Duration::from_millis(1),
        );

        wait_until(|| scheduler.status(id) == Some(JobStatus::Failed));
        scheduler.stop();
    }

    #[test]
    fn test_watchdog_raises_flag_on_timeout() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        // The job polls its cancellation flag and bails out once the
        // watchdog raises it at the timeout.
        let observed = Arc::new(AtomicBool::new(false));
        let saw = Arc::clone(&observed);
        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(move |cancel: &AtomicBool| {
                let give_up = Instant::now() + Duration::from_secs(5);
                while !cancel.load(Ordering::Acquire) {
                    if Instant::now() > give_up {
                        return true;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                saw.store(true, Ordering::SeqCst);
                false
            }),
            "polls cancellation",
            Duration::ZERO,
            Duration::from_millis(10),
        );

        wait_until(|| scheduler.status(id) == Some(JobStatus::Failed));
        assert!(observed.load(Ordering::SeqCst));
        scheduler.stop();
    }

    #[test]
    fn test_cancel_signals_running_job() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        let started = Arc::new(AtomicBool::new(false));
        let started_flag = Arc::clone(&started);
        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(move |cancel: &AtomicBool| {
                started_flag.store(true, Ordering::SeqCst);
                while !cancel.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                false
            }),
            "runs until cancelled",
            Duration::ZERO,
            Duration::from_secs(30),
        );

        wait_until(|| started.load(Ordering::SeqCst));
        assert!(scheduler.cancel(id));
        wait_until(|| scheduler.status(id) == Some(JobStatus::Failed));
        scheduler.stop();
    }

    #[test]
    fn test_named_helpers_run_with_their_priorities() {
        let scheduler = JobScheduler::new(test_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        // LOW prune scheduled first, HIGH checkpoint second; the single
        // worker must still run the checkpoint first.
        let o = Arc::clone(&order);
        let prune = scheduler.schedule_version_prune(Box::new(move |_: &AtomicBool| {
            o.lock().push("prune");
            true
        }));
        let o = Arc::clone(&order);
        let checkpoint = scheduler.schedule_checkpoint(Box::new(move |_: &AtomicBool| {
            o.lock().push("checkpoint");
            true
        }));

        scheduler.start();
        wait_until(|| {
            scheduler.status(checkpoint) == Some(JobStatus::Completed)
                && scheduler.status(prune) == Some(JobStatus::Completed)
        });
        scheduler.stop();

        assert_eq!(*order.lock(), vec!["checkpoint", "prune"]);
    }

    #[test]
    fn test_healthy_when_idle() {
        let scheduler = JobScheduler::new(test_config());
        assert!(scheduler.is_healthy());
        assert_eq!(scheduler.stats().success_rate, 1.0);
    }

    #[test]
    fn test_cleanup_completed() {
        let scheduler = JobScheduler::new(test_config());
        scheduler.start();

        let id = scheduler.schedule(
            JobType::Custom,
            JobPriority::Normal,
            Box::new(|_: &AtomicBool| true),
            "quick",
            Duration::ZERO,
            Duration::from_secs(5),
        );
        wait_until(|| scheduler.status(id) == Some(JobStatus::Completed));
        scheduler.stop();

        scheduler.cleanup_completed(Duration::ZERO);
        assert_eq!(scheduler.status(id), None);
    }
}
