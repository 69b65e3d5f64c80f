//! # castor-jobs
//!
//! The background job scheduler.
//!
//! A priority queue of jobs drained by a worker pool, plus a promoter
//! thread that moves due deferred jobs and recurring jobs into the ready
//! queue each tick. Priorities order execution (CRITICAL before HIGH
//! before NORMAL before LOW); ties go to the earliest scheduled job.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod job;
mod scheduler;

pub use job::{JobPriority, JobStatus, JobType};
pub use scheduler::{JobFn, JobScheduler, SchedulerStats};
