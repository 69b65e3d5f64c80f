//! Job descriptors.

use std::fmt;

/// What kind of maintenance work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Flush dirty pages and mark a WAL checkpoint.
    Checkpoint,
    /// Prune superseded versions.
    VersionPrune,
    /// Component health probe.
    HealthCheck,
    /// Anything else.
    Custom,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Checkpoint => "checkpoint",
            Self::VersionPrune => "version-prune",
            Self::HealthCheck => "health-check",
            Self::Custom => "custom",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Queued or deferred, not yet picked up.
    Pending,
    /// Currently executing on a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Returned false, panicked, or exceeded its timeout.
    Failed,
    /// Cancelled before a worker picked it up.
    Cancelled,
}

impl JobStatus {
    /// Returns true once the job can no longer run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Execution priority. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum JobPriority {
    /// Background housekeeping.
    Low = 0,
    /// Default priority.
    Normal = 1,
    /// Time-sensitive maintenance (checkpoints).
    High = 2,
    /// Must run as soon as a worker frees up.
    Critical = 3,
}
