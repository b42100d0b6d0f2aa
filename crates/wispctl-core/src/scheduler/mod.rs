// ── Drift-correction schedulers ──
//
// Each scheduler runs on its own timer inside the single controlling
// process and serializes against its own previous tick. Lifecycle is an
// explicit state machine (not ad hoc booleans): Stopped -> Scheduled on
// start, Scheduled -> Running around each tick, anything -> Stopped on
// stop. Stopping cancels the timer; a command already in flight
// completes and its result is discarded.

mod expiry;
mod monitoring;
mod schedule;

pub use expiry::{ExpiryRunReport, ExpiryScheduler, ExpirySchedulerStatus};
pub use monitoring::{
    JobKind, JobStatus, MonitoringConfig, MonitoringScheduler, MonitoringStatus,
};
pub use schedule::Schedule;

/// Observable lifecycle of a scheduler or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Not started, or stopped.
    Stopped,
    /// Timer armed, waiting for the next fire.
    Scheduled,
    /// A tick is executing right now.
    Running,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
        };
        f.write_str(s)
    }
}
