//! Outward-facing status types reported once a task run finishes.

/// Where a task run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The run stage (or cleanup stage) is still in progress.
    Running,
    /// The task container exited with code 0 and cleanup (if any) finished
    /// without a new failure.
    Succeeded,
    /// Something in the run stage failed.
    Failed,
}

/// Whether the caller needs to clean up containers or the network by hand,
/// and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCleanup {
    /// Cleanup ran to completion (or nothing needed cleaning up); nothing
    /// left behind.
    None,
    /// The run failed and [`crate::task::planner::CleanupPolicy`] skipped
    /// cleanup on failure.
    RequiredDueToFailure,
    /// The run succeeded but the cleanup policy skips cleanup on success.
    RequiredDueToSuccess,
    /// Cleanup itself ran but a step inside it failed, leaving containers or
    /// the network behind.
    RequiredDueToCleanupFailure,
}
