//! The closed set of lifecycle events the task state machine accumulates.
//!
//! Events are the only thing rules (`crate::task::rules`) are allowed to
//! inspect. They are produced exclusively by step runners and posted back
//! through `TaskStateMachine::post_event`.

use crate::image::ImageRef;
use crate::types::{ContainerId, NetworkId};
use std::time::Duration;

/// A single named container within a task, as referenced by events and steps.
pub type ContainerName = String;

/// Build/pull progress as surfaced by the daemon, forwarded to UI/log sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Human readable progress line (e.g. a build layer digest or pull status).
    pub message: String,
    /// Completed units, if the daemon reports one (bytes, layers, ...).
    pub current: Option<u64>,
    /// Total units, if known.
    pub total: Option<u64>,
}

impl Progress {
    /// Build a progress update carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            current: None,
            total: None,
        }
    }
}

/// The closed sum of events that drive the task state machine.
///
/// `TaskNetworkFailed` is added alongside `TaskNetworkReady`: a bare
/// `TaskNetworkReady` with no corresponding failure case would leave
/// network-creation failure unrepresentable, and every other daemon call
/// here has a matching `*Failed` event, so this fills in the same shape
/// as its neighbours rather than leaving it a "can't fail" case.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The shared task network has been created and is ready to attach containers to.
    TaskNetworkReady(NetworkId),
    /// Creating the shared task network failed. See the enum's doc comment.
    TaskNetworkFailed(String),
    /// An image build for `container` finished and produced `image`.
    ImageBuilt(ContainerName, ImageRef),
    /// Incremental progress for an in-flight build.
    ImageBuildProgress(ContainerName, Progress),
    /// An image build for `container` failed.
    ImageBuildFailed(ContainerName, String),
    /// An image pull for `container` finished and produced `image`.
    ImagePulled(ContainerName, ImageRef),
    /// Incremental progress for an in-flight pull.
    ImagePullProgress(ContainerName, Progress),
    /// An image pull for `container` failed.
    ImagePullFailed(ContainerName, String),
    /// The container was created by the daemon.
    ContainerCreated(ContainerName, ContainerId),
    /// Container creation failed.
    ContainerCreationFailed(ContainerName, String),
    /// The container process was started.
    ContainerStarted(ContainerName),
    /// The container failed to start.
    ContainerStartFailed(ContainerName, String),
    /// The container's health check passed.
    ContainerBecameHealthy(ContainerName),
    /// The container's health check never passed within its budget.
    ContainerDidNotBecomeHealthy(ContainerName, String),
    /// The task container's process exited on its own (the normal way a run ends).
    RunningContainerExited(ContainerName, i32),
    /// The container was stopped as part of cleanup.
    ContainerStopped(ContainerName),
    /// The container was removed.
    ContainerRemoved(ContainerName),
    /// The task network was removed.
    TaskNetworkRemoved,
    /// Setup commands for `container` all completed successfully (including
    /// the synthesized zero-command case).
    SetupCommandsCompleted(ContainerName),
    /// A setup command for `container` failed.
    SetupCommandFailed(ContainerName, String, String),
    /// The user asked (e.g. via Ctrl-C) that the task be cancelled.
    UserRequestedCancellation,
}

impl TaskEvent {
    /// The container this event concerns, if any (network-level events have none).
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::ImageBuilt(c, _)
            | Self::ImageBuildProgress(c, _)
            | Self::ImageBuildFailed(c, _)
            | Self::ImagePulled(c, _)
            | Self::ImagePullProgress(c, _)
            | Self::ImagePullFailed(c, _)
            | Self::ContainerCreated(c, _)
            | Self::ContainerCreationFailed(c, _)
            | Self::ContainerStarted(c)
            | Self::ContainerStartFailed(c, _)
            | Self::ContainerBecameHealthy(c)
            | Self::ContainerDidNotBecomeHealthy(c, _)
            | Self::RunningContainerExited(c, _)
            | Self::ContainerStopped(c)
            | Self::ContainerRemoved(c)
            | Self::SetupCommandsCompleted(c)
            | Self::SetupCommandFailed(c, _, _) => Some(c.as_str()),
            Self::TaskNetworkReady(_)
            | Self::TaskNetworkFailed(_)
            | Self::TaskNetworkRemoved
            | Self::UserRequestedCancellation => None,
        }
    }

    /// Whether this event denotes a failure. Every failure-shaped event
    /// answers `true` here so the state machine can classify it in O(1)
    /// without a second match arm living elsewhere.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TaskNetworkFailed(..)
                | Self::ImageBuildFailed(..)
                | Self::ImagePullFailed(..)
                | Self::ContainerCreationFailed(..)
                | Self::ContainerStartFailed(..)
                | Self::ContainerDidNotBecomeHealthy(..)
                | Self::SetupCommandFailed(..)
                | Self::UserRequestedCancellation
        )
    }

    /// A human-readable message for UI display, present on failure events.
    pub fn failure_message(&self) -> Option<String> {
        match self {
            Self::TaskNetworkFailed(msg) => Some(format!("failed to create task network: {msg}")),
            Self::ImageBuildFailed(c, msg) => Some(format!("build failed for {c}: {msg}")),
            Self::ImagePullFailed(c, msg) => Some(format!("pull failed for {c}: {msg}")),
            Self::ContainerCreationFailed(c, msg) => {
                Some(format!("failed to create container {c}: {msg}"))
            }
            Self::ContainerStartFailed(c, msg) => {
                Some(format!("failed to start container {c}: {msg}"))
            }
            Self::ContainerDidNotBecomeHealthy(c, msg) => {
                Some(format!("container {c} did not become healthy: {msg}"))
            }
            Self::SetupCommandFailed(c, cmd, msg) => {
                Some(format!("setup command `{cmd}` failed in {c}: {msg}"))
            }
            Self::UserRequestedCancellation => Some("cancelled by user".to_string()),
            _ => None,
        }
    }
}

/// An append-only, order-insensitive view of every event observed so far.
///
/// Rules are pure functions of this set: identical (case, payload) entries
/// are deduplicated by identity of case plus payload.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<TaskEvent>,
}

impl EventLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event`, unless an observationally identical event was already
    /// recorded — posting the same event twice is a no-op.
    pub fn push(&mut self, event: TaskEvent) -> bool {
        if self.events.iter().any(|e| e == &event) {
            return false;
        }
        self.events.push(event);
        true
    }

    /// All events recorded so far, in post order.
    pub fn all(&self) -> &[TaskEvent] {
        &self.events
    }

    /// Whether any event for which `predicate` holds has been recorded.
    pub fn has(&self, mut predicate: impl FnMut(&TaskEvent) -> bool) -> bool {
        self.events.iter().any(|e| predicate(e))
    }

    /// The first event for which `predicate` holds, if any.
    pub fn find(&self, mut predicate: impl FnMut(&TaskEvent) -> bool) -> Option<&TaskEvent> {
        self.events.iter().find(|e| predicate(e))
    }

    /// All events for which `predicate` holds.
    pub fn all_matching(&self, mut predicate: impl FnMut(&TaskEvent) -> bool) -> Vec<&TaskEvent> {
        self.events.iter().filter(|e| predicate(e)).collect()
    }

    /// Whether any failure event has been recorded.
    pub fn contains_failure(&self) -> bool {
        self.events.iter().any(TaskEvent::is_failure)
    }

    /// The daemon-assigned ID for a created container, if it has been
    /// created.
    pub fn container_id(&self, container: &str) -> Option<ContainerId> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ContainerCreated(c, id) if c == container => Some(id.clone()),
            _ => None,
        })
    }

    /// `true` once a container has become ready to be depended on: healthy
    /// if it declares a health check, else merely started. Callers pass
    /// `has_health_check` from the resolved container config.
    pub fn dependency_ready(&self, container: &str, has_health_check: bool) -> bool {
        if has_health_check {
            self.has(|e| matches!(e, TaskEvent::ContainerBecameHealthy(c) if c == container))
        } else {
            self.has(|e| matches!(e, TaskEvent::ContainerStarted(c) if c == container))
        }
    }

    /// The task container's exit code, defined iff exactly one
    /// `RunningContainerExited(task)` has been observed.
    pub fn task_exit_code(&self, task_container: &str) -> Option<i32> {
        let mut matches = self.events.iter().filter_map(|e| match e {
            TaskEvent::RunningContainerExited(c, code) if c == task_container => Some(*code),
            _ => None,
        });
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }
}

/// A timeout budget, carried by steps that must bound how long a daemon
/// call may run before the dispatcher treats it as failed.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_events_are_idempotent() {
        let mut log = EventLog::new();
        assert!(log.push(TaskEvent::ContainerStarted("web".into())));
        assert!(!log.push(TaskEvent::ContainerStarted("web".into())));
        assert_eq!(log.all().len(), 1);
    }

    #[test]
    fn contains_failure_detects_any_failure_shaped_event() {
        let mut log = EventLog::new();
        assert!(!log.contains_failure());
        log.push(TaskEvent::ImageBuildFailed("db".into(), "oom".into()));
        assert!(log.contains_failure());
    }

    #[test]
    fn dependency_ready_respects_health_check_presence() {
        let mut log = EventLog::new();
        log.push(TaskEvent::ContainerStarted("db".into()));
        assert!(log.dependency_ready("db", false));
        assert!(!log.dependency_ready("db", true));
        log.push(TaskEvent::ContainerBecameHealthy("db".into()));
        assert!(log.dependency_ready("db", true));
    }

    #[test]
    fn task_exit_code_defined_only_for_exactly_one_exit_event() {
        let mut log = EventLog::new();
        assert_eq!(log.task_exit_code("task"), None);
        log.push(TaskEvent::RunningContainerExited("task".into(), 0));
        assert_eq!(log.task_exit_code("task"), Some(0));
    }
}
