//! The boundary between the task engine and whatever actually talks to the
//! container daemon.
//!
//! Every step runner the dispatcher spawns goes through one
//! [`DaemonClient`] call. The engine depends only on this trait; swapping
//! the concrete implementation (`crate::task::daemon_docker::DockerCliDaemon`
//! today) never touches `crate::task::state_machine` or `crate::task::rules`.

use crate::image::ImageRef;
use crate::task::container::{Container, SetupCommand};
use crate::types::{ContainerId, NetworkId};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything that can go wrong asking the daemon to do something on behalf
/// of a step runner.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The underlying command failed; `message` is daemon-reported detail.
    #[error("{operation} failed: {message}")]
    OperationFailed {
        /// What we were trying to do, for log correlation.
        operation: String,
        /// Daemon-reported detail.
        message: String,
    },
    /// The operation did not complete within its budget.
    #[error("{operation} timed out after {0:?}", .timeout)]
    TimedOut {
        /// What we were trying to do.
        operation: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },
}

impl DaemonError {
    /// Build an [`DaemonError::OperationFailed`] from any displayable cause.
    pub fn failed(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: cause.to_string(),
        }
    }

    /// The message to carry into the corresponding `TaskEvent` failure
    /// variant.
    pub fn message(&self) -> String {
        match self {
            Self::OperationFailed { message, .. } => message.clone(),
            Self::TimedOut { operation, timeout } => {
                format!("{operation} timed out after {timeout:?}")
            }
        }
    }
}

/// Outcome of a health check wait: either it passed, or it didn't within
/// budget (daemon error describes why, e.g. the check command's own
/// output).
#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    /// The health check passed.
    Healthy,
    /// The health check never passed; carries a diagnostic message.
    Unhealthy(String),
}

/// Outcome of running a single setup command.
#[derive(Debug, Clone, PartialEq)]
pub enum SetupCommandOutcome {
    /// The command exited 0.
    Succeeded,
    /// The command exited non-zero or failed to start; carries a message.
    Failed(String),
}

/// Abstraction over "the thing that actually runs containers". Every method
/// corresponds to one step, minus the bookkeeping (`EventLog` lookups,
/// dependency checks) that belongs to the rule base instead.
///
/// Every method takes `cancel`: implementations must race their daemon call
/// against `cancel.cancelled()` so that closing the token (on the first
/// run-stage failure, or on `Dispatcher::request_cancellation`) aborts
/// whatever is in flight rather than leaving it to run to completion.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Create the shared network every container in the task attaches to.
    async fn create_network(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<NetworkId, DaemonError>;

    /// Build `container`'s image from its configured build context.
    async fn build_image(
        &self,
        container: &Container,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError>;

    /// Pull `container`'s image from its configured registry reference.
    async fn pull_image(
        &self,
        container: &Container,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError>;

    /// Create `container` using `image` attached to `network`.
    async fn create_container(
        &self,
        container: &Container,
        image: &ImageRef,
        network: &NetworkId,
        cancel: &CancellationToken,
    ) -> Result<ContainerId, DaemonError>;

    /// Start a previously created container.
    async fn start_container(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError>;

    /// Wait for the container's declared health check to pass, bounded by
    /// `timeout`.
    async fn wait_for_health(
        &self,
        id: &ContainerId,
        container: &Container,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HealthOutcome, DaemonError>;

    /// Run one setup command inside the container.
    async fn run_setup_command(
        &self,
        id: &ContainerId,
        command: &SetupCommand,
        cancel: &CancellationToken,
    ) -> Result<SetupCommandOutcome, DaemonError>;

    /// Attach to the task container's stdio and block until it exits,
    /// returning its exit code. This is the one call with no fixed budget —
    /// it can legitimately run for the life of the task — so `cancel` is the
    /// only thing that can cut it short.
    async fn run_container(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<i32, DaemonError>;

    /// Stop a running container, giving it `grace_period` to exit cleanly
    /// before sending `SIGKILL`.
    async fn stop_container(
        &self,
        id: &ContainerId,
        grace_period: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError>;

    /// Remove a (stopped) container.
    async fn remove_container(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError>;

    /// Delete the shared task network.
    async fn delete_network(
        &self,
        id: &NetworkId,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError>;
}
