//! The closed set of directives a step runner can be asked to execute.
//!
//! Steps are single-use tokens: once `TaskStateMachine::pop_next_step` hands
//! one to the dispatcher, the rule that produced it will never produce an
//! equal step again for the remainder of the stage.

use crate::image::ImageRef;
use crate::task::event::ContainerName;
use crate::types::{ContainerId, NetworkId};

/// An atomic unit of work dispatched to a step runner.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStep {
    /// Create the shared network every container in the task attaches to.
    PrepareTaskNetwork,
    /// Build `container`'s image from its configured build context.
    BuildImage(ContainerName),
    /// Pull `container`'s image from its configured registry reference.
    PullImage(ContainerName),
    /// Create `container` using `image` on `network`.
    CreateContainer(ContainerName, ImageRef, NetworkId),
    /// Start the previously created container.
    StartContainer(ContainerName, ContainerId),
    /// Wait for the container's health check (if any) to pass.
    WaitForHealth(ContainerName, ContainerId),
    /// Run the container's declared setup commands (or synthesize success
    /// immediately if it declares none).
    RunSetupCommands(ContainerName, ContainerId),
    /// Attach to the task container's stdio and wait for it to exit.
    RunContainer(ContainerName, ContainerId),
    /// Stop a container that is still running.
    StopContainer(ContainerName, ContainerId),
    /// Remove a created container.
    RemoveContainer(ContainerName, ContainerId),
    /// Delete the shared task network.
    DeleteTaskNetwork(NetworkId),
}

impl TaskStep {
    /// The container name this step concerns, if any.
    pub fn container(&self) -> Option<&str> {
        match self {
            Self::BuildImage(c)
            | Self::PullImage(c)
            | Self::CreateContainer(c, _, _)
            | Self::StartContainer(c, _)
            | Self::WaitForHealth(c, _)
            | Self::RunSetupCommands(c, _)
            | Self::RunContainer(c, _)
            | Self::StopContainer(c, _)
            | Self::RemoveContainer(c, _) => Some(c.as_str()),
            Self::PrepareTaskNetwork | Self::DeleteTaskNetwork(_) => None,
        }
    }

    /// A short tag identifying the step's case, used by the dispatcher to
    /// pick a runner and by tests to assert step identity without matching
    /// on full payloads.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PrepareTaskNetwork => "prepare_task_network",
            Self::BuildImage(_) => "build_image",
            Self::PullImage(_) => "pull_image",
            Self::CreateContainer(..) => "create_container",
            Self::StartContainer(..) => "start_container",
            Self::WaitForHealth(..) => "wait_for_health",
            Self::RunSetupCommands(..) => "run_setup_commands",
            Self::RunContainer(..) => "run_container",
            Self::StopContainer(..) => "stop_container",
            Self::RemoveContainer(..) => "remove_container",
            Self::DeleteTaskNetwork(_) => "delete_task_network",
        }
    }
}

/// The result of asking the state machine for the next piece of work.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    /// Run this step.
    Step(TaskStep),
    /// No rule is currently ready, but the stage is not finished — come back
    /// after more events land (or after in-flight work drains).
    NoneReady,
    /// The task is entirely finished; stop dispatching.
    NoneAndIdle,
}
