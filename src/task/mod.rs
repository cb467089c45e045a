//! The task execution engine: builds a dependency graph from a resolved
//! task configuration, plans the run stage, drives the state machine
//! through to cleanup, and dispatches each step to the Docker daemon.
//!
//! This module is the crate's actual product; `crate::client`,
//! `crate::container`, `crate::image`, and `crate::network` (carried from
//! the underlying Docker wrapper) are the daemon plumbing it is built on,
//! reached exclusively through [`daemon::DaemonClient`].

pub mod config;
pub mod container;
pub mod daemon;
pub mod daemon_docker;
pub mod dispatcher;
pub mod event;
pub mod graph;
pub mod planner;
pub mod rules;
pub mod stage;
pub mod state_machine;
pub mod status;
pub mod step;

pub use config::{load_task, ConfigError, RunOverrides};
pub use container::{Container, ImageSource, PullPolicy, ResolvedTaskConfig};
pub use daemon::{DaemonClient, DaemonError, HealthOutcome, SetupCommandOutcome};
pub use daemon_docker::DockerCliDaemon;
pub use dispatcher::Dispatcher;
pub use event::{Progress, TaskEvent};
pub use graph::{DependencyGraph, GraphError};
pub use planner::{CleanupPolicy, CleanupStagePlanner, RunStagePlanner};
pub use state_machine::TaskStateMachine;
pub use status::{ManualCleanup, TaskStatus};
pub use step::{NextStep, TaskStep};
