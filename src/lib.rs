//! # taskrunner
//!
//! Runs declaratively-defined tasks inside ephemeral Docker containers: a
//! task names a container to run plus the containers it depends on, and
//! this crate builds the dependency graph, brings every dependency up
//! (building or pulling its image, starting it, waiting on its health
//! check), runs the task container to completion, and tears the whole
//! thing back down again.
//!
//! The [`task`] module is the engine itself — the dependency graph, the
//! event-driven state machine, and the worker-pool dispatcher that drives
//! it. Everything else in this crate (`client`, `container`, `image`,
//! `network`, ...) is the Docker CLI wrapper the engine is built on, reached
//! exclusively through [`task::daemon::DaemonClient`] so the engine itself
//! never depends on Docker directly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskrunner::task::config::{load_task, RunOverrides};
//! use taskrunner::task::daemon_docker::DockerCliDaemon;
//! use taskrunner::task::dispatcher::Dispatcher;
//! use taskrunner::task::graph::DependencyGraph;
//! use taskrunner::task::planner::CleanupPolicy;
//! use taskrunner::task::state_machine::TaskStateMachine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_task("taskrunner.yml".as_ref(), "test", &RunOverrides::default())?;
//! let graph = DependencyGraph::build(&config)?;
//! let daemon = DockerCliDaemon::new().await?;
//! let state_machine = TaskStateMachine::new(config.clone(), graph, CleanupPolicy::CleanupAlways);
//! let dispatcher = Dispatcher::new(state_machine, config, daemon, num_cpus::get());
//!
//! let outcome = dispatcher.run().await;
//! println!("{:?}", outcome.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`task`] - The task execution engine: graph, state machine, dispatcher
//! - [`client`] - Core Docker client and command execution
//! - [`container`] - Container lifecycle management
//! - [`image`] - Image operations and management
//! - [`network`] - Network creation and management
//! - [`types`] - Core types and data structures
//! - [`errors`] - Error types and handling
//! - [`executor`] - Low-level process execution

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // TODO: Add error docs in later phases

// Re-export the most commonly used types and traits
pub use client::{DockerClient, DockerInfo, DockerVersion};
pub use container::{
    ContainerBuilder, ContainerConfig, ContainerExecutor, ContainerManager, DockerContainer,
    ExecConfig, ExecOutput, ExecResult, HealthCheck, HealthCheckConfig, HealthCheckResult,
    HealthChecker, LogEntry, LogManager, LogOptions, LogSource, RemoveOptions,
};
pub use errors::{DockerError, DockerResult};
pub use image::{
    BuildOptions, BuildProgress, DockerImage, ImageHistoryItem, ImageInspect, ImageManager,
    ImageRef, ListImagesOptions, PruneResult, PullOptions, PullProgress, RegistryAuth,
    RemoveImageOptions, RemoveImageResult,
};
pub use network::{
    ConnectOptions, DisconnectOptions, DockerNetwork, IPAMConfig, ListNetworksOptions,
    NetworkConfig, NetworkContainer, NetworkDriver, NetworkIPAM, NetworkInspect, NetworkManager,
    NetworkPruneResult,
};
pub use types::{ContainerId, ContainerStatus, NetworkId, PortMapping, VolumeMount};

// Core modules
pub mod client;
pub mod container;
pub mod errors;
pub mod executor;
pub mod image;
pub mod network;
pub mod task;
pub mod types;

// Feature-gated modules would go here
// #[cfg(feature = "json")]
// pub mod json;

// Optional CLI module - not implemented yet
// #[cfg(feature = "cli")]
// pub mod cli;

// Internal utilities
mod utils;

// Version information
/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The minimum supported Docker version
pub const MIN_DOCKER_VERSION: &str = "20.10.0";

/// Default timeout for Docker operations
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
        assert!(!MIN_DOCKER_VERSION.is_empty());
    }

    #[test]
    fn test_timeout_constants() {
        assert!(DEFAULT_TIMEOUT > std::time::Duration::from_secs(0));
    }
}
