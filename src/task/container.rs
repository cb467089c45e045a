//! The immutable, fully-resolved container configuration the engine operates on.
//!
//! These types are the engine's view of what the (out-of-scope) config
//! loader hands it: every reference has already been resolved, every
//! environment variable expression already expanded to a plain string. The
//! engine performs no further validation beyond dependency-graph acyclicity
//! (`crate::task::graph`).

use crate::container::health::HealthCheck as HealthCheckSpec;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Where a container's image comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Build the image from a local directory.
    Build {
        /// Directory containing the build context.
        context: PathBuf,
        /// Dockerfile path, relative to `context`, if not the default.
        dockerfile: Option<String>,
        /// `--build-arg` values.
        build_args: HashMap<String, String>,
        /// Build target stage, if the Dockerfile is multi-stage.
        target: Option<String>,
    },
    /// Pull a pre-built image from a registry.
    Pull {
        /// The image reference to pull, e.g. `redis:7.2-alpine`.
        reference: String,
        /// When to pull relative to what's already cached locally.
        policy: PullPolicy,
    },
}

/// When an image pull should actually hit the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    /// Always pull, even if an image with this reference exists locally.
    Always,
    /// Pull only if no image with this reference exists locally.
    IfNotPresent,
    /// Never pull; fail if the image isn't already present.
    Never,
}

/// A single port mapping from the host to the container.
#[derive(Debug, Clone, PartialEq)]
pub struct PortMapping {
    /// Host port; `None` requests dynamic allocation.
    pub host_port: Option<u16>,
    /// Port inside the container.
    pub container_port: u16,
    /// Protocol for this mapping.
    pub protocol: crate::types::Protocol,
}

/// A single volume mount.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    /// Source of the mount (named volume or host path).
    pub source: crate::types::VolumeSource,
    /// Mount point inside the container.
    pub target: PathBuf,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// A single device mount (host device made available inside the container).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMount {
    /// Path to the device on the host.
    pub host_path: PathBuf,
    /// Path the device is exposed at inside the container.
    pub container_path: PathBuf,
    /// cgroup permissions string, e.g. `"rwm"`.
    pub cgroup_permissions: String,
}

/// A single setup command run once a container becomes healthy, before it
/// (if it's the task container) or its dependents are allowed to proceed.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupCommand {
    /// The command to run, already tokenized.
    pub command: Vec<String>,
    /// Working directory override for this command.
    pub working_dir: Option<PathBuf>,
}

/// Container log driver configuration, passed through to the daemon
/// verbatim; the engine never inspects it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogConfig {
    /// Docker log driver name, e.g. `"json-file"`.
    pub driver: Option<String>,
    /// Driver-specific options.
    pub options: HashMap<String, String>,
}

/// Immutable, fully-resolved configuration for one container, as produced by
/// the (out-of-scope) config loader. Shared read-only by every engine
/// component for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Container {
    /// Stable name used to reference this container from events, steps, and
    /// other containers' dependency sets.
    pub name: String,
    /// Where the image comes from.
    pub image_source: ImageSource,
    /// Command override, if any.
    pub command: Option<Vec<String>>,
    /// Entrypoint override, if any.
    pub entrypoint: Option<Vec<String>>,
    /// Already-resolved environment variables.
    pub environment: HashMap<String, String>,
    /// Working directory inside the container.
    pub working_dir: Option<PathBuf>,
    /// Volume mounts.
    pub volumes: Vec<VolumeMount>,
    /// Device mounts.
    pub devices: Vec<DeviceMount>,
    /// Port mappings.
    pub ports: Vec<PortMapping>,
    /// Names of containers this one depends on. Must resolve within the
    /// task's container set (`crate::task::graph::DependencyGraph` validates
    /// this).
    pub dependencies: Vec<String>,
    /// Health check configuration, if any.
    pub health_check: Option<HealthCheckSpec>,
    /// How long to wait for the health check before giving up.
    pub health_check_timeout: Duration,
    /// Run as the invoking user's uid/gid rather than the image default.
    pub run_as_current_user: bool,
    /// Run in privileged mode.
    pub privileged: bool,
    /// Run with an init process as PID 1.
    pub enable_init_process: bool,
    /// Additional Linux capabilities to add.
    pub capabilities_to_add: Vec<String>,
    /// Linux capabilities to drop.
    pub capabilities_to_drop: Vec<String>,
    /// Extra `host:ip` entries for the container's `/etc/hosts`.
    pub additional_hostnames: Vec<String>,
    /// Setup commands run once the container is healthy.
    pub setup_commands: Vec<SetupCommand>,
    /// Log driver configuration.
    pub log_config: LogConfig,
    /// Size of `/dev/shm`, if overridden.
    pub shm_size: Option<u64>,
}

impl Container {
    /// Whether this container declares a health check. Used by the
    /// dependency-readiness rule to decide whether dependents wait for
    /// `ContainerBecameHealthy` or merely `ContainerStarted`.
    pub fn has_health_check(&self) -> bool {
        self.health_check.is_some()
    }
}

/// A project-scoped, task-specialised configuration: the task container
/// plus every container transitively reachable from it. This is exactly
/// what the config loader hands the engine.
#[derive(Debug, Clone)]
pub struct ResolvedTaskConfig {
    /// Name of the project this task belongs to (used for network/container naming).
    pub project_name: String,
    /// Name of the task being run.
    pub task_name: String,
    /// Name of the task container within `containers`.
    pub task_container: String,
    /// Every container transitively required by the task, keyed by name.
    pub containers: HashMap<String, Container>,
}

impl ResolvedTaskConfig {
    /// The task container's configuration.
    pub fn task_container(&self) -> &Container {
        self.containers
            .get(&self.task_container)
            .expect("task container must be present in a validated config")
    }
}
