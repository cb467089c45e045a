//! YAML configuration loading, given a minimal concrete shape here because
//! the engine needs *something* to build a
//! [`crate::task::graph::DependencyGraph`] from.
//!
//! This is intentionally thin: no `!include` tags, no YAML anchors beyond
//! what `serde_yaml` gives for free, no cross-file composition. It decodes
//! one file into a [`RawProject`], resolves one named task into a
//! [`crate::task::container::ResolvedTaskConfig`], and applies the handful
//! of CLI overrides (`RunOverrides`). Full schema validation is out of
//! scope beyond what's needed to reach that point.

use crate::container::health::HealthCheck as HealthCheckSpec;
use crate::task::container::{
    Container, DeviceMount, ImageSource, LogConfig, PortMapping, PullPolicy, ResolvedTaskConfig,
    SetupCommand, VolumeMount,
};
use crate::types::{Protocol, VolumeSource};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Failure to load or resolve a task configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read config file {path}: {source}")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents are not valid YAML for this schema.
    #[error("could not parse config file {path}: {source}")]
    Parse {
        /// The file that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },
    /// The requested task name isn't declared in the file.
    #[error("no task named {0:?} is declared in this configuration")]
    UnknownTask(String),
    /// A task's `run.container` (or an override) names a container that
    /// isn't declared.
    #[error("task {task:?} references unknown container {container:?}")]
    UnknownContainer {
        /// The task doing the referencing.
        task: String,
        /// The container name it referenced.
        container: String,
    },
    /// An image-override target isn't a container used by this task.
    #[error("--override-image target {0:?} is not a container in this task")]
    UnknownOverrideTarget(String),
}

/// CLI-level overrides applied on top of the loaded configuration; see
/// `taskrun`'s `--override-image` and `--max-parallel-steps` flags.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    /// Replace a container's configured image reference outright, skipping
    /// both build and pull for it.
    pub image_overrides: HashMap<String, String>,
    /// Override the dispatcher's worker pool size; `None` keeps the
    /// engine's CPU-count default.
    pub max_parallel_steps: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    project: String,
    containers: HashMap<String, RawContainer>,
    tasks: HashMap<String, RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    run: RawRun,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRun {
    container: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawBuild {
    context: PathBuf,
    dockerfile: Option<String>,
    #[serde(default)]
    args: HashMap<String, String>,
    target: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHealthCheck {
    command: Option<Vec<String>>,
    port: Option<u16>,
    url: Option<String>,
    #[serde(default = "default_health_interval_secs")]
    interval_seconds: u64,
    #[serde(default = "default_health_retries")]
    retries: u32,
    #[serde(default)]
    start_period_seconds: u64,
    #[serde(default = "default_health_timeout_secs")]
    timeout_seconds: u64,
}

fn default_health_interval_secs() -> u64 {
    2
}
fn default_health_retries() -> u32 {
    3
}
fn default_health_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Default)]
struct RawVolume {
    /// Host path; mutually exclusive with `volume`.
    local: Option<PathBuf>,
    /// Named volume; mutually exclusive with `local`.
    volume: Option<String>,
    container: PathBuf,
    #[serde(default)]
    read_only: bool,
}

#[derive(Debug, Deserialize, Default)]
struct RawDevice {
    local: PathBuf,
    container: PathBuf,
    #[serde(default = "default_cgroup_permissions")]
    options: String,
}

fn default_cgroup_permissions() -> String {
    "rwm".to_string()
}

#[derive(Debug, Deserialize, Default)]
struct RawPort {
    local: Option<u16>,
    container: u16,
    #[serde(default)]
    protocol: RawProtocol,
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum RawProtocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Deserialize, Default)]
struct RawSetupCommand {
    command: Vec<String>,
    working_directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum RawPullPolicy {
    Always,
    #[default]
    IfNotPresent,
    Never,
}

#[derive(Debug, Deserialize, Default)]
struct RawContainer {
    build: Option<RawBuild>,
    image: Option<String>,
    #[serde(default)]
    pull_policy: RawPullPolicy,
    command: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    environment: HashMap<String, String>,
    working_directory: Option<PathBuf>,
    #[serde(default)]
    volumes: Vec<RawVolume>,
    #[serde(default)]
    devices: Vec<RawDevice>,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    dependencies: Vec<String>,
    health_check: Option<RawHealthCheck>,
    #[serde(default)]
    run_as_current_user: bool,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    enable_init_process: bool,
    #[serde(default)]
    capabilities_to_add: Vec<String>,
    #[serde(default)]
    capabilities_to_drop: Vec<String>,
    #[serde(default)]
    additional_hostnames: Vec<String>,
    #[serde(default)]
    setup_commands: Vec<RawSetupCommand>,
    log_driver: Option<String>,
    #[serde(default)]
    log_options: HashMap<String, String>,
    shm_size: Option<u64>,
}

/// Environment expressions a declared variable's value may come from,
/// resolved to a plain string before the engine ever sees it. Literal
/// values pass through unchanged; `${env:NAME}` is resolved from the
/// invoking process's own environment, the simplest faithful
/// implementation here since a real proxy/secrets provider is out of
/// scope.
fn resolve_environment(raw: &HashMap<String, String>) -> HashMap<String, String> {
    raw.iter()
        .map(|(k, v)| {
            let resolved = if let Some(name) = v
                .strip_prefix("${env:")
                .and_then(|rest| rest.strip_suffix('}'))
            {
                std::env::var(name).unwrap_or_default()
            } else {
                v.clone()
            };
            (k.clone(), resolved)
        })
        .collect()
}

fn resolve_container(name: &str, raw: RawContainer) -> Container {
    let image_source = match (raw.build, raw.image) {
        (Some(build), _) => ImageSource::Build {
            context: build.context,
            dockerfile: build.dockerfile,
            build_args: build.args,
            target: build.target,
        },
        (None, Some(reference)) => ImageSource::Pull {
            reference,
            policy: match raw.pull_policy {
                RawPullPolicy::Always => PullPolicy::Always,
                RawPullPolicy::IfNotPresent => PullPolicy::IfNotPresent,
                RawPullPolicy::Never => PullPolicy::Never,
            },
        },
        (None, None) => ImageSource::Pull {
            reference: format!("{name}:latest"),
            policy: PullPolicy::IfNotPresent,
        },
    };

    let health_check = raw.health_check.as_ref().map(|h| {
        if let Some(cmd) = &h.command {
            HealthCheckSpec::command(cmd.clone())
        } else if let Some(port) = h.port {
            HealthCheckSpec::port(port)
        } else if let Some(url) = &h.url {
            HealthCheckSpec::http(url.clone())
        } else {
            HealthCheckSpec::command(vec!["true".to_string()])
        }
    });
    let health_check_timeout = raw
        .health_check
        .as_ref()
        .map(|h| Duration::from_secs(h.timeout_seconds))
        .unwrap_or(Duration::from_secs(30));

    Container {
        name: name.to_string(),
        image_source,
        command: raw.command,
        entrypoint: raw.entrypoint,
        environment: resolve_environment(&raw.environment),
        working_dir: raw.working_directory,
        volumes: raw
            .volumes
            .into_iter()
            .map(|v| VolumeMount {
                source: match (v.local, v.volume) {
                    (Some(path), _) => VolumeSource::HostPath(path),
                    (None, Some(name)) => VolumeSource::Named(name),
                    (None, None) => VolumeSource::Anonymous,
                },
                target: v.container,
                read_only: v.read_only,
            })
            .collect(),
        devices: raw
            .devices
            .into_iter()
            .map(|d| DeviceMount {
                host_path: d.local,
                container_path: d.container,
                cgroup_permissions: d.options,
            })
            .collect(),
        ports: raw
            .ports
            .into_iter()
            .map(|p| PortMapping {
                host_port: p.local,
                container_port: p.container,
                protocol: match p.protocol {
                    RawProtocol::Tcp => Protocol::Tcp,
                    RawProtocol::Udp => Protocol::Udp,
                },
            })
            .collect(),
        dependencies: raw.dependencies,
        health_check,
        health_check_timeout,
        run_as_current_user: raw.run_as_current_user,
        privileged: raw.privileged,
        enable_init_process: raw.enable_init_process,
        capabilities_to_add: raw.capabilities_to_add,
        capabilities_to_drop: raw.capabilities_to_drop,
        additional_hostnames: raw.additional_hostnames,
        setup_commands: raw
            .setup_commands
            .into_iter()
            .map(|c| SetupCommand {
                command: c.command,
                working_dir: c.working_directory,
            })
            .collect(),
        log_config: LogConfig {
            driver: raw.log_driver,
            options: raw.log_options,
        },
        shm_size: raw.shm_size,
    }
}

/// Load `path`, resolve `task_name`, and apply `overrides`, producing the
/// task-specialised configuration the engine operates on: the task
/// container plus every container transitively reachable from it (other
/// containers declared in the file but unrelated to this task are dropped,
/// since the dependency graph only ever sees the reachable set).
pub fn load_task(
    path: &Path,
    task_name: &str,
    overrides: &RunOverrides,
) -> Result<ResolvedTaskConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawProject = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let task = raw
        .tasks
        .get(task_name)
        .ok_or_else(|| ConfigError::UnknownTask(task_name.to_string()))?;

    for target in overrides.image_overrides.keys() {
        if !raw.containers.contains_key(target) {
            return Err(ConfigError::UnknownOverrideTarget(target.clone()));
        }
    }

    if !raw.containers.contains_key(&task.run.container) {
        return Err(ConfigError::UnknownContainer {
            task: task_name.to_string(),
            container: task.run.container.clone(),
        });
    }

    let mut containers = HashMap::new();
    for (name, raw_container) in raw.containers {
        let mut resolved = resolve_container(&name, raw_container);
        if let Some(image) = overrides.image_overrides.get(&name) {
            resolved.image_source = ImageSource::Pull {
                reference: image.clone(),
                policy: PullPolicy::IfNotPresent,
            };
        }
        containers.insert(name, resolved);
    }

    // A task's own `dependencies` list (extra services the task needs
    // beyond whatever its container already declares) is folded into the
    // task container's dependency set, so the graph builder's single rule
    // — "reachable from the task container via the dependency set" — still
    // covers it without a second notion of root.
    if !task.dependencies.is_empty() {
        if let Some(task_container) = containers.get_mut(&task.run.container) {
            for dep in &task.dependencies {
                if !task_container.dependencies.contains(dep) {
                    task_container.dependencies.push(dep.clone());
                }
            }
        }
    }

    Ok(ResolvedTaskConfig {
        project_name: raw.project,
        task_name: task_name.to_string(),
        task_container: task.run.container.clone(),
        containers,
    })
}
