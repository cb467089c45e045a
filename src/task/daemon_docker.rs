//! Concrete [`DaemonClient`] backed by the Docker CLI wrapper this crate
//! already carries. Given a real body because this crate must run
//! end-to-end, not only expose the engine library.
//!
//! Every method here is a thin translation layer: resolve a
//! `crate::task::container::Container` into the request shape
//! `crate::container`/`crate::image`/`crate::network` already expect, make
//! the call, and turn a `DockerResult` into a [`DaemonError`]. No rule,
//! stage, or state-machine logic lives here — this module only ever
//! executes a single step; deciding *which* step to run next is the
//! engine's job, not the daemon client's.

use crate::container::exec::{ContainerExecutor, ExecConfig};
use crate::container::health::{HealthCheck as ActiveHealthCheck, HealthCheckConfig, HealthChecker};
use crate::container::{ContainerBuilder, ContainerManager, RemoveOptions};
use crate::image::{BuildOptions, ImageManager, ImageRef, PullOptions};
use crate::network::{NetworkConfig, NetworkManager};
use crate::task::container::{Container, ImageSource, SetupCommand};
use crate::task::daemon::{DaemonClient, DaemonError, HealthOutcome, SetupCommandOutcome};
use crate::task::event::DEFAULT_STEP_TIMEOUT;
use crate::types::{ContainerId, NetworkId};
use crate::DockerClient;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Race `fut` against `cancel`, and (for anything short of the unbounded
/// `run_container` wait) against a fixed budget. A cancellation always wins
/// a race with a timeout; both map onto the same `DaemonError` shapes the
/// step runner already knows how to turn into a `TaskEvent`.
async fn with_cancellation<T>(
    operation: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, DaemonError>>,
) -> Result<T, DaemonError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DaemonError::failed(operation, "cancelled")),
        result = fut => result,
    }
}

/// Like `with_cancellation`, but also bounds `fut` by `budget`, reporting
/// `DaemonError::TimedOut` if it runs past it.
async fn with_timeout<T>(
    operation: &str,
    budget: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, DaemonError>>,
) -> Result<T, DaemonError> {
    let bounded = async {
        match tokio::time::timeout(budget, fut).await {
            Ok(result) => result,
            Err(_) => Err(DaemonError::TimedOut {
                operation: operation.to_string(),
                timeout: budget,
            }),
        }
    };
    with_cancellation(operation, cancel, bounded).await
}

/// Bounded by `budget` only, never by cancellation. Cleanup-stage calls
/// (`stop_container`/`remove_container`/`delete_network`) use this instead
/// of `with_timeout`: the run's cancellation token is exactly what put the
/// engine into cleanup in the first place, and it stays cancelled for the
/// rest of the run, so racing cleanup against it would mean cleanup never
/// actually runs.
async fn with_deadline<T>(
    operation: &str,
    budget: Duration,
    fut: impl Future<Output = Result<T, DaemonError>>,
) -> Result<T, DaemonError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(DaemonError::TimedOut {
            operation: operation.to_string(),
            timeout: budget,
        }),
    }
}

/// [`DaemonClient`] implementation that shells out to the local `docker`
/// binary through [`DockerClient`] and its per-concern managers.
pub struct DockerCliDaemon {
    client: DockerClient,
}

impl DockerCliDaemon {
    /// Probe for a working `docker` binary and daemon connection.
    pub async fn new() -> Result<Self, DaemonError> {
        let client = DockerClient::new()
            .await
            .map_err(|e| DaemonError::failed("connect to docker daemon", e))?;
        Ok(Self { client })
    }

    fn images(&self) -> ImageManager<'_> {
        self.client.images()
    }

    fn networks(&self) -> NetworkManager<'_> {
        self.client.networks()
    }

    fn containers(&self) -> ContainerManager<'_> {
        self.client.containers()
    }
}

#[async_trait]
impl DaemonClient for DockerCliDaemon {
    async fn create_network(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<NetworkId, DaemonError> {
        let operation = format!("create network {name}");
        let config = NetworkConfig::new(name).attachable();
        with_timeout(&operation, DEFAULT_STEP_TIMEOUT, cancel, async {
            self.networks()
                .create(config)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }

    async fn build_image(
        &self,
        container: &Container,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError> {
        let ImageSource::Build {
            context,
            dockerfile,
            build_args,
            target,
        } = &container.image_source
        else {
            return Err(DaemonError::failed(
                format!("build image for {}", container.name),
                "container does not declare a build image source",
            ));
        };

        let tag = format!("taskrunner/{}:latest", container.name);
        let mut options = BuildOptions::new(&tag).context_path(context.clone());
        if let Some(dockerfile) = dockerfile {
            options = options.dockerfile(dockerfile.clone());
        }
        if let Some(target) = target {
            options = options.target(target.clone());
        }
        for (key, value) in build_args {
            options = options.build_arg(key.clone(), value.clone());
        }

        let operation = format!("build image for {}", container.name);
        with_timeout(&operation, DEFAULT_STEP_TIMEOUT, cancel, async {
            self.images()
                .build(options)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))?;

            ImageRef::parse(&tag)
                .map_err(|e| DaemonError::failed(format!("parse built image tag {tag}"), e))
        })
        .await
    }

    async fn pull_image(
        &self,
        container: &Container,
        cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError> {
        let ImageSource::Pull { reference, .. } = &container.image_source else {
            return Err(DaemonError::failed(
                format!("pull image for {}", container.name),
                "container does not declare a pull image source",
            ));
        };

        let image_ref = ImageRef::parse(reference)
            .map_err(|e| DaemonError::failed(format!("parse image reference {reference}"), e))?;

        let operation = format!("pull image for {}", container.name);
        with_timeout(&operation, DEFAULT_STEP_TIMEOUT, cancel, async {
            self.images()
                .pull(&image_ref, PullOptions::new())
                .await
                .map_err(|e| DaemonError::failed(&operation, e))?;

            Ok(image_ref.clone())
        })
        .await
    }

    async fn create_container(
        &self,
        container: &Container,
        image: &ImageRef,
        network: &NetworkId,
        cancel: &CancellationToken,
    ) -> Result<ContainerId, DaemonError> {
        let mut builder = ContainerBuilder::new(image.to_string())
            .name(container.name.clone())
            .envs(container.environment.clone())
            .network(network.clone())
            .capabilities(container.capabilities_to_add.clone());

        if let Some(command) = &container.command {
            builder = builder.command(command.clone());
        }
        if let Some(entrypoint) = &container.entrypoint {
            builder = builder.entrypoint(entrypoint.clone());
        }
        if let Some(dir) = &container.working_dir {
            builder = builder.working_dir(dir.clone());
        }
        if container.privileged {
            builder = builder.privileged();
        }
        if container.run_as_current_user {
            if let Some(user) = current_uid_gid() {
                builder = builder.user(user);
            }
        }
        for mount in &container.volumes {
            use crate::types::VolumeSource;
            builder = match &mount.source {
                VolumeSource::HostPath(path) if mount.read_only => {
                    builder.volume_ro(path.clone(), mount.target.clone())
                }
                VolumeSource::HostPath(path) => builder.volume(path.clone(), mount.target.clone()),
                VolumeSource::Named(name) => {
                    builder.volume_named(name.clone(), mount.target.clone())
                }
                VolumeSource::Anonymous => builder.volume_tmp(mount.target.clone()),
            };
        }
        for port in &container.ports {
            builder = match port.host_port {
                Some(host_port) => builder.port(host_port, port.container_port),
                None => builder.port_dynamic(port.container_port),
            };
        }

        let config = builder.build();
        let operation = format!("create container {}", container.name);
        with_timeout(&operation, DEFAULT_STEP_TIMEOUT, cancel, async {
            self.containers()
                .create(config)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }

    async fn start_container(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let operation = format!("start container {id}");
        with_timeout(&operation, DEFAULT_STEP_TIMEOUT, cancel, async {
            self.containers()
                .start(id)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }

    async fn wait_for_health(
        &self,
        id: &ContainerId,
        container: &Container,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<HealthOutcome, DaemonError> {
        let Some(spec) = &container.health_check else {
            return Ok(HealthOutcome::Healthy);
        };
        let active_check = to_active_health_check(spec);
        let config = HealthCheckConfig::new().timeout(timeout);
        let operation = format!("health check for {}", container.name);
        with_cancellation(&operation, cancel, async {
            let checker = HealthChecker::new(&self.client);
            let result = checker
                .wait_for_healthy(id, active_check, config)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))?;
            if result.healthy {
                Ok(HealthOutcome::Healthy)
            } else {
                Ok(HealthOutcome::Unhealthy(result.message))
            }
        })
        .await
    }

    async fn run_setup_command(
        &self,
        id: &ContainerId,
        command: &SetupCommand,
        cancel: &CancellationToken,
    ) -> Result<SetupCommandOutcome, DaemonError> {
        let mut config = ExecConfig::new(command.command.clone());
        if let Some(dir) = &command.working_dir {
            config = config.working_dir(dir.clone());
        }
        with_timeout(
            "run setup command",
            DEFAULT_STEP_TIMEOUT,
            cancel,
            async {
                let executor = ContainerExecutor::new(&self.client);
                let result = executor
                    .exec(id, config)
                    .await
                    .map_err(|e| DaemonError::failed("run setup command", e))?;
                if result.is_success() {
                    Ok(SetupCommandOutcome::Succeeded)
                } else {
                    Ok(SetupCommandOutcome::Failed(result.combined_output()))
                }
            },
        )
        .await
    }

    async fn run_container(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<i32, DaemonError> {
        // Unbounded on purpose: only `cancel` can cut this one short, never
        // `DEFAULT_STEP_TIMEOUT` — the task container is meant to run for as
        // long as the task takes.
        with_cancellation("run container", cancel, async {
            self.containers()
                .wait(id)
                .await
                .map_err(|e| DaemonError::failed(format!("run container {id}"), e))
        })
        .await
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        grace_period: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let operation = format!("stop container {id}");
        with_deadline(&operation, DEFAULT_STEP_TIMEOUT, async {
            self.containers()
                .stop(id, Some(grace_period))
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }

    async fn remove_container(
        &self,
        id: &ContainerId,
        _cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let operation = format!("remove container {id}");
        with_deadline(&operation, DEFAULT_STEP_TIMEOUT, async {
            self.containers()
                .remove(
                    id,
                    RemoveOptions {
                        force: true,
                        remove_volumes: false,
                    },
                )
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }

    async fn delete_network(
        &self,
        id: &NetworkId,
        _cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let operation = format!("delete network {id}");
        with_deadline(&operation, DEFAULT_STEP_TIMEOUT, async {
            self.networks()
                .remove(id)
                .await
                .map_err(|e| DaemonError::failed(&operation, e))
        })
        .await
    }
}

fn to_active_health_check(spec: &crate::container::health::HealthCheck) -> ActiveHealthCheck {
    spec.clone()
}

/// `uid:gid` of the invoking process, for `run_as_current_user` containers.
/// Shells out to `id` rather than linking `libc`, matching this crate's
/// existing preference for driving external binaries over raw syscalls.
#[cfg(unix)]
fn current_uid_gid() -> Option<String> {
    let uid = std::process::Command::new("id").arg("-u").output().ok()?;
    let gid = std::process::Command::new("id").arg("-g").output().ok()?;
    if !uid.status.success() || !gid.status.success() {
        return None;
    }
    let uid = String::from_utf8(uid.stdout).ok()?.trim().to_string();
    let gid = String::from_utf8(gid.stdout).ok()?.trim().to_string();
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(unix))]
fn current_uid_gid() -> Option<String> {
    None
}
