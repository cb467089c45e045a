//! The worker-pool loop that drives a [`TaskStateMachine`] to completion by
//! repeatedly asking it for the next step and running it via a
//! [`DaemonClient`].
//!
//! `Dispatcher` owns the only mutable access path into the state machine;
//! every worker talks to it exclusively through [`Dispatcher::post_event`]
//! and `pop_next_step` — workers run outside the mutex, rules evaluate
//! under it.

use crate::task::container::{Container, ResolvedTaskConfig};
use crate::task::daemon::{DaemonClient, HealthOutcome, SetupCommandOutcome};
use crate::task::event::TaskEvent;
use crate::task::state_machine::TaskStateMachine;
use crate::task::status::{ManualCleanup, TaskStatus};
use crate::task::step::{NextStep, TaskStep};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Grace period given to a running container before `docker stop` sends
/// `SIGKILL`.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Everything a caller needs once a run has finished: the engine's own
/// `TaskStatus` plus the exit code and manual-cleanup detail a downstream
/// caller needs alongside it.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Whether the run succeeded, failed, or (never observed here) is
    /// still in progress.
    pub status: TaskStatus,
    /// The task container's exit code, if the run got far enough to have one.
    pub exit_code: Option<i32>,
    /// Whether the caller needs to clean up by hand, and why.
    pub manual_cleanup: ManualCleanup,
    /// Commands to run by hand if `manual_cleanup` isn't `None`.
    pub manual_cleanup_commands: Vec<String>,
}

/// Drives one task run by repeatedly popping the next step from a
/// [`TaskStateMachine`] and executing it through a [`DaemonClient`], using a
/// bounded pool of concurrent workers. Default worker count is the caller's
/// responsibility to pick; see `taskrun`'s CLI default of `num_cpus::get()`.
pub struct Dispatcher<D: DaemonClient + 'static> {
    state: Mutex<TaskStateMachine>,
    config: ResolvedTaskConfig,
    daemon: D,
    notify: Notify,
    cancellation: CancellationToken,
    events_tx: broadcast::Sender<TaskEvent>,
    concurrency: usize,
}

impl<D: DaemonClient + 'static> Dispatcher<D> {
    /// Build a dispatcher for a freshly constructed state machine.
    /// `concurrency` bounds how many steps may run at once; it is clamped
    /// to at least 1.
    pub fn new(
        state: TaskStateMachine,
        config: ResolvedTaskConfig,
        daemon: D,
        concurrency: usize,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(state),
            config,
            daemon,
            notify: Notify::new(),
            cancellation: CancellationToken::new(),
            events_tx,
            concurrency: concurrency.max(1),
        })
    }

    /// Subscribe to every event the state machine accepts, for UI/log sinks.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events_tx.subscribe()
    }

    /// The cancellation token workers observe. Cancel it directly to model
    /// a user interrupt (the `UserRequestedCancellation` path); posting a
    /// run-stage failure event cancels it automatically.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Post a user cancellation request, exactly as a Ctrl-C handler would.
    pub fn request_cancellation(&self) {
        self.post_event(TaskEvent::UserRequestedCancellation);
    }

    fn post_event(&self, event: TaskEvent) {
        let is_failure = event.is_failure();
        {
            let mut sm = self.state.lock();
            sm.post_event(event.clone());
        }
        debug!(?event, "posted event");
        let _ = self.events_tx.send(event);
        if is_failure {
            // Set on first failure event in the run stage, and on user
            // interrupt. Cancelling again once cleanup is also failing is
            // harmless — `CancellationToken::cancel` is idempotent.
            self.cancellation.cancel();
        }
        self.notify.notify_waiters();
    }

    fn container(&self, name: &str) -> &Container {
        &self.config.containers[name]
    }

    /// Drive the state machine to completion, dispatching every step
    /// through `self.daemon`, until `pop_next_step` reports
    /// `NextStep::NoneAndIdle` — the machine always reaches that state
    /// unless the process is killed.
    pub async fn run(self: Arc<Self>) -> TaskOutcome {
        let mut join_set: JoinSet<()> = JoinSet::new();

        loop {
            let steps_still_running = !join_set.is_empty();
            let next = {
                let mut sm = self.state.lock();
                sm.pop_next_step(steps_still_running)
            };

            match next {
                NextStep::Step(step) => {
                    debug!(step = step.tag(), container = step.container(), "dispatching step");
                    while join_set.len() >= self.concurrency {
                        drain_one(&mut join_set).await;
                    }
                    let this = Arc::clone(&self);
                    join_set.spawn(async move { this.run_step(step).await });
                }
                NextStep::NoneReady => {
                    if join_set.is_empty() {
                        // Nothing in flight and nothing ready is unreachable
                        // outside cleanup-failure recovery, and
                        // `pop_next_step` already panics for that case, so by
                        // construction we only get here while something
                        // genuinely is running — this arm exists for the
                        // brief window between a worker finishing and its
                        // event being posted.
                        self.notify.notified().await;
                    } else {
                        tokio::select! {
                            _ = self.notify.notified() => {}
                            () = drain_one(&mut join_set) => {}
                        }
                    }
                }
                NextStep::NoneAndIdle => break,
            }
        }

        while !join_set.is_empty() {
            drain_one(&mut join_set).await;
        }

        let sm = self.state.lock();
        TaskOutcome {
            status: sm.status(),
            exit_code: sm.task_exit_code(),
            manual_cleanup: sm.manual_cleanup(),
            manual_cleanup_commands: sm.manual_cleanup_commands(),
        }
    }

    async fn run_step(self: Arc<Self>, step: TaskStep) {
        let event = self.execute(&step).await;
        self.post_event(event);
    }

    async fn execute(&self, step: &TaskStep) -> TaskEvent {
        let cancel = &self.cancellation;
        match step {
            TaskStep::PrepareTaskNetwork => {
                let name = format!("{}-{}", self.config.project_name, self.config.task_name);
                match self.daemon.create_network(&name, cancel).await {
                    Ok(id) => TaskEvent::TaskNetworkReady(id),
                    Err(e) => TaskEvent::TaskNetworkFailed(e.message()),
                }
            }
            TaskStep::BuildImage(name) => {
                let container = self.container(name);
                match self.daemon.build_image(container, cancel).await {
                    Ok(image) => TaskEvent::ImageBuilt(name.clone(), image),
                    Err(e) => TaskEvent::ImageBuildFailed(name.clone(), e.message()),
                }
            }
            TaskStep::PullImage(name) => {
                let container = self.container(name);
                match self.daemon.pull_image(container, cancel).await {
                    Ok(image) => TaskEvent::ImagePulled(name.clone(), image),
                    Err(e) => TaskEvent::ImagePullFailed(name.clone(), e.message()),
                }
            }
            TaskStep::CreateContainer(name, image, network) => {
                let container = self.container(name);
                match self
                    .daemon
                    .create_container(container, image, network, cancel)
                    .await
                {
                    Ok(id) => TaskEvent::ContainerCreated(name.clone(), id),
                    Err(e) => TaskEvent::ContainerCreationFailed(name.clone(), e.message()),
                }
            }
            TaskStep::StartContainer(name, id) => {
                match self.daemon.start_container(id, cancel).await {
                    Ok(()) => TaskEvent::ContainerStarted(name.clone()),
                    Err(e) => TaskEvent::ContainerStartFailed(name.clone(), e.message()),
                }
            }
            TaskStep::WaitForHealth(name, id) => {
                let container = self.container(name);
                match self
                    .daemon
                    .wait_for_health(id, container, container.health_check_timeout, cancel)
                    .await
                {
                    Ok(HealthOutcome::Healthy) => TaskEvent::ContainerBecameHealthy(name.clone()),
                    Ok(HealthOutcome::Unhealthy(msg)) => {
                        TaskEvent::ContainerDidNotBecomeHealthy(name.clone(), msg)
                    }
                    Err(e) => TaskEvent::ContainerDidNotBecomeHealthy(name.clone(), e.message()),
                }
            }
            TaskStep::RunSetupCommands(name, id) => {
                let container = self.container(name);
                for command in &container.setup_commands {
                    if cancel.is_cancelled() {
                        return TaskEvent::SetupCommandFailed(
                            name.clone(),
                            command.command.join(" "),
                            "cancelled".to_string(),
                        );
                    }
                    match self.daemon.run_setup_command(id, command, cancel).await {
                        Ok(SetupCommandOutcome::Succeeded) => {}
                        Ok(SetupCommandOutcome::Failed(msg)) => {
                            return TaskEvent::SetupCommandFailed(
                                name.clone(),
                                command.command.join(" "),
                                msg,
                            );
                        }
                        Err(e) => {
                            return TaskEvent::SetupCommandFailed(
                                name.clone(),
                                command.command.join(" "),
                                e.message(),
                            );
                        }
                    }
                }
                TaskEvent::SetupCommandsCompleted(name.clone())
            }
            TaskStep::RunContainer(name, id) => match self.daemon.run_container(id, cancel).await {
                Ok(exit_code) => TaskEvent::RunningContainerExited(name.clone(), exit_code),
                Err(e) => {
                    warn!("failed to run task container {name}: {e}");
                    TaskEvent::RunningContainerExited(name.clone(), 125)
                }
            },
            // The event sum has no `*Failed` case for stop/remove/
            // delete-network — see DESIGN.md. A daemon error here is logged
            // and the step is still treated as complete so cleanup always
            // reaches `DeleteTaskNetwork`/`NoneAndIdle` rather than wedging;
            // anything actually left behind is caught by the manual-cleanup
            // command list instead.
            TaskStep::StopContainer(name, id) => {
                if let Err(e) = self.daemon.stop_container(id, STOP_GRACE_PERIOD, cancel).await {
                    warn!("failed to stop container {name}: {e}");
                }
                TaskEvent::ContainerStopped(name.clone())
            }
            TaskStep::RemoveContainer(name, id) => {
                if let Err(e) = self.daemon.remove_container(id, cancel).await {
                    warn!("failed to remove container {name}: {e}; leaving it for manual cleanup");
                }
                TaskEvent::ContainerRemoved(name.clone())
            }
            TaskStep::DeleteTaskNetwork(id) => {
                if let Err(e) = self.daemon.delete_network(id, cancel).await {
                    warn!("failed to delete task network: {e}");
                }
                TaskEvent::TaskNetworkRemoved
            }
        }
    }
}

/// Join exactly one finished worker, logging (not panicking on) a worker
/// panic — a bug in one step runner shouldn't take the whole dispatcher
/// down mid-cleanup.
async fn drain_one(join_set: &mut JoinSet<()>) {
    if let Some(result) = join_set.join_next().await {
        if let Err(e) = result {
            error!("step task panicked: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageRef;
    use crate::task::container::{ImageSource, LogConfig, PullPolicy};
    use crate::task::daemon::DaemonError;
    use crate::task::graph::DependencyGraph;
    use crate::task::planner::CleanupPolicy;
    use crate::types::{ContainerId, NetworkId};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeDaemon {
        fail_pull: bool,
        counter: AtomicU32,
    }

    impl FakeDaemon {
        fn new(fail_pull: bool) -> Self {
            Self {
                fail_pull,
                counter: AtomicU32::new(0),
            }
        }

        fn next_id(&self, prefix: &str) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}-{n}")
        }
    }

    #[async_trait]
    impl DaemonClient for FakeDaemon {
        async fn create_network(
            &self,
            _name: &str,
            _cancel: &CancellationToken,
        ) -> Result<NetworkId, DaemonError> {
            Ok(NetworkId::new_unchecked(self.next_id("net")))
        }

        async fn build_image(
            &self,
            container: &Container,
            _cancel: &CancellationToken,
        ) -> Result<ImageRef, DaemonError> {
            Ok(ImageRef::new(container.name.clone(), "latest"))
        }

        async fn pull_image(
            &self,
            container: &Container,
            _cancel: &CancellationToken,
        ) -> Result<ImageRef, DaemonError> {
            if self.fail_pull {
                return Err(DaemonError::failed("pull", "image not found"));
            }
            Ok(ImageRef::new(container.name.clone(), "latest"))
        }

        async fn create_container(
            &self,
            container: &Container,
            _image: &ImageRef,
            _network: &NetworkId,
            _cancel: &CancellationToken,
        ) -> Result<ContainerId, DaemonError> {
            Ok(ContainerId::new_unchecked(format!("{}-id", container.name)))
        }

        async fn start_container(
            &self,
            _id: &ContainerId,
            _cancel: &CancellationToken,
        ) -> Result<(), DaemonError> {
            Ok(())
        }

        async fn wait_for_health(
            &self,
            _id: &ContainerId,
            _container: &Container,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> Result<HealthOutcome, DaemonError> {
            Ok(HealthOutcome::Healthy)
        }

        async fn run_setup_command(
            &self,
            _id: &ContainerId,
            _command: &crate::task::container::SetupCommand,
            _cancel: &CancellationToken,
        ) -> Result<SetupCommandOutcome, DaemonError> {
            Ok(SetupCommandOutcome::Succeeded)
        }

        async fn run_container(
            &self,
            _id: &ContainerId,
            _cancel: &CancellationToken,
        ) -> Result<i32, DaemonError> {
            Ok(0)
        }

        async fn stop_container(
            &self,
            _id: &ContainerId,
            _grace_period: Duration,
            _cancel: &CancellationToken,
        ) -> Result<(), DaemonError> {
            Ok(())
        }

        async fn remove_container(
            &self,
            _id: &ContainerId,
            _cancel: &CancellationToken,
        ) -> Result<(), DaemonError> {
            Ok(())
        }

        async fn delete_network(
            &self,
            _id: &NetworkId,
            _cancel: &CancellationToken,
        ) -> Result<(), DaemonError> {
            Ok(())
        }
    }

    fn solo_task() -> ResolvedTaskConfig {
        let container = Container {
            name: "task".to_string(),
            image_source: ImageSource::Pull {
                reference: "task:latest".to_string(),
                policy: PullPolicy::IfNotPresent,
            },
            command: None,
            entrypoint: None,
            environment: HashMap::new(),
            working_dir: None,
            volumes: vec![],
            devices: vec![],
            ports: vec![],
            dependencies: vec![],
            health_check: None,
            health_check_timeout: Duration::from_secs(30),
            run_as_current_user: false,
            privileged: false,
            enable_init_process: false,
            capabilities_to_add: vec![],
            capabilities_to_drop: vec![],
            additional_hostnames: vec![],
            setup_commands: vec![],
            log_config: LogConfig::default(),
            shm_size: None,
        };
        ResolvedTaskConfig {
            project_name: "proj".into(),
            task_name: "task".into(),
            task_container: "task".into(),
            containers: [("task".to_string(), container)].into(),
        }
    }

    #[tokio::test]
    async fn solo_task_run_succeeds_end_to_end() {
        let config = solo_task();
        let graph = DependencyGraph::build(&config).unwrap();
        let sm = TaskStateMachine::new(config.clone(), graph, CleanupPolicy::CleanupAlways);
        let dispatcher = Dispatcher::new(sm, config, FakeDaemon::new(false), 4);

        let outcome = dispatcher.run().await;
        assert_eq!(outcome.status, TaskStatus::Succeeded);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
    }

    #[tokio::test]
    async fn failing_pull_still_reaches_idle_with_failed_status() {
        let config = solo_task();
        let graph = DependencyGraph::build(&config).unwrap();
        let sm = TaskStateMachine::new(config.clone(), graph, CleanupPolicy::CleanupAlways);
        let dispatcher = Dispatcher::new(sm, config, FakeDaemon::new(true), 4);

        let outcome = dispatcher.run().await;
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.exit_code, None);
        assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
    }
}
