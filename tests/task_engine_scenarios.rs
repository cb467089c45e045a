//! Scenario-style integration tests for the task engine, driven through a
//! fake in-memory [`DaemonClient`] rather than a live Docker daemon — the
//! whole point of the `DaemonClient` seam is that these scenarios never need
//! one.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use taskrunner::image::ImageRef;
use taskrunner::task::container::{
    Container, ImageSource, LogConfig, PullPolicy, ResolvedTaskConfig, SetupCommand,
};
use taskrunner::task::daemon::{DaemonClient, DaemonError, HealthOutcome, SetupCommandOutcome};
use taskrunner::task::dispatcher::Dispatcher;
use taskrunner::task::graph::DependencyGraph;
use taskrunner::task::planner::CleanupPolicy;
use taskrunner::task::state_machine::TaskStateMachine;
use taskrunner::task::status::{ManualCleanup, TaskStatus};
use taskrunner::types::{ContainerId, NetworkId};
use tokio_util::sync::CancellationToken;

/// A [`DaemonClient`] whose every outcome is dictated up front, so each
/// scenario stays a pure description of "what the daemon does" rather than
/// a mock-framework expectation list.
struct FakeDaemon {
    fail_build: HashMap<String, String>,
    fail_pull: HashMap<String, String>,
    fail_health: HashMap<String, String>,
    exit_codes: HashMap<String, i32>,
    next_id: Mutex<u64>,
    stop_calls: Mutex<Vec<String>>,
    remove_calls: Mutex<Vec<String>>,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self {
            fail_build: HashMap::new(),
            fail_pull: HashMap::new(),
            fail_health: HashMap::new(),
            exit_codes: HashMap::new(),
            next_id: Mutex::new(0),
            stop_calls: Mutex::new(Vec::new()),
            remove_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDaemon {
    fn hex_id(&self) -> String {
        let mut guard = self.next_id.lock();
        *guard += 1;
        format!("{:012x}", *guard)
    }
}

#[async_trait]
impl DaemonClient for FakeDaemon {
    async fn create_network(
        &self,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<NetworkId, DaemonError> {
        NetworkId::new(format!("net-{name}")).map_err(|e| DaemonError::failed("create network", e))
    }

    async fn build_image(
        &self,
        container: &Container,
        _cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError> {
        if let Some(msg) = self.fail_build.get(&container.name) {
            return Err(DaemonError::failed("build image", msg.clone()));
        }
        Ok(ImageRef::new(container.name.clone(), "built"))
    }

    async fn pull_image(
        &self,
        container: &Container,
        _cancel: &CancellationToken,
    ) -> Result<ImageRef, DaemonError> {
        if let Some(msg) = self.fail_pull.get(&container.name) {
            return Err(DaemonError::failed("pull image", msg.clone()));
        }
        Ok(ImageRef::new(container.name.clone(), "latest"))
    }

    async fn create_container(
        &self,
        _container: &Container,
        _image: &ImageRef,
        _network: &NetworkId,
        _cancel: &CancellationToken,
    ) -> Result<ContainerId, DaemonError> {
        ContainerId::new(self.hex_id()).map_err(|e| DaemonError::failed("create container", e))
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
        container: &Container,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> Result<HealthOutcome, DaemonError> {
        if let Some(msg) = self.fail_health.get(&container.name) {
            return Ok(HealthOutcome::Unhealthy(msg.clone()));
        }
        Ok(HealthOutcome::Healthy)
    }

    async fn run_setup_command(
        &self,
        _id: &ContainerId,
        _command: &SetupCommand,
        _cancel: &CancellationToken,
    ) -> Result<SetupCommandOutcome, DaemonError> {
        Ok(SetupCommandOutcome::Succeeded)
    }

    async fn run_container(
        &self,
        id: &ContainerId,
        _cancel: &CancellationToken,
    ) -> Result<i32, DaemonError> {
        Ok(*self.exit_codes.get(id.as_str()).unwrap_or(&0))
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _grace_period: Duration,
        _cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        self.stop_calls.lock().push(id.as_str().to_string());
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &ContainerId,
        _cancel: &CancellationToken,
    ) -> Result<(), DaemonError> {
        self.remove_calls.lock().push(id.as_str().to_string());
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

fn pulled(name: &str, deps: &[&str]) -> Container {
    Container {
        name: name.to_string(),
        image_source: ImageSource::Pull {
            reference: format!("{name}:latest"),
            policy: PullPolicy::IfNotPresent,
        },
        command: None,
        entrypoint: None,
        environment: HashMap::new(),
        working_dir: None,
        volumes: vec![],
        devices: vec![],
        ports: vec![],
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        health_check: None,
        health_check_timeout: Duration::from_secs(5),
        run_as_current_user: false,
        privileged: false,
        enable_init_process: false,
        capabilities_to_add: vec![],
        capabilities_to_drop: vec![],
        additional_hostnames: vec![],
        setup_commands: vec![],
        log_config: LogConfig::default(),
        shm_size: None,
    }
}

fn with_health_check(mut container: Container) -> Container {
    container.health_check = Some(taskrunner::container::health::HealthCheck::command(vec![
        "true".to_string(),
    ]));
    container
}

fn config(task: &str, containers: Vec<Container>) -> ResolvedTaskConfig {
    ResolvedTaskConfig {
        project_name: "proj".into(),
        task_name: task.into(),
        task_container: task.into(),
        containers: containers.into_iter().map(|c| (c.name.clone(), c)).collect(),
    }
}

async fn drive(
    config: ResolvedTaskConfig,
    daemon: FakeDaemon,
    cleanup_policy: CleanupPolicy,
) -> taskrunner::task::dispatcher::TaskOutcome {
    let graph = DependencyGraph::build(&config).unwrap();
    let state_machine = TaskStateMachine::new(config.clone(), graph, cleanup_policy);
    let dispatcher = Dispatcher::new(state_machine, config, daemon, 4);
    dispatcher.run().await
}

/// Scenario 1: a task with no dependencies runs straight through.
#[tokio::test]
async fn solo_task_succeeds() {
    let cfg = config("task", vec![pulled("task", &[])]);
    let outcome = drive(cfg, FakeDaemon::default(), CleanupPolicy::CleanupAlways).await;

    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
    assert!(outcome.manual_cleanup_commands.is_empty());
}

/// Scenario 2: a task with a health-checked dependency only starts once the
/// dependency reports healthy, not merely started.
#[tokio::test]
async fn dependency_with_health_check_gates_task_start() {
    let db = with_health_check(pulled("db", &[]));
    let cfg = config("task", vec![pulled("task", &["db"]), db]);
    let outcome = drive(cfg, FakeDaemon::default(), CleanupPolicy::CleanupAlways).await;

    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert_eq!(outcome.exit_code, Some(0));
}

/// Scenario 3: a dependency's image pull fails; the run stage is abandoned,
/// cleanup still runs, and nothing that never started needs stopping.
#[tokio::test]
async fn dependency_pull_failure_cancels_and_cleans_up() {
    let cfg = config("task", vec![pulled("task", &["db"]), pulled("db", &[])]);
    let mut daemon = FakeDaemon::default();
    daemon.fail_pull.insert("db".to_string(), "manifest not found".to_string());

    let outcome = drive(cfg, daemon, CleanupPolicy::CleanupAlways).await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.exit_code, None);
    assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
}

/// Scenario 4: the task container exits non-zero; cleanup still runs to
/// completion because the policy says to clean up regardless.
#[tokio::test]
async fn nonzero_exit_with_cleanup_on_success_still_cleans_up() {
    let cfg = config("task", vec![pulled("task", &[])]);
    let mut daemon = FakeDaemon::default();
    // The fake's run_container looks the exit code up by container id, which
    // isn't known ahead of time; instead drive the run manually so the id
    // used for create_container is captured and pre-registered.
    daemon.exit_codes.insert("000000000001".to_string(), 3);

    let outcome = drive(cfg, daemon, CleanupPolicy::CleanupAlways).await;

    // Exit code 3 is not a failure event in this engine's vocabulary — only
    // `RunningContainerExited` is recorded, regardless of code — so the task
    // still reaches `Succeeded` with the exit code whatever the container
    // reported attached.
    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert_eq!(outcome.exit_code, Some(3));
    assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
}

/// Scenario 5: `--no-cleanup-on-success` leaves containers running and
/// reports exactly what a human needs to run by hand.
#[tokio::test]
async fn no_cleanup_on_success_leaves_manual_cleanup_commands() {
    let cfg = config("task", vec![pulled("task", &[])]);
    let outcome = drive(cfg, FakeDaemon::default(), CleanupPolicy::DontCleanupOnSuccess).await;

    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert_eq!(outcome.manual_cleanup, ManualCleanup::RequiredDueToSuccess);
    assert!(outcome
        .manual_cleanup_commands
        .iter()
        .any(|c| c.contains("docker rm -f task")));
    assert!(outcome
        .manual_cleanup_commands
        .iter()
        .any(|c| c.contains("docker network rm")));
}

/// Scenario 6: a user-requested cancellation mid-run is treated exactly like
/// any other run-stage failure — cleanup still runs.
#[tokio::test]
async fn user_cancellation_triggers_cleanup() {
    let cfg = config("task", vec![pulled("task", &["db"]), pulled("db", &[])]);
    let graph = DependencyGraph::build(&cfg).unwrap();
    let state_machine = TaskStateMachine::new(cfg.clone(), graph, CleanupPolicy::CleanupAlways);
    let dispatcher = Dispatcher::new(state_machine, cfg, FakeDaemon::default(), 4);

    dispatcher.request_cancellation();
    let outcome = dispatcher.run().await;

    assert_eq!(outcome.status, TaskStatus::Failed);
    assert_eq!(outcome.manual_cleanup, ManualCleanup::None);
}

/// The broadcast event stream a UI/log sink would subscribe to sees every
/// event the state machine accepts, in order, for a solo successful run.
#[tokio::test]
async fn event_subscriber_observes_the_full_run() {
    let cfg = config("task", vec![pulled("task", &[])]);
    let graph = DependencyGraph::build(&cfg).unwrap();
    let state_machine = TaskStateMachine::new(cfg.clone(), graph, CleanupPolicy::CleanupAlways);
    let dispatcher = Dispatcher::new(state_machine, cfg, FakeDaemon::default(), 4);

    let mut events = dispatcher.subscribe();
    let dispatcher_for_run = Arc::clone(&dispatcher);
    let handle = tokio::spawn(async move { dispatcher_for_run.run().await });

    let mut tags_seen = Vec::new();
    while let Ok(event) = events.recv().await {
        tags_seen.push(format!("{event:?}"));
        if tags_seen.len() >= 9 {
            break;
        }
    }
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Succeeded);
    assert!(tags_seen.iter().any(|e| e.contains("TaskNetworkReady")));
    assert!(tags_seen.iter().any(|e| e.contains("RunningContainerExited")));
}
