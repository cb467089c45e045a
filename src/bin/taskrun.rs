//! `taskrun` — the command-line entrypoint that loads a task, builds its
//! dependency graph, and drives it to completion.
//!
//! This binary owns everything the engine itself stays deliberately blind
//! to: argument parsing, log initialization, translating a finished
//! [`taskrunner::task::dispatcher::TaskOutcome`] into a process exit code,
//! and wiring up the Ctrl-C listener that turns a terminal interrupt into a
//! `TaskEvent::UserRequestedCancellation`.

use clap::Parser;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::ExitCode;
use taskrunner::task::config::{load_task, RunOverrides};
use taskrunner::task::daemon_docker::DockerCliDaemon;
use taskrunner::task::dispatcher::Dispatcher;
use taskrunner::task::graph::DependencyGraph;
use taskrunner::task::planner::CleanupPolicy;
use taskrunner::task::state_machine::TaskStateMachine;
use taskrunner::task::status::{ManualCleanup, TaskStatus};
use tracing::{error, info};

/// Sentinel exit code used when the engine failed before any task exit
/// code was ever observed — see DESIGN.md for why `125` was picked.
const EXIT_ENGINE_FAILURE: u8 = 125;

/// Sentinel exit code used when cleanup was left for the caller to do by
/// hand, either because the run failed with `--no-cleanup-on-failure` or
/// succeeded with `--no-cleanup-on-success` (or `--no-cleanup` covered
/// both).
const EXIT_MANUAL_CLEANUP_REQUIRED: u8 = 126;

#[derive(Debug, Parser)]
#[command(name = "taskrun", about = "Run a declaratively-defined task inside ephemeral Docker containers")]
struct Cli {
    /// Name of the task to run, as declared under `tasks:` in the config file.
    task_name: String,

    /// Path to the task configuration file.
    #[arg(long, default_value = "taskrunner.yml")]
    config: PathBuf,

    /// Directory task-relative build contexts and volume paths are resolved
    /// against. Defaults to the config file's own directory.
    #[arg(long)]
    project_directory: Option<PathBuf>,

    /// Replace a container's configured image, skipping both build and pull
    /// for it. May be given multiple times, once per `container=image` pair.
    #[arg(short = 'o', long = "override-image", value_name = "CONTAINER=IMAGE")]
    override_image: Vec<String>,

    /// Never clean up containers or the task network automatically,
    /// regardless of outcome.
    #[arg(long)]
    no_cleanup: bool,

    /// Leave containers and the task network running if the task fails.
    #[arg(long)]
    no_cleanup_on_failure: bool,

    /// Leave containers and the task network running if the task succeeds.
    #[arg(long)]
    no_cleanup_on_success: bool,

    /// Cap on concurrently dispatched steps. Defaults to the number of
    /// logical CPUs.
    #[arg(long)]
    max_parallel_steps: Option<usize>,
}

impl Cli {
    fn cleanup_policy(&self) -> CleanupPolicy {
        if self.no_cleanup {
            CleanupPolicy::NeverCleanup
        } else if self.no_cleanup_on_failure {
            CleanupPolicy::DontCleanupOnFailure
        } else if self.no_cleanup_on_success {
            CleanupPolicy::DontCleanupOnSuccess
        } else {
            CleanupPolicy::CleanupAlways
        }
    }

    fn run_overrides(&self) -> Result<RunOverrides, String> {
        let mut overrides = RunOverrides::default();
        for entry in &self.override_image {
            let (container, image) = entry.split_once('=').ok_or_else(|| {
                format!("--override-image {entry:?} is not in `container=image` form")
            })?;
            overrides
                .image_overrides
                .insert(container.to_string(), image.to_string());
        }
        overrides.max_parallel_steps = self.max_parallel_steps;
        Ok(overrides)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let overrides = match cli.run_overrides() {
        Ok(overrides) => overrides,
        Err(message) => {
            error!("{message}");
            return ExitCode::from(EXIT_ENGINE_FAILURE);
        }
    };

    // project_directory only affects where relative build contexts and
    // volume paths resolve from; the loader itself reads `--config` as
    // given, so this only needs threading through once the loader grows
    // path resolution beyond the config file's own directory.
    let _ = &cli.project_directory;

    let config = match load_task(&cli.config, &cli.task_name, &overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_ENGINE_FAILURE);
        }
    };

    let graph = match DependencyGraph::build(&config) {
        Ok(graph) => graph,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_ENGINE_FAILURE);
        }
    };

    let daemon = match DockerCliDaemon::new().await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_ENGINE_FAILURE);
        }
    };

    let concurrency = overrides.max_parallel_steps.unwrap_or_else(num_cpus::get);
    let cleanup_policy = cli.cleanup_policy();
    let state_machine = TaskStateMachine::new(config.clone(), graph, cleanup_policy);
    let dispatcher = Dispatcher::new(state_machine, config, daemon, concurrency);

    let ctrl_c_dispatcher = dispatcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, requesting cancellation");
            ctrl_c_dispatcher.request_cancellation();
        }
    });

    // `Dispatcher::run` itself observes cancellation (it cancels the token
    // on a run-stage failure and setup-command steps check it directly); a
    // Ctrl-C just posts the same event an ordinary failure would, so there
    // is nothing else to race here — wait for the one real completion path.
    //
    // `catch_unwind` here isn't recovery: an engine invariant violation is a
    // bug, and the process still goes down for it. It exists only so the
    // panic message reaches the log writer before that happens instead of
    // racing the unwind.
    let outcome = match AssertUnwindSafe(dispatcher.run()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            error!("engine invariant violated: {message}");
            std::process::abort();
        }
    };

    for command in &outcome.manual_cleanup_commands {
        eprintln!("{command}");
    }

    match outcome.status {
        TaskStatus::Succeeded => match outcome.manual_cleanup {
            ManualCleanup::None => match outcome.exit_code {
                Some(code) if code != 0 => exit_code_from_task(code),
                _ => ExitCode::SUCCESS,
            },
            _ => ExitCode::from(EXIT_MANUAL_CLEANUP_REQUIRED),
        },
        TaskStatus::Failed => match outcome.manual_cleanup {
            ManualCleanup::None => match outcome.exit_code {
                Some(code) if code != 0 => exit_code_from_task(code),
                _ => ExitCode::from(EXIT_ENGINE_FAILURE),
            },
            _ => ExitCode::from(EXIT_MANUAL_CLEANUP_REQUIRED),
        },
        TaskStatus::Running => {
            error!("dispatcher returned while the task was still running; this is a bug");
            ExitCode::from(EXIT_ENGINE_FAILURE)
        }
    }
}

fn exit_code_from_task(code: i32) -> ExitCode {
    let clamped = u8::try_from(code).unwrap_or(EXIT_ENGINE_FAILURE);
    ExitCode::from(clamped)
}
