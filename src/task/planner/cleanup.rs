//! Builds the cleanup stage from whatever the run stage actually managed to
//! create before the task finished or failed.
//!
//! Unlike the run stage, which is planned once from static configuration,
//! the cleanup stage is planned from the accumulated event log: only
//! containers that actually got an `id` from the daemon need removing, and
//! only those that actually started need stopping first.

use crate::task::container::ResolvedTaskConfig;
use crate::task::event::EventLog;
use crate::task::graph::DependencyGraph;
use crate::task::rules::{
    DeleteTaskNetworkRule, RemoveContainerRule, StepRule, StopContainerRule,
};
use crate::task::stage::Stage;

/// Policy controlling whether cleanup runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Always clean up, regardless of outcome.
    CleanupAlways,
    /// Skip cleanup if the task failed (leave containers for postmortem).
    DontCleanupOnFailure,
    /// Skip cleanup if the task succeeded.
    DontCleanupOnSuccess,
    /// Never clean up automatically.
    NeverCleanup,
}

impl CleanupPolicy {
    /// Whether cleanup should run automatically given the task's outcome.
    pub fn should_clean_up(self, task_failed: bool) -> bool {
        match self {
            Self::CleanupAlways => true,
            Self::DontCleanupOnFailure => !task_failed,
            Self::DontCleanupOnSuccess => task_failed,
            Self::NeverCleanup => false,
        }
    }
}

/// Constructs the cleanup stage's rule set.
pub struct CleanupStagePlanner;

impl CleanupStagePlanner {
    /// Build the cleanup stage from the containers the run stage actually
    /// created, in reverse dependency order (the task container, which
    /// depends on everything else, is stopped and removed first).
    pub fn build(graph: &DependencyGraph, events: &EventLog) -> Stage {
        let mut rules: Vec<Box<dyn StepRule>> = Vec::new();
        let mut created_containers = Vec::new();

        let mut reverse_order: Vec<_> = graph.nodes().map(|n| n.name.clone()).collect();
        reverse_order.reverse();

        for name in &reverse_order {
            let Some(handle) = events.container_id(name) else {
                continue;
            };
            created_containers.push(name.clone());
            let needs_stop = events.has(|e| {
                matches!(e, crate::task::event::TaskEvent::ContainerStarted(c) if c == name)
            });
            if needs_stop {
                rules.push(Box::new(StopContainerRule {
                    container: name.clone(),
                    handle: handle.clone(),
                }));
            }
            rules.push(Box::new(RemoveContainerRule {
                container: name.clone(),
                handle,
                needs_stop,
            }));
        }

        let network_ready = events.has(|e| {
            matches!(e, crate::task::event::TaskEvent::TaskNetworkReady(_))
        });
        if network_ready {
            if let Some(network) = events.find(|e| {
                matches!(e, crate::task::event::TaskEvent::TaskNetworkReady(_))
            }) {
                if let crate::task::event::TaskEvent::TaskNetworkReady(id) = network {
                    rules.push(Box::new(DeleteTaskNetworkRule {
                        network: id.clone(),
                        created_containers,
                    }));
                }
            }
        }

        Stage::new("cleanup", rules)
    }

    /// The manual-cleanup commands to print if automatic cleanup was skipped
    /// entirely by [`CleanupPolicy`].
    pub fn manual_cleanup_commands(
        config: &ResolvedTaskConfig,
        graph: &DependencyGraph,
        events: &EventLog,
    ) -> Vec<String> {
        let mut commands = Vec::new();
        for node in graph.nodes() {
            if events.container_id(&node.name).is_some() {
                commands.push(format!("docker rm -f {}", node.name));
            }
        }
        if events.has(|e| matches!(e, crate::task::event::TaskEvent::TaskNetworkReady(_))) {
            commands.push(format!(
                "docker network rm {}-{}",
                config.project_name, config.task_name
            ));
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::container::{Container, ImageSource, LogConfig, PullPolicy};
    use crate::task::event::TaskEvent;
    use crate::task::stage::StageOutcome;
    use crate::types::{ContainerId, NetworkId};
    use std::collections::HashMap;
    use std::time::Duration;

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
        }
    }

    #[test]
    fn only_created_containers_get_cleanup_rules() {
        let config = ResolvedTaskConfig {
            project_name: "proj".into(),
            task_name: "task".into(),
            task_container: "task".into(),
            containers: [
                ("task".to_string(), pulled("task", &["db"])),
                ("db".to_string(), pulled("db", &[])),
            ]
            .into(),
        };
        let graph = DependencyGraph::build(&config).unwrap();

        let mut events = EventLog::new();
        events.push(TaskEvent::TaskNetworkReady(NetworkId::new_unchecked(
            "net".to_string(),
        )));
        events.push(TaskEvent::ContainerCreated(
            "db".into(),
            ContainerId::new_unchecked("db-id".to_string()),
        ));
        events.push(TaskEvent::ContainerStarted("db".into()));

        let mut stage = CleanupStagePlanner::build(&graph, &events);
        let mut tags = Vec::new();
        loop {
            match stage.next(&events) {
                StageOutcome::StepReady(step) => {
                    tags.push(step.tag());
                    match &step {
                        crate::task::step::TaskStep::StopContainer(c, _) => {
                            events.push(TaskEvent::ContainerStopped(c.clone()));
                        }
                        crate::task::step::TaskStep::RemoveContainer(c, _) => {
                            events.push(TaskEvent::ContainerRemoved(c.clone()));
                        }
                        crate::task::step::TaskStep::DeleteTaskNetwork(_) => {
                            events.push(TaskEvent::TaskNetworkRemoved);
                        }
                        other => panic!("unexpected cleanup step: {other:?}"),
                    }
                }
                StageOutcome::NoStepsReady => panic!("cleanup should never stall here"),
                StageOutcome::Complete => break,
            }
        }
        assert_eq!(tags, vec!["stop_container", "remove_container", "delete_task_network"]);
    }
}
