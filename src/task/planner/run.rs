//! Builds the run stage: network, then every container's image/create/start/
//! health/setup chain, then the task container's own run step.

use crate::task::container::{ImageSource, ResolvedTaskConfig};
use crate::task::graph::DependencyGraph;
use crate::task::rules::{
    BuildImageRule, CreateContainerRule, PrepareTaskNetworkRule, PullImageRule, RunContainerRule,
    RunSetupCommandsRule, StartContainerRule, StepRule, WaitForHealthRule,
};
use crate::task::stage::Stage;

/// Constructs the run stage's rule set from a resolved configuration and its
/// validated dependency graph.
pub struct RunStagePlanner;

impl RunStagePlanner {
    /// Build the run stage. `graph`'s BFS order fixes the order rules are
    /// declared in, which in turn fixes which step wins when several rules
    /// become ready on the same tick.
    pub fn build(config: &ResolvedTaskConfig, graph: &DependencyGraph) -> Stage {
        let mut rules: Vec<Box<dyn StepRule>> = vec![Box::new(PrepareTaskNetworkRule)];

        for node in graph.nodes() {
            let container = &config.containers[&node.name];
            match &container.image_source {
                ImageSource::Build { .. } => rules.push(Box::new(BuildImageRule {
                    container: node.name.clone(),
                })),
                ImageSource::Pull { .. } => rules.push(Box::new(PullImageRule {
                    container: node.name.clone(),
                })),
            }
        }

        for node in graph.nodes() {
            rules.push(Box::new(CreateContainerRule {
                container: node.name.clone(),
            }));
        }

        for node in graph.nodes() {
            let dependencies = node
                .depends_on
                .iter()
                .map(|dep| (dep.clone(), config.containers[dep].has_health_check()))
                .collect();
            rules.push(Box::new(StartContainerRule {
                container: node.name.clone(),
                dependencies,
            }));
        }

        for node in graph.nodes() {
            // Fires for every container, not only those with a declared
            // health check: the no-check case still needs a `WaitForHealth`
            // step (the daemon client synthesizes `Healthy` immediately for
            // it), matching the boundary scenario where a solo pull-image
            // task with no health check still has `WaitForHealth(task)` in
            // its step sequence.
            rules.push(Box::new(WaitForHealthRule {
                container: node.name.clone(),
            }));
        }

        for node in graph.nodes() {
            let container = &config.containers[&node.name];
            rules.push(Box::new(RunSetupCommandsRule {
                container: node.name.clone(),
                has_health_check: container.has_health_check(),
            }));
        }

        let task = config.task_container();
        rules.push(Box::new(RunContainerRule {
            container: task.name.clone(),
            has_health_check: task.has_health_check(),
        }));

        Stage::new("run", rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::container::{Container, LogConfig, PullPolicy};
    use crate::task::event::TaskEvent;
    use crate::task::stage::StageOutcome;
    use crate::task::step::TaskStep;
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
    fn solo_task_run_stage_drives_straight_through() {
        let config = ResolvedTaskConfig {
            project_name: "proj".into(),
            task_name: "task".into(),
            task_container: "task".into(),
            containers: [("task".to_string(), pulled("task", &[]))].into(),
        };
        let graph = DependencyGraph::build(&config).unwrap();
        let mut stage = RunStagePlanner::build(&config, &graph);

        let mut events = crate::task::event::EventLog::new();
        let mut seen_tags = Vec::new();
        loop {
            match stage.next(&events) {
                StageOutcome::StepReady(step) => {
                    seen_tags.push(step.tag());
                    events.push(advance(&step));
                }
                StageOutcome::NoStepsReady => panic!("solo task should never stall"),
                StageOutcome::Complete => break,
            }
        }
        assert_eq!(
            seen_tags,
            vec![
                "prepare_task_network",
                "pull_image",
                "create_container",
                "start_container",
                "wait_for_health",
                "run_setup_commands",
                "run_container",
            ]
        );
    }

    fn advance(step: &TaskStep) -> TaskEvent {
        use crate::image::ImageRef;
        use crate::types::{ContainerId, NetworkId};
        match step {
            TaskStep::PrepareTaskNetwork => {
                TaskEvent::TaskNetworkReady(NetworkId::new_unchecked("net".to_string()))
            }
            TaskStep::PullImage(c) => {
                TaskEvent::ImagePulled(c.clone(), ImageRef::new(c.clone(), "latest"))
            }
            TaskStep::CreateContainer(c, _, _) => {
                TaskEvent::ContainerCreated(c.clone(), ContainerId::new_unchecked(format!("{c}-id")))
            }
            TaskStep::StartContainer(c, _) => TaskEvent::ContainerStarted(c.clone()),
            TaskStep::WaitForHealth(c, _) => TaskEvent::ContainerBecameHealthy(c.clone()),
            TaskStep::RunSetupCommands(c, _) => TaskEvent::SetupCommandsCompleted(c.clone()),
            TaskStep::RunContainer(c, _) => TaskEvent::RunningContainerExited(c.clone(), 0),
            other => panic!("unexpected step in solo-task fixture: {other:?}"),
        }
    }
}
