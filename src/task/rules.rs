//! The rule base: one rule type per step, each a pure predicate over the
//! accumulated event set.
//!
//! A rule never mutates anything and never remembers whether it already
//! fired — one-shot behaviour is enforced one layer up, by
//! `crate::task::stage::Stage`, which refuses to return a step tag it has
//! already handed out in the current stage. That keeps every rule here
//! exactly as advertised: "feed an event set, assert the emitted step."

use crate::task::event::{ContainerName, EventLog, TaskEvent};
use crate::image::ImageRef;
use crate::task::step::TaskStep;
use crate::types::{ContainerId, NetworkId};
use std::fmt;

/// What a rule decided, given the current event set.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// The rule's precondition holds; here is the step it wants run.
    Ready(TaskStep),
    /// The precondition does not hold yet.
    NotReady,
}

/// Common behaviour for every step rule.
pub trait StepRule: fmt::Debug + Send + Sync {
    /// Evaluate the rule's precondition against the accumulated events.
    fn evaluate(&self, events: &EventLog) -> RuleOutcome;

    /// Whether this rule's step has run to completion (succeeded or failed),
    /// as judged purely from the accumulated events. `Stage` uses this, not
    /// `evaluate`, to decide when a stage has nothing left to do — a rule can
    /// be `Ready` one moment and still in flight, so firing alone doesn't
    /// mean finished.
    fn is_complete(&self, events: &EventLog) -> bool;
}

fn container_id_of(events: &EventLog, name: &str) -> Option<ContainerId> {
    events.container_id(name)
}

fn resolved_image(events: &EventLog, name: &str) -> Option<ImageRef> {
    events
        .find(|e| {
            matches!(e, TaskEvent::ImageBuilt(c, _) if c == name)
                || matches!(e, TaskEvent::ImagePulled(c, _) if c == name)
        })
        .and_then(|e| match e {
            TaskEvent::ImageBuilt(_, img) | TaskEvent::ImagePulled(_, img) => Some(img.clone()),
            _ => None,
        })
}

fn task_network_id(events: &EventLog) -> Option<NetworkId> {
    events.find(|e| matches!(e, TaskEvent::TaskNetworkReady(_))).and_then(|e| match e {
        TaskEvent::TaskNetworkReady(id) => Some(id.clone()),
        _ => None,
    })
}

/// Sole initial rule: prepare the shared task network. Fires unconditionally
/// (its precondition is "always, once").
#[derive(Debug)]
pub struct PrepareTaskNetworkRule;

impl StepRule for PrepareTaskNetworkRule {
    fn evaluate(&self, _events: &EventLog) -> RuleOutcome {
        RuleOutcome::Ready(TaskStep::PrepareTaskNetwork)
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::TaskNetworkReady(_)) || matches!(e, TaskEvent::TaskNetworkFailed(_))
        })
    }
}

/// Fires once the network is ready, for a container whose image must be built.
#[derive(Debug)]
pub struct BuildImageRule {
    /// The container to build an image for.
    pub container: ContainerName,
}

impl StepRule for BuildImageRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        if events.has(|e| matches!(e, TaskEvent::TaskNetworkReady(_))) {
            RuleOutcome::Ready(TaskStep::BuildImage(self.container.clone()))
        } else {
            RuleOutcome::NotReady
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::ImageBuilt(c, _) if c == &self.container)
                || matches!(e, TaskEvent::ImageBuildFailed(c, _) if c == &self.container)
        })
    }
}

/// Fires once the network is ready, for a container whose image must be pulled.
#[derive(Debug)]
pub struct PullImageRule {
    /// The container to pull an image for.
    pub container: ContainerName,
}

impl StepRule for PullImageRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        if events.has(|e| matches!(e, TaskEvent::TaskNetworkReady(_))) {
            RuleOutcome::Ready(TaskStep::PullImage(self.container.clone()))
        } else {
            RuleOutcome::NotReady
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::ImagePulled(c, _) if c == &self.container)
                || matches!(e, TaskEvent::ImagePullFailed(c, _) if c == &self.container)
        })
    }
}

/// Fires once `container`'s image is available and the network is ready.
///
/// The network's daemon-assigned ID isn't known until `PrepareTaskNetwork`
/// actually runs, so unlike most rule fields this one is read out of the
/// event log at evaluation time rather than baked in at construction.
#[derive(Debug)]
pub struct CreateContainerRule {
    /// The container to create.
    pub container: ContainerName,
}

impl StepRule for CreateContainerRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        match (task_network_id(events), resolved_image(events, &self.container)) {
            (Some(network), Some(image)) => RuleOutcome::Ready(TaskStep::CreateContainer(
                self.container.clone(),
                image,
                network,
            )),
            _ => RuleOutcome::NotReady,
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::ContainerCreated(c, _) if c == &self.container)
                || matches!(e, TaskEvent::ContainerCreationFailed(c, _) if c == &self.container)
        })
    }
}

/// Fires once `container` has been created and every dependency is ready to
/// be depended on: healthy if it declares a health check, else merely
/// started.
#[derive(Debug)]
pub struct StartContainerRule {
    /// The container to start.
    pub container: ContainerName,
    /// `(dependency name, whether it declares a health check)` for every
    /// direct dependency.
    pub dependencies: Vec<(ContainerName, bool)>,
}

impl StepRule for StartContainerRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let Some(id) = container_id_of(events, &self.container) else {
            return RuleOutcome::NotReady;
        };
        let deps_ready = self
            .dependencies
            .iter()
            .all(|(dep, has_health_check)| events.dependency_ready(dep, *has_health_check));
        if deps_ready {
            RuleOutcome::Ready(TaskStep::StartContainer(self.container.clone(), id))
        } else {
            RuleOutcome::NotReady
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::ContainerStarted(c) if c == &self.container)
                || matches!(e, TaskEvent::ContainerStartFailed(c, _) if c == &self.container)
        })
    }
}

/// Fires once `container` has started; ends with either
/// `ContainerBecameHealthy` or `ContainerDidNotBecomeHealthy`.
#[derive(Debug)]
pub struct WaitForHealthRule {
    /// The container to health-check.
    pub container: ContainerName,
}

impl StepRule for WaitForHealthRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let started = events.has(|e| matches!(e, TaskEvent::ContainerStarted(c) if c == &self.container));
        if !started {
            return RuleOutcome::NotReady;
        }
        match container_id_of(events, &self.container) {
            Some(id) => RuleOutcome::Ready(TaskStep::WaitForHealth(self.container.clone(), id)),
            None => RuleOutcome::NotReady,
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::ContainerBecameHealthy(c) if c == &self.container)
                || matches!(e, TaskEvent::ContainerDidNotBecomeHealthy(c, _) if c == &self.container)
        })
    }
}

/// Fires once `container` is ready to be acted on (healthy if it declares a
/// health check, else merely started) and runs its setup commands. Every
/// container in the run stage gets one of these, including containers that
/// declare no setup commands at all — the step runner for `RunSetupCommands`
/// posts `SetupCommandsCompleted` immediately for those without ever calling
/// the daemon, so that synthesis lives in the runner, not in whether this
/// rule exists.
#[derive(Debug)]
pub struct RunSetupCommandsRule {
    /// The container whose setup commands should run.
    pub container: ContainerName,
    /// Whether `container` declares a health check, and so must reach
    /// `ContainerBecameHealthy` rather than just `ContainerStarted`.
    pub has_health_check: bool,
}

impl StepRule for RunSetupCommandsRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        if !events.dependency_ready(&self.container, self.has_health_check) {
            return RuleOutcome::NotReady;
        }
        match container_id_of(events, &self.container) {
            Some(id) => {
                RuleOutcome::Ready(TaskStep::RunSetupCommands(self.container.clone(), id))
            }
            None => RuleOutcome::NotReady,
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| {
            matches!(e, TaskEvent::SetupCommandsCompleted(c) if c == &self.container)
                || matches!(e, TaskEvent::SetupCommandFailed(c, _, _) if c == &self.container)
        })
    }
}

/// Fires once the task container is ready (healthy if it declares a health
/// check, else merely started) and its setup commands have completed.
/// Task-container only.
#[derive(Debug)]
pub struct RunContainerRule {
    /// The task container's name.
    pub container: ContainerName,
    /// Whether the task container declares a health check.
    pub has_health_check: bool,
}

impl StepRule for RunContainerRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let ready = events.dependency_ready(&self.container, self.has_health_check);
        let setup_done = events
            .has(|e| matches!(e, TaskEvent::SetupCommandsCompleted(c) if c == &self.container));
        if !(ready && setup_done) {
            return RuleOutcome::NotReady;
        }
        match container_id_of(events, &self.container) {
            Some(id) => RuleOutcome::Ready(TaskStep::RunContainer(self.container.clone(), id)),
            None => RuleOutcome::NotReady,
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| matches!(e, TaskEvent::RunningContainerExited(c, _) if c == &self.container))
    }
}

/// Cleanup-stage rule: stop a container that was started and hasn't already
/// exited or been stopped. Constructed only for containers the cleanup
/// planner decided actually need stopping.
#[derive(Debug)]
pub struct StopContainerRule {
    /// The container to stop.
    pub container: ContainerName,
    /// Its daemon handle.
    pub handle: ContainerId,
}

impl StepRule for StopContainerRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let already_stopped = events
            .has(|e| matches!(e, TaskEvent::ContainerStopped(c) if c == &self.container));
        let already_exited = events
            .has(|e| matches!(e, TaskEvent::RunningContainerExited(c, _) if c == &self.container));
        if already_stopped || already_exited {
            RuleOutcome::NotReady
        } else {
            RuleOutcome::Ready(TaskStep::StopContainer(
                self.container.clone(),
                self.handle.clone(),
            ))
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| matches!(e, TaskEvent::ContainerStopped(c) if c == &self.container))
            || events.has(
                |e| matches!(e, TaskEvent::RunningContainerExited(c, _) if c == &self.container),
            )
    }
}

/// Cleanup-stage rule: remove a created container once it no longer needs
/// stopping (either it was never started, or it has since stopped/exited).
#[derive(Debug)]
pub struct RemoveContainerRule {
    /// The container to remove.
    pub container: ContainerName,
    /// Its daemon handle.
    pub handle: ContainerId,
    /// Whether this container needs a `StopContainer` step before removal.
    pub needs_stop: bool,
}

impl StepRule for RemoveContainerRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let already_removed = events
            .has(|e| matches!(e, TaskEvent::ContainerRemoved(c) if c == &self.container));
        if already_removed {
            return RuleOutcome::NotReady;
        }
        let stop_satisfied = !self.needs_stop
            || events.has(|e| matches!(e, TaskEvent::ContainerStopped(c) if c == &self.container))
            || events.has(
                |e| matches!(e, TaskEvent::RunningContainerExited(c, _) if c == &self.container),
            );
        if stop_satisfied {
            RuleOutcome::Ready(TaskStep::RemoveContainer(
                self.container.clone(),
                self.handle.clone(),
            ))
        } else {
            RuleOutcome::NotReady
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| matches!(e, TaskEvent::ContainerRemoved(c) if c == &self.container))
    }
}

/// Cleanup-stage rule, last to fire: delete the shared task network once
/// every created container has been removed.
#[derive(Debug)]
pub struct DeleteTaskNetworkRule {
    /// The network to delete.
    pub network: NetworkId,
    /// Names of every container that was created and therefore must be
    /// removed before the network can go.
    pub created_containers: Vec<ContainerName>,
}

impl StepRule for DeleteTaskNetworkRule {
    fn evaluate(&self, events: &EventLog) -> RuleOutcome {
        let all_removed = self.created_containers.iter().all(|c| {
            events.has(|e| matches!(e, TaskEvent::ContainerRemoved(name) if name == c))
        });
        if all_removed {
            RuleOutcome::Ready(TaskStep::DeleteTaskNetwork(self.network.clone()))
        } else {
            RuleOutcome::NotReady
        }
    }

    fn is_complete(&self, events: &EventLog) -> bool {
        events.has(|e| matches!(e, TaskEvent::TaskNetworkRemoved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageRef;

    #[test]
    fn build_image_rule_waits_for_network() {
        let rule = BuildImageRule {
            container: "web".into(),
        };
        let mut events = EventLog::new();
        assert_eq!(rule.evaluate(&events), RuleOutcome::NotReady);
        events.push(TaskEvent::TaskNetworkReady(NetworkId::new_unchecked("net".to_string())));
        assert_eq!(
            rule.evaluate(&events),
            RuleOutcome::Ready(TaskStep::BuildImage("web".into()))
        );
    }

    #[test]
    fn create_container_rule_needs_image_and_network() {
        let rule = CreateContainerRule {
            container: "web".into(),
        };
        let mut events = EventLog::new();
        events.push(TaskEvent::TaskNetworkReady(NetworkId::new_unchecked("net".to_string())));
        assert_eq!(rule.evaluate(&events), RuleOutcome::NotReady);
        events.push(TaskEvent::ImagePulled(
            "web".into(),
            ImageRef::new("web", "latest"),
        ));
        assert!(matches!(rule.evaluate(&events), RuleOutcome::Ready(_)));
    }

    #[test]
    fn start_container_rule_honours_health_check_presence() {
        let rule = StartContainerRule {
            container: "web".into(),
            dependencies: vec![("db".into(), true)],
        };
        let mut events = EventLog::new();
        events.push(TaskEvent::ContainerCreated(
            "web".into(),
            ContainerId::new_unchecked("web-id".to_string()),
        ));
        events.push(TaskEvent::ContainerStarted("db".into()));
        assert_eq!(rule.evaluate(&events), RuleOutcome::NotReady);
        events.push(TaskEvent::ContainerBecameHealthy("db".into()));
        assert!(matches!(rule.evaluate(&events), RuleOutcome::Ready(_)));
    }

    #[test]
    fn remove_container_rule_waits_for_stop_only_if_needed() {
        let rule = RemoveContainerRule {
            container: "web".into(),
            handle: ContainerId::new_unchecked("web-id".to_string()),
            needs_stop: false,
        };
        let events = EventLog::new();
        assert!(matches!(rule.evaluate(&events), RuleOutcome::Ready(_)));

        let rule = RemoveContainerRule {
            container: "web".into(),
            handle: ContainerId::new_unchecked("web-id".to_string()),
            needs_stop: true,
        };
        let mut events = EventLog::new();
        assert_eq!(rule.evaluate(&events), RuleOutcome::NotReady);
        events.push(TaskEvent::ContainerStopped("web".into()));
        assert!(matches!(rule.evaluate(&events), RuleOutcome::Ready(_)));
    }
}
