//! The task state machine: owns the current stage, the event log, and the
//! run/cleanup transition.
//!
//! `TaskStateMachine` is the only component that mutates anything. Rules and
//! stages stay pure; this is where their pure verdicts turn into the
//! "have we failed", "are we cleaning up now" bookkeeping the rest of the
//! engine needs.

use crate::task::container::ResolvedTaskConfig;
use crate::task::event::{EventLog, TaskEvent};
use crate::task::graph::DependencyGraph;
use crate::task::planner::{CleanupPolicy, CleanupStagePlanner, RunStagePlanner};
use crate::task::stage::{Stage, StageOutcome};
use crate::task::status::{ManualCleanup, TaskStatus};
use crate::task::step::NextStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Run,
    Cleanup,
    Done,
}

/// Drives one task run from an empty event log to completion.
///
/// Invariants maintained across every `post_event`/`pop_next_step` call:
///
/// 1. The event log never loses an event and never records the same
///    (case, payload) pair twice (`EventLog::push`).
/// 2. Once `task_failed` is set it is never cleared; failures discovered
///    during cleanup are tracked separately (`failed_during_cleanup`) and
///    never promoted back into the original failure.
/// 3. The run stage is abandoned (not drained to its own `Complete`) the
///    moment a failure is observed; cleanup starts as soon as whatever was
///    already dispatched has drained, not before.
/// 4. `pop_next_step` never hands out a step while a prior call's step for
///    the same rule is still in flight — enforced by `Stage`'s one-shot
///    firing, not re-checked here.
/// 5. The task container's exit code is defined if and only if exactly one
///    `RunningContainerExited` event for it has been recorded
///    (`EventLog::task_exit_code`).
///
/// A `NoStepsReady` verdict from the current stage while the caller reports
/// no steps still running is an internal invariant violation: the rule base
/// is supposed to guarantee forward progress is always either dispatched or
/// in flight. `pop_next_step` panics rather than silently wedging the run.
pub struct TaskStateMachine {
    config: ResolvedTaskConfig,
    graph: DependencyGraph,
    cleanup_policy: CleanupPolicy,
    phase: Phase,
    run_stage: Stage,
    cleanup_stage: Option<Stage>,
    cleanup_skipped: bool,
    events: EventLog,
    task_failed: bool,
    failed_during_cleanup: bool,
}

impl TaskStateMachine {
    /// Build a fresh state machine for `config`, with an empty event log and
    /// the run stage planned and ready.
    pub fn new(
        config: ResolvedTaskConfig,
        graph: DependencyGraph,
        cleanup_policy: CleanupPolicy,
    ) -> Self {
        let run_stage = RunStagePlanner::build(&config, &graph);
        Self {
            config,
            graph,
            cleanup_policy,
            phase: Phase::Run,
            run_stage,
            cleanup_stage: None,
            cleanup_skipped: false,
            events: EventLog::new(),
            task_failed: false,
            failed_during_cleanup: false,
        }
    }

    /// Record an event. Returns `false` if an observationally identical
    /// event was already recorded — callers should treat that as a no-op,
    /// not an error.
    pub fn post_event(&mut self, event: TaskEvent) -> bool {
        let is_failure = event.is_failure();
        let in_cleanup = self.phase == Phase::Cleanup;
        let newly_recorded = self.events.push(event);
        if newly_recorded && is_failure {
            if in_cleanup {
                self.failed_during_cleanup = true;
            } else {
                self.task_failed = true;
            }
        }
        newly_recorded
    }

    /// Ask for the next unit of work. `steps_still_running` must accurately
    /// reflect whether the dispatcher has any in-flight step for this task;
    /// the state machine relies on it to distinguish "nothing ready yet,
    /// check back after the next event" from "nothing ready and nothing
    /// will ever complete to unblock it".
    pub fn pop_next_step(&mut self, steps_still_running: bool) -> NextStep {
        loop {
            match self.phase {
                Phase::Done => return NextStep::NoneAndIdle,
                Phase::Run => {
                    if self.task_failed {
                        if steps_still_running {
                            return NextStep::NoneReady;
                        }
                        self.enter_cleanup();
                        continue;
                    }
                    match self.run_stage.next(&self.events) {
                        StageOutcome::StepReady(step) => return NextStep::Step(step),
                        StageOutcome::NoStepsReady => {
                            if steps_still_running {
                                return NextStep::NoneReady;
                            }
                            panic!(
                                "run stage has no ready step and nothing in flight with no failure recorded; rule base invariant violated"
                            );
                        }
                        StageOutcome::Complete => {
                            self.enter_cleanup();
                            continue;
                        }
                    }
                }
                Phase::Cleanup => {
                    let stage = self
                        .cleanup_stage
                        .as_mut()
                        .expect("cleanup stage is built before entering Phase::Cleanup");
                    match stage.next(&self.events) {
                        StageOutcome::StepReady(step) => return NextStep::Step(step),
                        StageOutcome::NoStepsReady => {
                            if steps_still_running {
                                return NextStep::NoneReady;
                            }
                            panic!(
                                "cleanup stage has no ready step and nothing in flight; rule base invariant violated"
                            );
                        }
                        StageOutcome::Complete => {
                            self.phase = Phase::Done;
                            return NextStep::NoneAndIdle;
                        }
                    }
                }
            }
        }
    }

    fn enter_cleanup(&mut self) {
        if !self.cleanup_policy.should_clean_up(self.task_failed) {
            self.cleanup_skipped = true;
            self.phase = Phase::Done;
            return;
        }
        let stage = CleanupStagePlanner::build(&self.graph, &self.events);
        self.cleanup_stage = Some(stage);
        self.phase = Phase::Cleanup;
    }

    /// The task's current status.
    pub fn status(&self) -> TaskStatus {
        if self.phase != Phase::Done {
            return TaskStatus::Running;
        }
        if self.task_failed {
            TaskStatus::Failed
        } else {
            TaskStatus::Succeeded
        }
    }

    /// Whether the caller needs to clean up containers or the network by
    /// hand, and the commands to do it with, if so.
    pub fn manual_cleanup(&self) -> ManualCleanup {
        if self.phase != Phase::Done {
            return ManualCleanup::None;
        }
        if self.cleanup_skipped {
            return if self.task_failed {
                ManualCleanup::RequiredDueToFailure
            } else {
                ManualCleanup::RequiredDueToSuccess
            };
        }
        if self.failed_during_cleanup {
            return ManualCleanup::RequiredDueToCleanupFailure;
        }
        ManualCleanup::None
    }

    /// Commands a human can run to finish cleanup by hand, for whichever
    /// [`ManualCleanup`] case applies.
    pub fn manual_cleanup_commands(&self) -> Vec<String> {
        CleanupStagePlanner::manual_cleanup_commands(&self.config, &self.graph, &self.events)
    }

    /// The task container's exit code, once the run has reached it.
    pub fn task_exit_code(&self) -> Option<i32> {
        self.events.task_exit_code(&self.config.task_container)
    }

    /// The accumulated event log, for diagnostics and tests.
    pub fn events(&self) -> &EventLog {
        &self.events
    }
}
