//! A stage: an ordered rule set plus the one-shot bookkeeping rules
//! themselves deliberately don't do.
//!
//! Rules are pure predicates over the event log; re-evaluating one after it
//! has already fired would hand the dispatcher the same step twice. `Stage`
//! is the layer that remembers, per rule, whether it has already been asked
//! to fire once this stage and refuses to repeat itself.

use crate::task::event::EventLog;
use crate::task::rules::{RuleOutcome, StepRule};
use crate::task::step::TaskStep;
use std::fmt;

/// What asking a stage for its next step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Run this step. The rule that produced it will not be asked again
    /// this stage.
    StepReady(TaskStep),
    /// Nothing is ready yet, but the stage still has rules that haven't
    /// completed.
    NoStepsReady,
    /// Every rule in the stage has run its step to completion. The caller
    /// should advance to the next stage (or finish, for the last one).
    Complete,
}

/// A named collection of rules evaluated in a fixed order, with one-shot
/// firing enforced across calls to [`Stage::next`].
pub struct Stage {
    name: &'static str,
    rules: Vec<Box<dyn StepRule>>,
    fired: Vec<bool>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("rule_count", &self.rules.len())
            .field("fired", &self.fired)
            .finish()
    }
}

impl Stage {
    /// Build a stage from its rules, evaluated in the order given.
    pub fn new(name: &'static str, rules: Vec<Box<dyn StepRule>>) -> Self {
        let fired = vec![false; rules.len()];
        Self { name, rules, fired }
    }

    /// This stage's name, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the stage for its next step, given the accumulated events.
    ///
    /// Scans rules in declaration order; the first not-yet-fired rule whose
    /// precondition holds wins. A rule is marked fired the moment it is
    /// returned, so a second call never hands out the same step twice even
    /// if the event set hasn't moved on yet.
    pub fn next(&mut self, events: &EventLog) -> StageOutcome {
        for (i, rule) in self.rules.iter().enumerate() {
            if self.fired[i] {
                continue;
            }
            if let RuleOutcome::Ready(step) = rule.evaluate(events) {
                self.fired[i] = true;
                return StageOutcome::StepReady(step);
            }
        }
        if self.rules.iter().all(|r| r.is_complete(events)) {
            StageOutcome::Complete
        } else {
            StageOutcome::NoStepsReady
        }
    }
}
