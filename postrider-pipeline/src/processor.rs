//! One named processor: an ordered list of condition/action steps

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use postrider_common::{Address, MailItem, State};
use tracing::{debug, warn};

use crate::{action::Action, condition::Condition};

/// One condition/action pair.
#[derive(Debug, Clone)]
pub struct Step {
    pub condition: Arc<dyn Condition>,
    pub action: Arc<dyn Action>,
}

impl Step {
    #[must_use]
    pub fn new(condition: Arc<dyn Condition>, action: Arc<dyn Action>) -> Self {
        Self { condition, action }
    }
}

/// How a pass over one item ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Every step ran (or was skipped by an empty match); state unchanged
    Completed,
    /// A step rerouted the item; the remaining steps were skipped
    StateChanged,
    /// A step errored; the pass was abandoned with the item as mutated so far
    Failed,
}

/// Pass result, reported to the statistics surface.
#[derive(Debug, Clone, Copy)]
pub struct PassOutcome {
    pub disposition: Disposition,
    pub duration: Duration,
}

/// A named, immutable pipeline of steps. Shared read-only across workers;
/// all per-item mutability lives in the [`MailItem`] passed through it.
#[derive(Debug)]
pub struct Processor {
    name: State,
    steps: Vec<Step>,
}

impl Processor {
    #[must_use]
    pub const fn new(name: State, steps: Vec<Step>) -> Self {
        Self { name, steps }
    }

    #[must_use]
    pub const fn name(&self) -> &State {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run a single pass over `item`.
    ///
    /// Steps execute in order. A step whose condition matches nobody is
    /// skipped. The pass ends early when the item's state no longer equals
    /// this processor's name, when the recipient list empties, or when a
    /// step errors. It never loops: re-running an unchanged item is the
    /// manager's call, via the queue.
    pub async fn run(&self, item: &mut MailItem) -> PassOutcome {
        let start = Instant::now();

        for (position, step) in self.steps.iter().enumerate() {
            if item.recipients.is_empty() {
                break;
            }

            let matched = match step.condition.matches(item).await {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(
                        message_id = %item.id,
                        processor = %self.name,
                        step = position,
                        error = %e,
                        "Step condition failed, abandoning pass"
                    );
                    item.push_error(&e.to_string());
                    return PassOutcome {
                        disposition: Disposition::Failed,
                        duration: start.elapsed(),
                    };
                }
            };

            // Conditions promise a subset of the current recipients, but a
            // misbehaving plugin must not smuggle extra addresses into an
            // action.
            let matched: Vec<Address> = matched
                .into_iter()
                .filter(|address| item.recipients.contains(address))
                .collect();
            if matched.is_empty() {
                continue;
            }

            if let Err(e) = step.action.perform(item, &matched).await {
                warn!(
                    message_id = %item.id,
                    processor = %self.name,
                    step = position,
                    error = %e,
                    "Step action failed, abandoning pass"
                );
                item.push_error(&e.to_string());
                return PassOutcome {
                    disposition: Disposition::Failed,
                    duration: start.elapsed(),
                };
            }

            if item.state != self.name {
                debug!(
                    message_id = %item.id,
                    processor = %self.name,
                    next = %item.state,
                    "Item rerouted, remaining steps skipped"
                );
                return PassOutcome {
                    disposition: Disposition::StateChanged,
                    duration: start.elapsed(),
                };
            }
        }

        PassOutcome {
            disposition: Disposition::Completed,
            duration: start.elapsed(),
        }
    }
}
