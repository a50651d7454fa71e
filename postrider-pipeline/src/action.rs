//! Step actions: what happens to matched recipients

use std::fmt::Debug;

use async_trait::async_trait;
use postrider_common::{Address, MailItem, State};

use crate::error::StepError;

/// Mutates the item for the recipients a condition selected.
///
/// Actions are handed the item exclusively; nothing else observes it until
/// the pass ends and the manager re-stores it. Changing `item.state` ends
/// the pass after this step.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Apply to `item`. `matched` is never empty and is always a subset of
    /// the item's current recipients.
    ///
    /// # Errors
    /// [`StepError::Action`] aborts the pass; mutations already applied to
    /// the item remain.
    async fn perform(&self, item: &mut MailItem, matched: &[Address]) -> Result<(), StepError>;
}

/// Routes the item to another processor.
#[derive(Debug)]
pub struct ToProcessor {
    target: State,
}

impl ToProcessor {
    #[must_use]
    pub const fn new(target: State) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Action for ToProcessor {
    async fn perform(&self, item: &mut MailItem, _matched: &[Address]) -> Result<(), StepError> {
        item.state = self.target.clone();
        Ok(())
    }
}

/// Routes the item to the terminal discard state; the manager removes it.
#[derive(Debug, Default)]
pub struct Discard;

#[async_trait]
impl Action for Discard {
    async fn perform(&self, item: &mut MailItem, _matched: &[Address]) -> Result<(), StepError> {
        item.state = State::discard();
        Ok(())
    }
}

/// Drops the matched recipients. Emptying the recipient list completes the
/// item.
#[derive(Debug, Default)]
pub struct RemoveMatched;

#[async_trait]
impl Action for RemoveMatched {
    async fn perform(&self, item: &mut MailItem, matched: &[Address]) -> Result<(), StepError> {
        for recipient in matched {
            item.remove_recipient(recipient);
        }
        Ok(())
    }
}

/// Does nothing. A step anchor for conditions evaluated purely for their
/// side effects in tests and templates.
#[derive(Debug, Default)]
pub struct Null;

#[async_trait]
impl Action for Null {
    async fn perform(&self, _item: &mut MailItem, _matched: &[Address]) -> Result<(), StepError> {
        Ok(())
    }
}
