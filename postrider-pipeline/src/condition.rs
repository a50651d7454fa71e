//! Step conditions: which recipients a step applies to

use std::fmt::Debug;

use async_trait::async_trait;
use postrider_common::{Address, MailItem};

use crate::error::StepError;

/// Selects the recipients a step's action should operate on.
///
/// Implementations must return a subset of the item's current recipients;
/// anything else is filtered out before the action runs. An empty result
/// skips the paired action entirely.
#[async_trait]
pub trait Condition: Send + Sync + Debug {
    /// Evaluate against the item as mutated by earlier steps in this pass.
    ///
    /// # Errors
    /// [`StepError::Condition`] aborts the pass; the item keeps its state
    /// and the error is appended to its error trail.
    async fn matches(&self, item: &MailItem) -> Result<Vec<Address>, StepError>;
}

/// Matches every current recipient.
#[derive(Debug, Default)]
pub struct All;

#[async_trait]
impl Condition for All {
    async fn matches(&self, item: &MailItem) -> Result<Vec<Address>, StepError> {
        Ok(item.recipients.clone())
    }
}

/// Matches recipients whose domain equals the configured one,
/// case-insensitively.
#[derive(Debug)]
pub struct RecipientsOnDomain {
    domain: String,
}

impl RecipientsOnDomain {
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }
}

#[async_trait]
impl Condition for RecipientsOnDomain {
    async fn matches(&self, item: &MailItem) -> Result<Vec<Address>, StepError> {
        Ok(item
            .recipients
            .iter()
            .filter(|recipient| recipient.on_domain(&self.domain))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn item() -> MailItem {
        MailItem::new(
            Some(Address::new("sender", "example.com")),
            vec![
                Address::new("alice", "example.org"),
                Address::new("bob", "Example.ORG"),
                Address::new("carol", "elsewhere.net"),
            ],
            None,
        )
    }

    #[tokio::test]
    async fn all_matches_every_recipient() {
        let item = item();
        let matched = All.matches(&item).await.unwrap();
        assert_eq!(matched, item.recipients);
    }

    #[tokio::test]
    async fn on_domain_is_case_insensitive() {
        let matched = RecipientsOnDomain::new("example.org")
            .matches(&item())
            .await
            .unwrap();
        assert_eq!(
            matched,
            vec![
                Address::new("alice", "example.org"),
                Address::new("bob", "Example.ORG"),
            ]
        );
    }

    #[tokio::test]
    async fn no_recipients_means_no_matches() {
        let mut item = item();
        item.recipients.clear();
        assert!(All.matches(&item).await.unwrap().is_empty());
    }
}
