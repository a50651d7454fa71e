//! Per-state retry delays.

use std::time::{Duration, SystemTime};

use ahash::AHashMap;
use postrider_common::{MailItem, State};

/// Maps error-handling processor states to a fixed redelivery delay.
///
/// An item whose state carries a delay `D` only becomes visible once
/// `last_updated + D` has passed; items in any other state are visible as
/// soon as their explicit enqueue delay (if any) elapses. The policy is
/// owned by the queue, so producers and the spool manager never compute
/// retry timing themselves.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    delays: AHashMap<State, Duration>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed delay for items assigned to `state`.
    #[must_use]
    pub fn with_delay(mut self, state: State, delay: Duration) -> Self {
        self.delays.insert(state, delay);
        self
    }

    #[must_use]
    pub fn delay_for(&self, state: &State) -> Option<Duration> {
        self.delays.get(state).copied()
    }

    /// Compute when `item` becomes visible, composing an explicit enqueue
    /// delay with the per-state retry delay. The later of the two wins.
    #[must_use]
    pub fn ready_at(&self, item: &MailItem, delay: Duration, now: SystemTime) -> SystemTime {
        let base = now + delay;
        match self.delay_for(&item.state) {
            Some(retry) => base.max(item.last_updated + retry),
            None => base,
        }
    }
}
