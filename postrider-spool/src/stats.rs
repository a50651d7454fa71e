//! Per-processor running statistics

use std::time::Duration;

use ahash::AHashMap;
use dashmap::DashMap;
use postrider_common::State;
use postrider_pipeline::{Disposition, PassOutcome};

/// Counters and timings for one processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Passes run, including failed ones
    pub handled: u64,
    /// Failed passes plus dispatch failures (no processor for the state)
    pub errors: u64,
    pub fastest: Option<Duration>,
    pub slowest: Option<Duration>,
    pub last: Option<Duration>,
}

impl ProcessorStats {
    fn record(&mut self, outcome: &PassOutcome) {
        self.handled += 1;
        if outcome.disposition == Disposition::Failed {
            self.errors += 1;
        }
        self.fastest = Some(self.fastest.map_or(outcome.duration, |fastest| {
            fastest.min(outcome.duration)
        }));
        self.slowest = Some(self.slowest.map_or(outcome.duration, |slowest| {
            slowest.max(outcome.duration)
        }));
        self.last = Some(outcome.duration);
    }
}

/// Concurrent statistics table keyed by processor state, shared across all
/// workers.
#[derive(Debug, Default)]
pub struct SpoolStats {
    processors: DashMap<State, ProcessorStats>,
}

impl SpoolStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, state: &State, outcome: &PassOutcome) {
        self.processors
            .entry(state.clone())
            .or_default()
            .record(outcome);
    }

    /// Count a failure that never reached a processor, such as an item in a
    /// state nothing is configured to handle.
    pub fn record_failure(&self, state: &State) {
        self.processors.entry(state.clone()).or_default().errors += 1;
    }

    /// A point-in-time copy of every processor's counters.
    #[must_use]
    pub fn snapshot(&self) -> AHashMap<State, ProcessorStats> {
        self.processors
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn outcome(disposition: Disposition, millis: u64) -> PassOutcome {
        PassOutcome {
            disposition,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn durations_track_extremes_and_last() {
        let stats = SpoolStats::new();
        let state = State::root();

        stats.record(&state, &outcome(Disposition::Completed, 30));
        stats.record(&state, &outcome(Disposition::Completed, 10));
        stats.record(&state, &outcome(Disposition::Failed, 20));

        let snapshot = stats.snapshot();
        let root = &snapshot[&state];
        assert_eq!(root.handled, 3);
        assert_eq!(root.errors, 1);
        assert_eq!(root.fastest, Some(Duration::from_millis(10)));
        assert_eq!(root.slowest, Some(Duration::from_millis(30)));
        assert_eq!(root.last, Some(Duration::from_millis(20)));
    }

    #[test]
    fn dispatch_failures_count_without_a_pass() {
        let stats = SpoolStats::new();
        let state = State::new("nowhere");

        stats.record_failure(&state);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot[&state].handled, 0);
        assert_eq!(snapshot[&state].errors, 1);
    }
}
