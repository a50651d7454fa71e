//! Shared visibility and lock bookkeeping for the in-process backends.
//!
//! The index is the single source of truth for "who may mutate this item
//! right now": an entry is offered to at most one consumer at a time, and
//! only once its ready time has passed. Readiness is found by scanning all
//! entries and sleeping until the earliest pending one (or a notification
//! of new arrivals/unlocks). The scan is O(items) per wakeup; a min-heap
//! keyed by ready time would slot in here without changing the external
//! semantics if spool depth ever makes that matter.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use postrider_common::{MailId, Priority};
use tokio::sync::Notify;

#[derive(Debug)]
struct Entry {
    priority: Priority,
    ready_at: SystemTime,
    locked: bool,
}

/// Lock table plus visibility times for one queue instance.
#[derive(Debug)]
pub(crate) struct VisibilityIndex {
    entries: Mutex<HashMap<MailId, Entry>>,
    notify: Notify,
    fifo: bool,
}

impl VisibilityIndex {
    pub(crate) fn new(fifo: bool) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            fifo,
        })
    }

    /// Publish an item: unlocked, eligible from `ready_at`.
    pub(crate) fn insert(&self, id: MailId, priority: Priority, ready_at: SystemTime) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Entry {
                    priority,
                    ready_at,
                    locked: false,
                },
            );
        self.notify.notify_waiters();
    }

    /// Unlock an entry keeping its previous ready time. Used when a
    /// consumer gives an item up without storing a new version.
    pub(crate) fn unlock(&self, id: MailId) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            entry.locked = false;
        }
        self.notify.notify_waiters();
    }

    /// Unlock an entry with a freshly computed ready time and priority.
    /// Used after a new version of the item has been stored.
    pub(crate) fn unlock_at(&self, id: MailId, priority: Priority, ready_at: SystemTime) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            entry.priority = priority;
            entry.ready_at = ready_at;
            entry.locked = false;
        }
        self.notify.notify_waiters();
    }

    pub(crate) fn remove(&self, id: MailId) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Claim an eligible entry, waiting as long as necessary.
    ///
    /// Selection is priority-first; within a priority tier FIFO mode picks
    /// the smallest id (ULIDs sort by creation time), otherwise any
    /// eligible entry may be returned. The returned [`Claim`] unlocks the
    /// entry if dropped before being defused, which keeps `dequeue`
    /// cancel-safe.
    pub(crate) async fn acquire(self: &Arc<Self>) -> Claim {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before scanning so an insert between the scan and
            // the await cannot be missed.
            notified.as_mut().enable();

            let wait_until = {
                let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                let now = SystemTime::now();

                if let Some(id) = Self::pick(self.fifo, &mut entries, now) {
                    return Claim {
                        index: Arc::clone(self),
                        id,
                        armed: true,
                    };
                }

                Self::earliest_pending(&entries, now)
            };

            match wait_until {
                Some(at) => {
                    let sleep = at
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO);
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep(sleep) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    fn pick(fifo: bool, entries: &mut HashMap<MailId, Entry>, now: SystemTime) -> Option<MailId> {
        let mut best: Option<(Priority, MailId)> = None;

        for (id, entry) in entries.iter() {
            if entry.locked || entry.ready_at > now {
                continue;
            }
            let better = match best {
                None => true,
                Some((priority, best_id)) => {
                    entry.priority > priority
                        || (entry.priority == priority && fifo && *id < best_id)
                }
            };
            if better {
                best = Some((entry.priority, *id));
            }
        }

        let id = best.map(|(_, id)| id)?;
        if let Some(entry) = entries.get_mut(&id) {
            entry.locked = true;
        }
        Some(id)
    }

    fn earliest_pending(entries: &HashMap<MailId, Entry>, now: SystemTime) -> Option<SystemTime> {
        entries
            .values()
            .filter(|entry| !entry.locked && entry.ready_at > now)
            .map(|entry| entry.ready_at)
            .min()
    }
}

/// RAII hold on a claimed entry, pending lease construction.
#[derive(Debug)]
pub(crate) struct Claim {
    index: Arc<VisibilityIndex>,
    id: MailId,
    armed: bool,
}

impl Claim {
    pub(crate) const fn id(&self) -> MailId {
        self.id
    }

    /// Hand the lock over to a lease; the claim no longer unlocks on drop.
    pub(crate) fn defuse(mut self) -> MailId {
        self.armed = false;
        self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.armed {
            self.index.unlock(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn id_at(ms: u64) -> MailId {
        MailId::from_ulid(ulid::Ulid::from_parts(ms, 0))
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_released() {
        let index = VisibilityIndex::new(false);
        let id = MailId::generate();
        index.insert(id, Priority::Normal, SystemTime::now());

        let claim = index.acquire().await;
        assert_eq!(claim.id(), id);

        // Same entry cannot be claimed twice.
        let second = tokio::time::timeout(Duration::from_millis(50), index.acquire()).await;
        assert!(second.is_err(), "locked entry must not be claimable");

        // Dropping an un-defused claim unlocks it.
        drop(claim);
        let reclaimed = tokio::time::timeout(Duration::from_millis(200), index.acquire())
            .await
            .unwrap();
        assert_eq!(reclaimed.defuse(), id);
    }

    #[tokio::test]
    async fn fifo_picks_smallest_id() {
        let index = VisibilityIndex::new(true);
        let (a, b) = (id_at(1), id_at(2));
        let now = SystemTime::now();
        index.insert(b, Priority::Normal, now);
        index.insert(a, Priority::Normal, now);

        assert_eq!(index.acquire().await.defuse(), a);
        assert_eq!(index.acquire().await.defuse(), b);
    }

    #[tokio::test]
    async fn priority_beats_fifo_order() {
        let index = VisibilityIndex::new(true);
        let (a, b) = (id_at(1), id_at(2));
        let now = SystemTime::now();
        index.insert(a, Priority::Normal, now);
        index.insert(b, Priority::High, now);

        assert_eq!(index.acquire().await.defuse(), b);
        assert_eq!(index.acquire().await.defuse(), a);
    }

    #[tokio::test]
    async fn waits_until_ready_time() {
        let index = VisibilityIndex::new(false);
        let id = MailId::generate();
        let start = SystemTime::now();
        index.insert(id, Priority::Normal, start + Duration::from_millis(150));

        let claim = index.acquire().await;
        assert_eq!(claim.defuse(), id);
        assert!(
            SystemTime::now()
                .duration_since(start)
                .unwrap_or(Duration::ZERO)
                >= Duration::from_millis(140),
            "entry must not be offered before its ready time"
        );
    }
}
