use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use ahash::AHashSet;
use async_trait::async_trait;
use postrider_common::{MailId, MailItem};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::warn;

use crate::{
    config::FileQueueConfig,
    error::{QueueError, Result},
    index::VisibilityIndex,
    retry::RetryPolicy,
    r#trait::{DequeuedMail, Lease, MailLease, MailQueue},
};

/// On-disk record for one queued item. The payload lives in a sibling
/// `.eml` file; the record always stores the item with `body` stripped.
#[derive(Debug, Serialize, Deserialize)]
struct QueueRecord {
    not_before_ms: u64,
    item: MailItem,
}

/// File-backed mail queue.
///
/// Each item is a pair of files named by its ULID:
/// - `{id}.bin`: bincode metadata record (marks the item as present)
/// - `{id}.eml`: raw payload bytes, if the item has one
///
/// All writes go to a `.tmp` sibling first and are renamed into place, so a
/// crash never leaves a half-written record visible. Locks live only in
/// memory: reopening the directory re-indexes every item unlocked, which is
/// the recovery path for consumers that died holding a lease.
///
/// A record that fails to decode is renamed to `.bad` and skipped, so one
/// corrupt file cannot wedge the dequeue loop.
#[derive(Debug, Clone)]
pub struct FileMailQueue {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    index: Arc<VisibilityIndex>,
    policy: RetryPolicy,
}

impl FileMailQueue {
    /// Open (creating if needed) the queue directory and rebuild the
    /// visibility index from the records found there.
    ///
    /// # Errors
    /// If the path fails validation, cannot be created, or is not a
    /// directory.
    pub fn open(config: FileQueueConfig, policy: RetryPolicy) -> Result<Self> {
        Self::validate_path(&config.path)?;

        if !config.path.try_exists()? {
            std::fs::create_dir_all(&config.path)?;
        } else if !config.path.is_dir() {
            return Err(QueueError::Validation(format!(
                "Queue path is not a directory: {}",
                config.path.display()
            )));
        }

        let inner = FileInner {
            path: config.path,
            index: VisibilityIndex::new(config.fifo),
            policy,
        };

        inner.cleanup_temp_files()?;
        inner.recover()?;

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Reject traversal components, relative paths, and system directories
    /// before touching the filesystem.
    fn validate_path(path: &Path) -> Result<()> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(QueueError::Validation(format!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(QueueError::Validation(format!(
                "Queue path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];
        for prefix in &sensitive_prefixes {
            if path.starts_with(prefix) {
                return Err(QueueError::Validation(format!(
                    "Queue path cannot be in system directory {prefix}: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Number of indexed items (visible, delayed, and leased).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileInner {
    fn bin_path(&self, id: MailId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    fn eml_path(&self, id: MailId) -> PathBuf {
        self.path.join(format!("{id}.eml"))
    }

    /// Remove leftovers of writes interrupted by a crash.
    fn cleanup_temp_files(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(".tmp") {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Scan the directory and index every record, all unlocked
    /// (unlock-all-on-restart). Undecodable records are quarantined, and
    /// payload files whose record never made it into place are removed.
    fn recover(&self) -> Result<()> {
        let now = SystemTime::now();
        let mut recorded = AHashSet::new();

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(name) = filename.to_str() else {
                continue;
            };
            if !name.ends_with(".bin") {
                continue;
            }
            let Some(id) = MailId::from_filename(name) else {
                continue;
            };
            recorded.insert(id);

            let bytes = std::fs::read(entry.path())?;
            match bincode::serde::decode_from_slice::<QueueRecord, _>(
                &bytes,
                bincode::config::standard(),
            ) {
                Ok((record, _)) => {
                    let ready_at = ms_to_time(record.not_before_ms)
                        .max(self.policy.ready_at(&record.item, Duration::ZERO, now));
                    self.index.insert(id, record.item.priority, ready_at);
                }
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Quarantining undecodable queue record");
                    self.quarantine(id);
                }
            }
        }

        // The record rename is the commit point; a payload without one is a
        // write that never committed (or a removal's leftover) and would
        // otherwise sit in the directory forever.
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(name) = filename.to_str() else {
                continue;
            };
            if !name.ends_with(".eml") {
                continue;
            }
            let Some(id) = MailId::from_filename(name) else {
                continue;
            };
            if !recorded.contains(&id) {
                warn!(message_id = %id, "Removing orphaned payload file");
                std::fs::remove_file(entry.path())?;
            }
        }

        Ok(())
    }

    /// Atomically persist both files for an item.
    async fn write_files(&self, item: &MailItem, not_before_ms: u64) -> Result<()> {
        let id = item.id;

        if let Some(body) = &item.body {
            let eml = self.eml_path(id);
            let tmp = eml.with_extension("eml.tmp");
            fs::write(&tmp, body).await?;
            fs::rename(&tmp, &eml).await?;
        }

        let mut stripped = item.clone();
        stripped.body = None;
        let record = QueueRecord {
            not_before_ms,
            item: stripped,
        };
        let encoded = bincode::serde::encode_to_vec(&record, bincode::config::standard())?;

        let bin = self.bin_path(id);
        let tmp = bin.with_extension("bin.tmp");
        fs::write(&tmp, &encoded).await?;
        fs::rename(&tmp, &bin).await?;

        Ok(())
    }

    async fn read_item(&self, id: MailId) -> Result<MailItem> {
        let bytes = fs::read(self.bin_path(id)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                QueueError::NotFound(id)
            } else {
                QueueError::Io(e)
            }
        })?;

        let (record, _) =
            bincode::serde::decode_from_slice::<QueueRecord, _>(&bytes, bincode::config::standard())?;
        let mut item = record.item;

        match fs::read(self.eml_path(id)).await {
            Ok(body) => item.body = Some(Arc::from(body.into_boxed_slice())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(item)
    }

    async fn remove_files(&self, id: MailId) -> Result<()> {
        for path in [self.bin_path(id), self.eml_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Set a defective pair aside under `.bad` names. The payload is kept
    /// alongside the record for inspection, out of reach of the recovery
    /// scan's orphan sweep.
    fn quarantine(&self, id: MailId) {
        let bin = self.bin_path(id);
        let _ = std::fs::rename(&bin, bin.with_extension("bin.bad"));
        let eml = self.eml_path(id);
        let _ = std::fs::rename(&eml, eml.with_extension("eml.bad"));
    }
}

#[async_trait]
impl MailQueue for FileMailQueue {
    async fn enqueue(&self, item: MailItem, delay: Duration) -> Result<()> {
        let now = SystemTime::now();
        let not_before = now + delay;
        let ready_at = self.inner.policy.ready_at(&item, delay, now);
        let (id, priority) = (item.id, item.priority);

        self.inner.write_files(&item, time_to_ms(not_before)).await?;
        self.inner.index.insert(id, priority, ready_at);
        Ok(())
    }

    async fn dequeue(&self) -> Result<DequeuedMail> {
        loop {
            let claim = self.inner.index.acquire().await;

            match self.inner.read_item(claim.id()).await {
                Ok(item) => {
                    let id = claim.defuse();
                    return Ok(DequeuedMail {
                        item,
                        lease: MailLease::new(Box::new(FileLease {
                            inner: Arc::clone(&self.inner),
                            id,
                        })),
                    });
                }
                Err(e) => {
                    let id = claim.defuse();
                    warn!(message_id = %id, error = %e, "Dropping unreadable queue record");
                    self.inner.index.remove(id);
                    self.inner.quarantine(id);
                }
            }
        }
    }
}

#[derive(Debug)]
struct FileLease {
    inner: Arc<FileInner>,
    id: MailId,
}

#[async_trait]
impl Lease for FileLease {
    async fn complete(self: Box<Self>) -> Result<()> {
        self.inner.remove_files(self.id).await?;
        self.inner.index.remove(self.id);
        Ok(())
    }

    async fn requeue(self: Box<Self>, mut item: MailItem) -> Result<()> {
        item.touch();
        let now = SystemTime::now();
        let ready_at = self.inner.policy.ready_at(&item, Duration::ZERO, now);
        let priority = item.priority;

        self.inner.write_files(&item, time_to_ms(now)).await?;
        self.inner.index.unlock_at(self.id, priority, ready_at);
        Ok(())
    }

    fn abandon(self: Box<Self>) {
        self.inner.index.unlock(self.id);
    }
}

fn time_to_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

fn ms_to_time(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use postrider_common::{Address, State};
    use pretty_assertions::assert_eq;

    use super::*;

    fn test_item() -> MailItem {
        MailItem::new(
            Some(Address::new("sender", "example.com")),
            vec![Address::new("rcpt", "example.org")],
            Some(Arc::from(b"Subject: hello\r\n\r\nhi".as_slice())),
        )
    }

    fn open_at(path: &Path) -> FileMailQueue {
        FileMailQueue::open(
            FileQueueConfig {
                path: path.to_path_buf(),
                fifo: true,
            },
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn path_validation() {
        let relative = FileQueueConfig {
            path: PathBuf::from("relative/queue"),
            fifo: false,
        };
        assert!(matches!(
            FileMailQueue::open(relative, RetryPolicy::default()),
            Err(QueueError::Validation(_))
        ));

        let traversal = FileQueueConfig {
            path: PathBuf::from("/var/spool/../etc/queue"),
            fifo: false,
        };
        assert!(matches!(
            FileMailQueue::open(traversal, RetryPolicy::default()),
            Err(QueueError::Validation(_))
        ));

        let system = FileQueueConfig {
            path: PathBuf::from("/etc/postrider"),
            fifo: false,
        };
        assert!(matches!(
            FileMailQueue::open(system, RetryPolicy::default()),
            Err(QueueError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn round_trip_preserves_payload_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_at(dir.path());
        let item = test_item();

        queue.enqueue(item.clone(), Duration::ZERO).await.unwrap();
        let dequeued = queue.dequeue().await.unwrap();

        assert_eq!(dequeued.item, item);
        dequeued.lease.complete().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn items_survive_a_reopen_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let item = test_item();

        {
            let queue = open_at(dir.path());
            queue.enqueue(item.clone(), Duration::ZERO).await.unwrap();
            // Simulate a consumer dying while holding the lease.
            let dequeued = queue.dequeue().await.unwrap();
            std::mem::forget(dequeued);
        }

        let reopened = open_at(dir.path());
        let recovered = tokio::time::timeout(Duration::from_millis(500), reopened.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recovered.item, item);
    }

    #[tokio::test]
    async fn completion_removes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = open_at(dir.path());
        let item = test_item();
        let id = item.id;

        queue.enqueue(item, Duration::ZERO).await.unwrap();
        queue.dequeue().await.unwrap().lease.complete().await.unwrap();

        assert!(!dir.path().join(format!("{id}.bin")).exists());
        assert!(!dir.path().join(format!("{id}.eml")).exists());
    }

    #[tokio::test]
    async fn requeued_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let queue = open_at(dir.path());
            queue.enqueue(test_item(), Duration::ZERO).await.unwrap();
            let (mut item, lease) = queue.dequeue().await.unwrap().into_parts();
            item.state = State::new("transport");
            lease.requeue(item).await.unwrap();
        }

        let reopened = open_at(dir.path());
        let dequeued = reopened.dequeue().await.unwrap();
        assert_eq!(dequeued.item.state, State::new("transport"));
    }

    #[tokio::test]
    async fn corrupt_records_are_quarantined_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin");
        std::fs::write(&bogus, b"not a record").unwrap();
        let payload = dir.path().join("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml");
        std::fs::write(&payload, b"kept for inspection").unwrap();

        let queue = open_at(dir.path());
        assert!(queue.is_empty());
        assert!(!bogus.exists());
        assert!(!payload.exists());
        assert!(
            dir.path()
                .join("01ARZ3NDEKTSV4RRFFQ69G5FAV.bin.bad")
                .exists()
        );
        assert!(
            dir.path()
                .join("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml.bad")
                .exists()
        );
    }

    #[tokio::test]
    async fn orphaned_payloads_are_removed_at_open() {
        let dir = tempfile::tempdir().unwrap();

        // A payload whose record rename never happened, as after a crash
        // between the two renames.
        let orphan = dir.path().join("01ARZ3NDEKTSV4RRFFQ69G5FAV.eml");
        std::fs::write(&orphan, b"half-written enqueue").unwrap();

        let queue = open_at(dir.path());
        let item = test_item();
        queue.enqueue(item.clone(), Duration::ZERO).await.unwrap();

        assert!(!orphan.exists());
        assert!(dir.path().join(format!("{}.eml", item.id)).exists());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_delay_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let start = std::time::Instant::now();

        {
            let queue = open_at(dir.path());
            queue
                .enqueue(test_item(), Duration::from_millis(250))
                .await
                .unwrap();
        }

        let reopened = open_at(dir.path());
        let dequeued = reopened.dequeue().await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(240),
            "not-before must be honoured across restarts, got {:?}",
            start.elapsed()
        );
        dequeued.lease.complete().await.unwrap();
    }
}
