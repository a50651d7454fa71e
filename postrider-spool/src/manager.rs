//! The worker pool driving queue → processor → queue

use std::{sync::Arc, time::Duration};

use postrider_common::{MailItem, Signal};
use postrider_pipeline::ProcessorRegistry;
use postrider_queue::{DequeuedMail, MailQueue};
use tokio::{sync::broadcast, task::JoinSet, time::timeout};
use tracing::{debug, error, info, warn};

use crate::{config::SpoolConfig, error::SpoolError, stats::SpoolStats};

/// How long a worker backs off after a failed dequeue before retrying.
const DEQUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Owns the worker pool. Constructed explicitly from its collaborators;
/// nothing here is looked up ambiently.
#[derive(Debug)]
pub struct SpoolManager {
    queue: Arc<dyn MailQueue>,
    registry: Arc<ProcessorRegistry>,
    config: SpoolConfig,
    stats: Arc<SpoolStats>,
}

impl SpoolManager {
    /// # Errors
    /// [`SpoolError::Config`] when the configuration fails validation.
    pub fn new(
        queue: Arc<dyn MailQueue>,
        registry: Arc<ProcessorRegistry>,
        config: SpoolConfig,
    ) -> Result<Self, SpoolError> {
        config.validate()?;
        Ok(Self {
            queue,
            registry,
            config,
            stats: Arc::new(SpoolStats::new()),
        })
    }

    /// The live statistics table shared with the workers.
    #[must_use]
    pub fn stats(&self) -> Arc<SpoolStats> {
        Arc::clone(&self.stats)
    }

    /// Hand a new item to the queue on a producer's behalf.
    ///
    /// # Errors
    /// [`SpoolError::Queue`] when the queue rejects the item; it is then
    /// not enqueued at all.
    pub async fn enqueue(&self, item: MailItem) -> Result<(), SpoolError> {
        self.queue.enqueue(item, Duration::ZERO).await?;
        Ok(())
    }

    /// Run the pool until shutdown.
    ///
    /// Spawns `workers` tasks, each alternating between a blocked dequeue
    /// and processing one item. On [`Signal::Shutdown`] the workers stop
    /// dequeuing; in-flight items finish their pass. The manager waits up
    /// to the configured grace for that, then detaches any stragglers
    /// (never aborts them) and returns. An item still checked out at that
    /// point surfaces again through the backend's recovery path.
    ///
    /// # Errors
    /// Currently infallible past construction; the signature leaves room
    /// for startup failures of future backends.
    pub async fn serve(
        &self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<(), SpoolError> {
        info!(workers = self.config.workers, "Spool manager starting");

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            let queue = Arc::clone(&self.queue);
            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            let shutdown = shutdown.resubscribe();
            workers.spawn(worker_loop(worker, queue, registry, stats, shutdown));
        }

        match shutdown.recv().await {
            Ok(Signal::Shutdown) => info!("Spool manager received shutdown signal"),
            Err(e) => warn!(error = %e, "Spool manager shutdown channel closed"),
        }

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let drained = timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Shutdown grace exceeded, detaching workers; checked-out items recover on restart"
            );
            workers.detach_all();
        }

        info!("Spool manager stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker: usize,
    queue: Arc<dyn MailQueue>,
    registry: Arc<ProcessorRegistry>,
    stats: Arc<SpoolStats>,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    debug!(worker, "Worker started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!(worker, "Worker stopping");
                break;
            }
            dequeued = queue.dequeue() => match dequeued {
                Ok(dequeued) => handle_item(dequeued, &registry, &stats).await,
                Err(e) => {
                    error!(worker, error = %e, "Dequeue failed, backing off");
                    tokio::time::sleep(DEQUEUE_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Process one checked-out item and settle its lease.
async fn handle_item(
    dequeued: DequeuedMail,
    registry: &ProcessorRegistry,
    stats: &SpoolStats,
) {
    let (mut item, lease) = dequeued.into_parts();
    let id = item.id;

    // An item that is already terminal (discard state, or no recipients
    // left) needs no processor; it only needs removing.
    if item.is_terminal() {
        debug!(message_id = %id, state = %item.state, "Dequeued item is already terminal, removing");
        if let Err(e) = lease.complete().await {
            error!(message_id = %id, error = %e, "Failed to remove terminal item");
        }
        return;
    }

    let Some(processor) = registry.get(&item.state) else {
        // A state nothing handles is a configuration failure for this item;
        // redelivering it would only fail the same way forever.
        error!(
            message_id = %id,
            state = %item.state,
            "No processor configured for state, discarding item"
        );
        stats.record_failure(&item.state);
        if let Err(e) = lease.complete().await {
            error!(message_id = %id, error = %e, "Failed to remove undispatchable item");
        }
        return;
    };

    let outcome = processor.run(&mut item).await;
    stats.record(processor.name(), &outcome);

    // One pass per checkout: even an unchanged state goes back through the
    // queue so a busy item cannot starve its siblings.
    let settled = if item.is_terminal() {
        debug!(message_id = %id, state = %item.state, "Item reached a terminal outcome, removing");
        lease.complete().await
    } else {
        debug!(message_id = %id, state = %item.state, "Returning item to the queue");
        lease.requeue(item).await
    };

    if let Err(e) = settled {
        // The lease is consumed either way; the last stored version of the
        // item becomes visible again through the backend.
        error!(message_id = %id, error = %e, "Failed to settle item after processing");
    }
}
