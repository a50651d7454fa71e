//! End-to-end manager scenarios over the in-memory queue.

use std::{sync::Arc, time::Duration};

use postrider_common::{Address, MailItem, Signal, State};
use postrider_pipeline::{
    All, Discard, Processor, ProcessorRegistry, RemoveMatched, Step, ToProcessor,
};
use postrider_queue::{MailQueue, MemoryMailQueue};
use postrider_spool::{SpoolConfig, SpoolManager};
use tokio::sync::broadcast;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn test_item() -> MailItem {
    MailItem::new(
        Some(Address::new("sender", "example.com")),
        vec![
            Address::new("alice", "example.org"),
            Address::new("bob", "example.org"),
        ],
        Some(Arc::from(b"Subject: spool\r\n\r\nbody".as_slice())),
    )
}

fn manager(
    queue: &Arc<MemoryMailQueue>,
    registry: ProcessorRegistry,
    workers: usize,
) -> Arc<SpoolManager> {
    Arc::new(
        SpoolManager::new(
            Arc::clone(queue) as Arc<dyn MailQueue>,
            Arc::new(registry),
            SpoolConfig {
                workers,
                shutdown_grace_secs: 5,
            },
        )
        .unwrap(),
    )
}

/// Spawn `serve` and return the join handle plus the shutdown sender.
fn spawn_serve(
    manager: &Arc<SpoolManager>,
) -> (
    tokio::task::JoinHandle<Result<(), postrider_spool::SpoolError>>,
    broadcast::Sender<Signal>,
) {
    let (tx, rx) = broadcast::channel(1);
    let manager = Arc::clone(manager);
    let handle = tokio::spawn(async move { manager.serve(rx).await });
    (handle, tx)
}

async fn drain(queue: &MemoryMailQueue) {
    tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("queue not drained, {} items left", queue.len()));
}

#[tokio::test]
async fn root_routes_to_transport_which_delivers_and_removes() {
    let registry = ProcessorRegistry::builder()
        .register(Processor::new(
            State::root(),
            vec![Step::new(
                Arc::new(All),
                Arc::new(ToProcessor::new(State::new("transport"))),
            )],
        ))
        .unwrap()
        .register(Processor::new(
            State::new("transport"),
            vec![Step::new(Arc::new(All), Arc::new(RemoveMatched))],
        ))
        .unwrap()
        .build()
        .unwrap();

    let queue = Arc::new(MemoryMailQueue::new());
    let manager = manager(&queue, registry, 2);
    let stats = manager.stats();
    let (serve, shutdown) = spawn_serve(&manager);

    manager.enqueue(test_item()).await.unwrap();
    drain(&queue).await;

    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap().unwrap();

    // Two passes: root reroutes, transport empties the recipients, and the
    // emptied item is removed for good.
    let snapshot = stats.snapshot();
    assert_eq!(snapshot[&State::root()].handled, 1);
    assert_eq!(snapshot[&State::new("transport")].handled, 1);
    assert_eq!(snapshot[&State::root()].errors, 0);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn discarded_items_are_removed_not_redelivered() {
    let registry = ProcessorRegistry::builder()
        .register(Processor::new(
            State::root(),
            vec![Step::new(Arc::new(All), Arc::new(Discard))],
        ))
        .unwrap()
        .build()
        .unwrap();

    let queue = Arc::new(MemoryMailQueue::new());
    let manager = manager(&queue, registry, 1);
    let (serve, shutdown) = spawn_serve(&manager);

    manager.enqueue(test_item()).await.unwrap();
    drain(&queue).await;

    // Give a redelivery every chance to happen before declaring victory.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(queue.is_empty());

    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap().unwrap();
}

#[tokio::test]
async fn already_terminal_items_are_removed_without_an_error() {
    let registry = ProcessorRegistry::builder()
        .register(Processor::new(State::root(), Vec::new()))
        .unwrap()
        .build()
        .unwrap();

    let queue = Arc::new(MemoryMailQueue::new());
    let manager = manager(&queue, registry, 1);
    let stats = manager.stats();
    let (serve, shutdown) = spawn_serve(&manager);

    // Enqueued straight into the terminal state, as a producer that made
    // its own routing decision would.
    let mut item = test_item();
    item.state = State::discard();
    manager.enqueue(item).await.unwrap();
    drain(&queue).await;

    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap().unwrap();

    // Removal, not a missing-processor configuration error.
    assert!(!stats.snapshot().contains_key(&State::discard()));
}

#[tokio::test]
async fn items_in_unconfigured_states_are_discarded_with_an_error() {
    let registry = ProcessorRegistry::builder()
        .register(Processor::new(State::root(), Vec::new()))
        .unwrap()
        .build()
        .unwrap();

    let queue = Arc::new(MemoryMailQueue::new());
    let manager = manager(&queue, registry, 1);
    let stats = manager.stats();
    let (serve, shutdown) = spawn_serve(&manager);

    let mut item = test_item();
    item.state = State::new("nowhere");
    manager.enqueue(item).await.unwrap();
    drain(&queue).await;

    shutdown.send(Signal::Shutdown).unwrap();
    serve.await.unwrap().unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot[&State::new("nowhere")].errors, 1);
    assert_eq!(snapshot[&State::new("nowhere")].handled, 0);
}

#[tokio::test]
async fn shutdown_returns_within_the_grace_period() {
    let registry = ProcessorRegistry::builder()
        .register(Processor::new(State::root(), Vec::new()))
        .unwrap()
        .build()
        .unwrap();

    let queue = Arc::new(MemoryMailQueue::new());
    let manager = manager(&queue, registry, 4);
    let (serve, shutdown) = spawn_serve(&manager);

    // Let every worker reach its blocked dequeue first.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.send(Signal::Shutdown).unwrap();

    tokio::time::timeout(Duration::from_secs(2), serve)
        .await
        .expect("serve did not stop within the grace period")
        .unwrap()
        .unwrap();
}
