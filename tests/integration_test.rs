// Integration tests for followgraph
use async_trait::async_trait;
use followgraph::{
    ConsumerState, Disposition, EdgeOutcome, EventConsumer, EventError, FollowError, GraphStore,
    MemoryGraphStore, RelationshipService, RetryPolicy, Shutdown, StorageManager, StoreConfig,
};
use followgraph_events::{ConsumeExit, Delivery};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn open_store(dir: &tempfile::TempDir) -> Arc<StorageManager> {
    let config = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        map_size: 32 * 1024 * 1024,
        op_timeout: Duration::from_secs(5),
    };
    Arc::new(StorageManager::open(config).unwrap())
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        requeue_delay: Duration::ZERO,
        ..RetryPolicy::default()
    }
}

struct QueuedDelivery {
    routing_key: String,
    body: Vec<u8>,
    settled: Arc<Mutex<Vec<(String, Disposition)>>>,
}

#[async_trait]
impl Delivery for QueuedDelivery {
    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    async fn settle(self, disposition: Disposition) -> Result<(), EventError> {
        let body = String::from_utf8_lossy(&self.body).into_owned();
        self.settled.lock().unwrap().push((body, disposition));
        Ok(())
    }
}

/// A broker stand-in: an open channel of deliveries plus a settlement log.
struct FakeQueue {
    tx: mpsc::UnboundedSender<QueuedDelivery>,
    settled: Arc<Mutex<Vec<(String, Disposition)>>>,
}

impl FakeQueue {
    fn new() -> (Self, impl futures_util::Stream<Item = Result<QueuedDelivery, Infallible>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|d| (Ok::<_, Infallible>(d), rx))
        });
        let queue = Self {
            tx,
            settled: Arc::new(Mutex::new(Vec::new())),
        };
        (queue, stream)
    }

    fn publish(&self, routing_key: &str, body: &str) {
        self.tx
            .send(QueuedDelivery {
                routing_key: routing_key.to_string(),
                body: body.as_bytes().to_vec(),
                settled: self.settled.clone(),
            })
            .unwrap();
    }

    fn settled(&self) -> Vec<(String, Disposition)> {
        self.settled.lock().unwrap().clone()
    }
}

async fn wait_for_node(store: &dyn GraphStore, user: i64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.node_exists(user).await.unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_upsert_node_twice_yields_one_node() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    for id in [-3i64, 0, 42, i64::MAX] {
        store.upsert_node(id).await.unwrap();
        store.upsert_node(id).await.unwrap();
    }
    assert_eq!(store.node_count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_delete_absent_node_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store.delete_node(99).await.unwrap();
    store.upsert_node(1).await.unwrap();
    store.delete_node(99).await.unwrap();
    assert_eq!(store.node_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_cascades_incident_edges() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    for id in [1, 2, 3] {
        store.upsert_node(id).await.unwrap();
    }
    store.upsert_edge(1, 2).await.unwrap();
    store.upsert_edge(3, 1).await.unwrap();
    store.upsert_edge(3, 2).await.unwrap();

    store.delete_node(1).await.unwrap();

    assert!(!store.edge_exists(1, 2).await.unwrap());
    assert!(!store.edge_exists(3, 1).await.unwrap());
    assert!(store.edge_exists(3, 2).await.unwrap());
    assert_eq!(store.followers(2).await.unwrap(), vec![3]);
}

#[tokio::test]
async fn test_create_follow_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store.upsert_node(1).await.unwrap();
    store.upsert_node(2).await.unwrap();

    let service = RelationshipService::new(store.clone());
    let first = service.create_follow(1, 2).await.unwrap();
    let second = service.create_follow(1, 2).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.edge_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_missing_follower_is_not_found_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store.upsert_node(2).await.unwrap();

    let service = RelationshipService::new(store.clone());
    let err = service.create_follow(1, 2).await.unwrap_err();

    assert!(matches!(err, FollowError::FollowerNotFound(1)));
    assert!(err.is_not_found());
    assert_eq!(store.edge_count().await.unwrap(), 0);
    assert_eq!(store.node_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_event_does_not_block_stream() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let (queue, stream) = FakeQueue::new();

    let mut consumer = EventConsumer::new(store.clone(), fast_retry());
    let state = consumer.watch_state();
    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let task = tokio::spawn(async move {
        let exit = consumer.consume(stream, signal).await;
        (exit, consumer)
    });

    queue.publish("user.created", "not-a-number");
    queue.publish("user.created", "42");
    wait_for_node(store.as_ref(), 42).await;

    assert_eq!(*state.borrow(), ConsumerState::Consuming);
    assert!(!task.is_finished());

    shutdown.trigger();
    let (exit, consumer) = task.await.unwrap();
    assert_eq!(exit.unwrap(), ConsumeExit::Shutdown);
    assert_eq!(
        queue.settled(),
        vec![
            ("not-a-number".to_string(), Disposition::DeadLetter),
            ("42".to_string(), Disposition::Ack),
        ]
    );
    assert_eq!(consumer.stats().acked, 1);
    assert_eq!(consumer.stats().dead_lettered, 1);
}

#[tokio::test]
async fn test_lifecycle_events_drive_follow_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let service = RelationshipService::new(store.clone());
    let mut consumer = EventConsumer::new(store.clone(), fast_retry());

    assert!(matches!(
        service.create_follow(5, 6).await,
        Err(FollowError::FollowerNotFound(5))
    ));

    assert_eq!(consumer.handle("user.created", b"5").await, Disposition::Ack);
    assert!(matches!(
        service.create_follow(5, 6).await,
        Err(FollowError::FollowedNotFound(6))
    ));

    assert_eq!(consumer.handle("user.created", b"6").await, Disposition::Ack);
    service.create_follow(5, 6).await.unwrap();
    assert!(store.edge_exists(5, 6).await.unwrap());

    assert_eq!(consumer.handle("user.renamed", b"6").await, Disposition::Ack);
    assert!(store.edge_exists(5, 6).await.unwrap());

    assert_eq!(consumer.handle("user.deleted", b"6").await, Disposition::Ack);
    assert!(!store.edge_exists(5, 6).await.unwrap());
    assert_eq!(consumer.handle("user.deleted", b"6").await, Disposition::Ack);
}

async fn race_created_event_against_follow(store: Arc<dyn GraphStore>) {
    store.upsert_node(8).await.unwrap();

    let mut consumer = EventConsumer::new(store.clone(), fast_retry());
    let service = RelationshipService::new(store.clone());

    let event = tokio::spawn(async move { consumer.handle("user.created", b"7").await });
    let follow = tokio::spawn(async move { service.create_follow(7, 8).await });

    let disposition = event.await.unwrap();
    let outcome = follow.await.unwrap();

    assert_eq!(disposition, Disposition::Ack);
    assert!(store.node_exists(7).await.unwrap());

    let edge = store.edge_exists(7, 8).await.unwrap();
    match outcome {
        Ok(rel) => {
            assert!(edge, "follow succeeded but no edge was written");
            assert_eq!((rel.follower_id, rel.followed_user_id), (7, 8));
        }
        Err(FollowError::FollowerNotFound(7)) => {
            assert!(!edge, "follow was refused but an edge exists");
        }
        Err(other) => panic!("unexpected outcome: {other}"),
    }
    assert!(!store.edge_exists(8, 7).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_follow_converge_lmdb() {
    for _ in 0..25 {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        race_created_event_against_follow(store.clone()).await;
        assert!(store.edge_count().await.unwrap() <= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_and_follow_converge_memory() {
    for _ in 0..200 {
        let store = Arc::new(MemoryGraphStore::new());
        race_created_event_against_follow(store.clone()).await;
        assert!(store.edge_count() <= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_racing_edge_write_leaves_no_phantom_edge() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    for round in 0..25i64 {
        let (a, b) = (round * 2, round * 2 + 1);
        store.upsert_node(a).await.unwrap();
        store.upsert_node(b).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.upsert_edge(a, b).await.unwrap() })
        };
        let deleter = {
            let store = store.clone();
            tokio::spawn(async move { store.delete_node(a).await.unwrap() })
        };

        let outcome = writer.await.unwrap();
        deleter.await.unwrap();

        assert!(matches!(outcome, EdgeOutcome::Created | EdgeOutcome::MissingFollower));
        assert!(!store.edge_exists(a, b).await.unwrap());
        assert!(store.followers(b).await.unwrap().is_empty());
    }
}
