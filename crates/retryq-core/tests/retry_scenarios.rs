//! End-to-end delivery scenarios against the in-memory broker.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;

use retryq_core::AckMode;
use retryq_core::app::{Producer, Resolution, StatusBoard, WorkerGroup, WorkerLoop, WorkerSettings};
use retryq_core::domain::{Outcome, RetryPolicy, TaskEnvelope, TaskId, TaskPayload};
use retryq_core::impls::{AlwaysFail, AlwaysSucceed, InMemoryBroker, SimulatedExecutor};
use retryq_core::ports::{Broker, WorkExecutor};

const TASK_QUEUE: &str = "task_queue";
const DEAD_LETTER_QUEUE: &str = "task_queue_dead_letter";

fn settings(retry_limit: u32, ack_mode: AckMode) -> WorkerSettings {
    WorkerSettings {
        task_queue: TASK_QUEUE.to_string(),
        dead_letter_queue: DEAD_LETTER_QUEUE.to_string(),
        retry_policy: RetryPolicy::new(retry_limit),
        prefetch: 1,
        ack_mode,
    }
}

async fn publish(broker: &InMemoryBroker, body: Vec<u8>) {
    let mut client = broker.connect().await.unwrap();
    client.declare_durable_queue(TASK_QUEUE).await.unwrap();
    client.publish(TASK_QUEUE, body, true).await.unwrap();
    client.close().await;
}

/// Run one worker until the task queue has nothing left to deliver.
async fn drain_with_one_worker(
    broker: &InMemoryBroker,
    executor: Arc<dyn WorkExecutor>,
    settings: WorkerSettings,
) -> Vec<Resolution> {
    let mut worker = WorkerLoop::start(0, broker, executor, settings, Arc::new(StatusBoard::new()))
        .await
        .unwrap();

    let mut resolutions = Vec::new();
    while broker.queue_len(TASK_QUEUE).await > 0 {
        resolutions.push(worker.run_once().await.unwrap());
    }
    worker.close().await;
    resolutions
}

fn decode_all(bodies: &[Vec<u8>]) -> Vec<TaskEnvelope> {
    bodies.iter().map(|b| TaskEnvelope::decode(b).unwrap()).collect()
}

/// Fails every time and counts how often it was called.
#[derive(Default)]
struct CountingFailure {
    calls: AtomicU64,
}

#[async_trait]
impl WorkExecutor for CountingFailure {
    async fn execute(&self, _payload: TaskPayload) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Outcome::failure("boom")
    }
}

#[rstest]
#[case::ack_then_resolve(AckMode::AckThenResolve)]
#[case::resolve_then_ack(AckMode::ResolveThenAck)]
#[tokio::test]
async fn persistent_failure_ends_in_dead_letter_queue(#[case] ack_mode: AckMode) {
    let broker = InMemoryBroker::new();
    let envelope = TaskEnvelope::new(TaskId::new(7), TaskPayload::new(7));
    publish(&broker, envelope.encode()).await;

    let resolutions =
        drain_with_one_worker(&broker, Arc::new(AlwaysFail::default()), settings(2, ack_mode)).await;

    assert_eq!(
        resolutions,
        vec![
            Resolution::Requeued { retry_count: 1 },
            Resolution::Requeued { retry_count: 2 },
            Resolution::DeadLettered { retry_count: 3 },
        ]
    );

    let log = broker.publish_log().await;
    let main_counts: Vec<u32> = log
        .iter()
        .filter(|r| r.queue == TASK_QUEUE)
        .map(|r| TaskEnvelope::decode(&r.body).unwrap().retry_count())
        .collect();
    assert_eq!(main_counts, vec![0, 1, 2]);
    assert!(log.iter().all(|r| r.persistent));

    let dead = decode_all(&broker.queue_bodies(DEAD_LETTER_QUEUE).await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id(), TaskId::new(7));
    assert_eq!(dead[0].payload(), TaskPayload::new(7));
    assert_eq!(dead[0].retry_count(), 3);

    assert!(broker.is_drained(TASK_QUEUE).await);
    assert_eq!(broker.unacked_count().await, 0);
}

#[tokio::test]
async fn first_attempt_success_is_acknowledged_once() {
    let broker = InMemoryBroker::new();
    publish(&broker, Producer::envelope_for(42).encode()).await;

    let resolutions = drain_with_one_worker(
        &broker,
        Arc::new(AlwaysSucceed),
        settings(3, AckMode::default()),
    )
    .await;

    assert_eq!(resolutions, vec![Resolution::Acknowledged]);
    // 最初の publish だけで、requeue も dead-letter もない
    assert_eq!(broker.publish_log().await.len(), 1);
    assert_eq!(broker.queue_len(DEAD_LETTER_QUEUE).await, 0);
    assert!(broker.is_drained(TASK_QUEUE).await);
}

#[tokio::test]
async fn malformed_body_is_dead_lettered_verbatim() {
    let broker = InMemoryBroker::new();
    let garbage = br#"{"id": "seven", "value": 1}"#.to_vec();
    publish(&broker, garbage.clone()).await;

    let resolutions = drain_with_one_worker(
        &broker,
        Arc::new(AlwaysSucceed),
        settings(3, AckMode::default()),
    )
    .await;

    assert_eq!(resolutions, vec![Resolution::Malformed]);
    assert_eq!(broker.queue_bodies(DEAD_LETTER_QUEUE).await, vec![garbage]);
    let main_publishes = broker
        .publish_log()
        .await
        .iter()
        .filter(|r| r.queue == TASK_QUEUE)
        .count();
    assert_eq!(main_publishes, 1);
}

#[tokio::test]
async fn missing_retry_count_is_treated_as_first_attempt() {
    let broker = InMemoryBroker::new();
    publish(&broker, br#"{"id": 3, "value": 3}"#.to_vec()).await;

    let resolutions = drain_with_one_worker(
        &broker,
        Arc::new(AlwaysFail::default()),
        settings(0, AckMode::default()),
    )
    .await;

    assert_eq!(resolutions, vec![Resolution::DeadLettered { retry_count: 1 }]);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[case(5)]
#[tokio::test]
async fn always_failing_task_runs_retry_limit_plus_one_times(#[case] retry_limit: u32) {
    let broker = InMemoryBroker::new();
    publish(&broker, Producer::envelope_for(1).encode()).await;
    let executor = Arc::new(CountingFailure::default());

    drain_with_one_worker(
        &broker,
        executor.clone(),
        settings(retry_limit, AckMode::default()),
    )
    .await;

    assert_eq!(
        executor.calls.load(Ordering::SeqCst),
        RetryPolicy::new(retry_limit).max_attempts()
    );
    let dead = decode_all(&broker.queue_bodies(DEAD_LETTER_QUEUE).await);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count(), retry_limit + 1);
}

#[tokio::test]
async fn retry_counts_only_grow_for_a_task() {
    let broker = InMemoryBroker::new();
    for id in 0..5 {
        publish(&broker, Producer::envelope_for(id).encode()).await;
    }

    drain_with_one_worker(
        &broker,
        Arc::new(AlwaysFail::default()),
        settings(3, AckMode::default()),
    )
    .await;

    let log = broker.publish_log().await;
    for id in 0..5 {
        let counts: Vec<u32> = log
            .iter()
            .map(|r| TaskEnvelope::decode(&r.body).unwrap())
            .filter(|e| e.id() == TaskId::new(id))
            .map(|e| e.retry_count())
            .collect();
        assert_eq!(counts, vec![0, 1, 2, 3, 4], "task {id}");
    }
}

#[rstest]
#[case::ack_then_resolve(AckMode::AckThenResolve)]
#[case::resolve_then_ack(AckMode::ResolveThenAck)]
#[tokio::test]
async fn every_task_settles_exactly_once_across_workers(#[case] ack_mode: AckMode) {
    const N: u64 = 300;
    let broker = InMemoryBroker::new();
    let group = WorkerGroup::start(
        4,
        Arc::new(broker.clone()),
        Arc::new(SimulatedExecutor::new(0.3, Duration::ZERO)),
        settings(1, ack_mode),
    )
    .await
    .unwrap();

    let mut producer = Producer::connect(&broker, TASK_QUEUE).await.unwrap();
    producer.publish(N).await.unwrap();
    producer.close().await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while group.snapshot().settled() < N {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let stats = group.shutdown_and_join().await.unwrap();

    assert_eq!(stats.succeeded + stats.dead_lettered, N);
    assert_eq!(stats.malformed, 0);
    assert_eq!(stats.received, stats.succeeded + stats.requeued + stats.dead_lettered);

    let dead = decode_all(&broker.queue_bodies(DEAD_LETTER_QUEUE).await);
    assert_eq!(dead.len() as u64, stats.dead_lettered);
    let unique: HashSet<TaskId> = dead.iter().map(TaskEnvelope::id).collect();
    assert_eq!(unique.len(), dead.len());
    assert!(dead.iter().all(|e| e.retry_count() == 2));

    assert!(broker.is_drained(TASK_QUEUE).await);
    assert_eq!(broker.max_unacked_observed().await, 1);
}

#[tokio::test]
async fn unacknowledged_delivery_is_redelivered_with_its_retry_count() {
    let broker = InMemoryBroker::new();
    let envelope = TaskEnvelope::new(TaskId::new(9), TaskPayload::new(9));
    // 2 回失敗済みの状態で投入
    let body = {
        let mut raw = serde_json::to_value(&envelope).unwrap();
        raw["retry_count"] = 2.into();
        serde_json::to_vec(&raw).unwrap()
    };
    publish(&broker, body.clone()).await;

    // consumer が ack 前に落ちる
    let mut crashed = broker.connect().await.unwrap();
    crashed.consume(TASK_QUEUE, 1).await.unwrap();
    let delivery = crashed.next_delivery().await.unwrap();
    assert!(!delivery.redelivered);
    crashed.close().await;

    assert_eq!(broker.queue_bodies(TASK_QUEUE).await, vec![body]);

    let resolutions = drain_with_one_worker(
        &broker,
        Arc::new(AlwaysFail::default()),
        settings(2, AckMode::default()),
    )
    .await;
    assert_eq!(resolutions, vec![Resolution::DeadLettered { retry_count: 3 }]);

    let dead = decode_all(&broker.queue_bodies(DEAD_LETTER_QUEUE).await);
    assert_eq!(dead[0].id(), envelope.id());
    assert_eq!(dead[0].retry_count(), 3);
}

#[tokio::test]
async fn persistent_tasks_survive_broker_restart() {
    let broker = InMemoryBroker::new();
    let mut producer = Producer::connect(&broker, TASK_QUEUE).await.unwrap();
    producer.publish(10).await.unwrap();
    producer.close().await;

    broker.simulate_restart().await;
    assert_eq!(broker.queue_len(TASK_QUEUE).await, 10);
}

#[tokio::test]
async fn graceful_shutdown_leaves_remaining_tasks_queued() {
    let broker = InMemoryBroker::new();
    let mut producer = Producer::connect(&broker, TASK_QUEUE).await.unwrap();
    producer.publish(1000).await.unwrap();
    producer.close().await;

    let group = WorkerGroup::start(
        2,
        Arc::new(broker.clone()),
        Arc::new(SimulatedExecutor::new(0.0, Duration::from_millis(2))),
        settings(3, AckMode::default()),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let stats = group.shutdown_and_join().await.unwrap();

    // 処理中だった delivery も解決済み。残りは queue に残る
    assert_eq!(broker.unacked_count().await, 0);
    assert_eq!(
        broker.queue_len(TASK_QUEUE).await as u64 + stats.succeeded,
        1000
    );
}
