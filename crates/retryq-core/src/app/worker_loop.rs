//! WorkerLoop - 配送 1 件ごとのリトライ状態機械
//!
//! # フロー（delivery ごと）
//! 1. `QueueClient::next_delivery()` で 1 件受け取る（prefetch により同時に 1 件まで）
//! 2. envelope を decode。壊れていれば生バイトのまま dead-letter queue へ
//! 3. WorkExecutor 実行 → Outcome
//! 4. Decider 実行 → Decision
//! 5. Decision を適用
//!    - Acknowledge: ack のみ
//!    - Requeue: retry_count を進めて main queue へ persistent publish + ack
//!    - DeadLetter: retry_count を進めて dead-letter queue へ persistent publish + ack
//!
//! 元の delivery は結果に関係なく必ず 1 回だけ ack する。リトライは broker の
//! 再配送ではなく、retry_count を埋め込んだ新しいメッセージとして表現する。
//!
//! # エラー方針
//! - 実行失敗・decode 失敗はここで吸収して上に出さない
//! - broker の障害（ack / publish の失敗）だけが `WorkerError` として run を終わらせる

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::status::{Resolution, StatusBoard};
use crate::config::{AckMode, Config};
use crate::domain::{Decider, Decision, Outcome, RetryLimitDecider, RetryPolicy, TaskEnvelope, TaskPayload};
use crate::error::WorkerError;
use crate::ports::{Broker, Delivery, DeliveryHandle, QueueClient, QueueError, WorkExecutor};

/// Everything a worker needs to know about its queues and retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub task_queue: String,
    pub dead_letter_queue: String,
    pub retry_policy: RetryPolicy,
    pub prefetch: usize,
    pub ack_mode: AckMode,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            task_queue: config.task_queue.clone(),
            dead_letter_queue: config.dead_letter_queue.clone(),
            retry_policy: config.retry_policy(),
            prefetch: config.prefetch,
            ack_mode: config.ack_mode,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, Copy)]
enum Route {
    TaskQueue,
    DeadLetterQueue,
}

/// One worker: exclusively owns one queue client for its whole lifetime.
pub struct WorkerLoop {
    worker_id: usize,
    client: Box<dyn QueueClient>,
    executor: Arc<dyn WorkExecutor>,
    decider: Arc<dyn Decider>,
    settings: WorkerSettings,
    status: Arc<StatusBoard>,
}

impl WorkerLoop {
    /// Connect, declare both durable queues and start consuming the task queue.
    pub async fn start(
        worker_id: usize,
        broker: &dyn Broker,
        executor: Arc<dyn WorkExecutor>,
        settings: WorkerSettings,
        status: Arc<StatusBoard>,
    ) -> Result<Self, WorkerError> {
        let mut client = broker.connect().await?;
        if let Err(e) = Self::setup(client.as_mut(), &settings).await {
            client.close().await;
            return Err(e.into());
        }

        let decider = Arc::new(RetryLimitDecider::new(settings.retry_policy));
        Ok(Self {
            worker_id,
            client,
            executor,
            decider,
            settings,
            status,
        })
    }

    async fn setup(client: &mut dyn QueueClient, settings: &WorkerSettings) -> Result<(), QueueError> {
        client.declare_durable_queue(&settings.task_queue).await?;
        client.declare_durable_queue(&settings.dead_letter_queue).await?;
        client.consume(&settings.task_queue, settings.prefetch).await
    }

    /// Process deliveries until shutdown is requested (or the sender is dropped).
    ///
    /// Shutdown is only observed between deliveries: an in-flight delivery is
    /// always resolved first. The client is closed on every exit path.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            worker = self.worker_id,
            queue = %self.settings.task_queue,
            retry_limit = self.settings.retry_policy.retry_limit,
            ack_mode = %self.settings.ack_mode,
            "worker started. waiting for tasks"
        );

        let result = self.consume_until_shutdown(&mut shutdown).await;
        match &result {
            Ok(()) => info!(worker = self.worker_id, "stopping worker"),
            Err(e) => error!(worker = self.worker_id, error = %e, "worker aborted"),
        }

        self.client.close().await;
        result
    }

    async fn consume_until_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkerError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // next_delivery は待つ可能性があるので shutdown と競合させる
            // 両方 ready なら shutdown を優先（新しい delivery を受け取らない）
            let delivery = tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    continue;
                }
                delivery = self.client.next_delivery() => delivery?,
            };

            self.handle_delivery(delivery).await?;
        }
    }

    /// Wait for exactly one delivery and resolve it.
    pub async fn run_once(&mut self) -> Result<Resolution, WorkerError> {
        let delivery = self.client.next_delivery().await?;
        self.handle_delivery(delivery).await
    }

    /// Release the queue client without processing anything else.
    pub async fn close(self) {
        self.client.close().await;
    }

    /// Drive one delivery through decode → execute → decide → resolve.
    pub async fn handle_delivery(&mut self, delivery: Delivery) -> Result<Resolution, WorkerError> {
        let Delivery {
            handle,
            body,
            redelivered,
        } = delivery;
        self.status.record_received();

        let mut envelope = match TaskEnvelope::decode(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                // リトライしても decode は成功しないので直接 dead-letter へ
                error!(
                    worker = self.worker_id,
                    %handle,
                    bytes = body.len(),
                    error = %err,
                    "malformed envelope, routing raw bytes to dead-letter queue"
                );
                self.resolve(handle, Route::DeadLetterQueue, body).await?;
                self.status.record(Resolution::Malformed);
                return Ok(Resolution::Malformed);
            }
        };

        if redelivered {
            debug!(
                worker = self.worker_id,
                task_id = %envelope.id(),
                retry_count = envelope.retry_count(),
                "broker redelivered an unacknowledged task"
            );
        }

        let started = Instant::now();
        let outcome = Self::execute(Arc::clone(&self.executor), envelope.payload()).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let resolution = match self.decider.decide(&envelope, &outcome) {
            Decision::Acknowledge => {
                self.client.acknowledge(handle).await?;
                info!(
                    worker = self.worker_id,
                    task_id = %envelope.id(),
                    retry_count = envelope.retry_count(),
                    elapsed_ms,
                    "[OK ] task done"
                );
                Resolution::Acknowledged
            }
            Decision::Requeue {
                retry_count,
                reason,
            } => {
                self.log_failure(&envelope, &reason, elapsed_ms);
                envelope.set_retry_count(retry_count);

                self.resolve(handle, Route::TaskQueue, envelope.encode()).await?;
                info!(
                    worker = self.worker_id,
                    task_id = %envelope.id(),
                    retry_count,
                    " -> requeued task"
                );
                Resolution::Requeued { retry_count }
            }
            Decision::DeadLetter {
                retry_count,
                reason,
            } => {
                self.log_failure(&envelope, &reason, elapsed_ms);
                envelope.set_retry_count(retry_count);

                self.resolve(handle, Route::DeadLetterQueue, envelope.encode())
                    .await?;
                warn!(
                    worker = self.worker_id,
                    task_id = %envelope.id(),
                    retry_count,
                    " -> sent task to dead-letter queue"
                );
                Resolution::DeadLettered { retry_count }
            }
        };

        self.status.record(resolution);
        Ok(resolution)
    }

    /// Run the executor on its own task so a panic becomes a failure outcome
    /// instead of leaving the delivery unresolved.
    async fn execute(executor: Arc<dyn WorkExecutor>, payload: TaskPayload) -> Outcome {
        match tokio::spawn(async move { executor.execute(payload).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::failure(format!("executor panicked: {e}")),
        }
    }

    fn log_failure(&self, envelope: &TaskEnvelope, reason: &str, elapsed_ms: f64) {
        warn!(
            worker = self.worker_id,
            task_id = %envelope.id(),
            retry_count = envelope.retry_count(),
            reason,
            elapsed_ms,
            "[ERR] task failed"
        );
    }

    /// Retire `handle` and publish `body` to `route`, in the configured order.
    async fn resolve(
        &mut self,
        handle: DeliveryHandle,
        route: Route,
        body: Vec<u8>,
    ) -> Result<(), QueueError> {
        let queue = match route {
            Route::TaskQueue => &self.settings.task_queue,
            Route::DeadLetterQueue => &self.settings.dead_letter_queue,
        };

        match self.settings.ack_mode {
            AckMode::AckThenResolve => {
                self.client.acknowledge(handle).await?;
                self.client.publish(queue, body, true).await
            }
            AckMode::ResolveThenAck => {
                self.client.publish(queue, body, true).await?;
                self.client.acknowledge(handle).await
            }
        }
    }
}
