//! InMemoryBroker - 開発・テスト用の broker
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による待機付き consume
//! - `Notified::enable()` を状態確認の前に呼んで通知の取りこぼしを防ぐ
//! - ロックを取った後は await しない（next_delivery を cancel safe に保つ）
//!
//! # broker としての振る舞い
//! - queue は名前ごとの FIFO。publish 時に `persistent` フラグを保持する
//! - consumer ごとに未 ack の delivery 数を数え、prefetch を超える配送はしない
//! - client の close 時、未 ack の delivery は元の queue の先頭に戻る（redelivered = true）
//! - `simulate_restart()` で非 persistent メッセージが消える
//! - `set_available(false)` で全操作が `BrokerUnavailable` になる

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use crate::ports::{Broker, Delivery, DeliveryHandle, QueueClient, QueueError};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    persistent: bool,
    redelivered: bool,
}

#[derive(Debug)]
struct Unacked {
    client_id: u64,
    queue: String,
    message: StoredMessage,
}

/// One accepted publish, in broker order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub queue: String,
    pub body: Vec<u8>,
    pub persistent: bool,
}

struct BrokerState {
    available: bool,

    queues: HashMap<String, VecDeque<StoredMessage>>,

    /// Delivered but not yet acknowledged.
    unacked: HashMap<DeliveryHandle, Unacked>,

    next_delivery_tag: u64,
    next_client_id: u64,

    /// `None` when the broker was built without a publish log.
    publish_log: Option<Vec<PublishRecord>>,

    /// Highest number of unacked deliveries any single client held at once.
    max_unacked_observed: usize,
}

impl BrokerState {
    fn new(record_publishes: bool) -> Self {
        Self {
            available: true,
            queues: HashMap::new(),
            unacked: HashMap::new(),
            next_delivery_tag: 1,
            next_client_id: 1,
            publish_log: record_publishes.then(Vec::new),
            max_unacked_observed: 0,
        }
    }

    fn ensure_available(&self) -> Result<(), QueueError> {
        if self.available {
            Ok(())
        } else {
            Err(QueueError::BrokerUnavailable(
                "in-memory broker is down".to_string(),
            ))
        }
    }

    fn allocate_handle(&mut self) -> DeliveryHandle {
        let handle = DeliveryHandle::new(self.next_delivery_tag);
        self.next_delivery_tag += 1;
        handle
    }

    fn allocate_client_id(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        id
    }

    fn outstanding(&self, client_id: u64) -> usize {
        self.unacked
            .values()
            .filter(|u| u.client_id == client_id)
            .count()
    }

    /// Put unacked deliveries matching `pred` back at the head of their queues,
    /// oldest delivery first.
    fn return_unacked(&mut self, pred: impl Fn(&Unacked) -> bool) -> usize {
        let mut handles: Vec<DeliveryHandle> = self
            .unacked
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(h, _)| *h)
            .collect();
        handles.sort();

        for handle in handles.iter().rev() {
            if let Some(unacked) = self.unacked.remove(handle) {
                let mut message = unacked.message;
                message.redelivered = true;
                self.queues
                    .entry(unacked.queue)
                    .or_default()
                    .push_front(message);
            }
        }
        handles.len()
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// In-process broker. Cloning shares the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Broker that keeps a copy of every accepted publish (see [`Self::publish_log`]).
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Broker for long runs: nothing is retained once a message is acknowledged.
    pub fn without_publish_log() -> Self {
        Self::build(false)
    }

    fn build(record_publishes: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new(record_publishes)),
                notify: Notify::new(),
            }),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub async fn set_available(&self, available: bool) {
        self.shared.state.lock().await.available = available;
        // 待機中の consumer に状態変化を確認させる
        self.shared.notify.notify_waiters();
    }

    /// Number of ready (not yet delivered) messages in `queue`.
    pub async fn queue_len(&self, queue: &str) -> usize {
        let state = self.shared.state.lock().await;
        state.queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    /// Bodies of the ready messages in `queue`, head first.
    pub async fn queue_bodies(&self, queue: &str) -> Vec<Vec<u8>> {
        let state = self.shared.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Nothing ready in `queue` and nothing delivered from it left unacknowledged.
    pub async fn is_drained(&self, queue: &str) -> bool {
        let state = self.shared.state.lock().await;
        let ready = state.queues.get(queue).map(VecDeque::len).unwrap_or(0);
        ready == 0 && !state.unacked.values().any(|u| u.queue == queue)
    }

    pub async fn unacked_count(&self) -> usize {
        self.shared.state.lock().await.unacked.len()
    }

    pub async fn max_unacked_observed(&self) -> usize {
        self.shared.state.lock().await.max_unacked_observed
    }

    /// Every accepted publish in broker order. Test introspection: empty for a
    /// broker built with [`Self::without_publish_log`].
    pub async fn publish_log(&self) -> Vec<PublishRecord> {
        self.shared
            .state
            .lock()
            .await
            .publish_log
            .clone()
            .unwrap_or_default()
    }

    /// Simulate a broker restart: unacked deliveries return to their queues,
    /// then every non-persistent message is lost. Queues themselves are durable.
    pub async fn simulate_restart(&self) {
        {
            let mut state = self.shared.state.lock().await;
            let returned = state.return_unacked(|_| true);
            let mut dropped = 0;
            for queue in state.queues.values_mut() {
                let before = queue.len();
                queue.retain(|m| m.persistent);
                dropped += before - queue.len();
            }
            debug!(returned, dropped, "in-memory broker restarted");
        }
        self.shared.notify.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError> {
        let mut state = self.shared.state.lock().await;
        state.ensure_available()?;
        let id = state.allocate_client_id();
        Ok(Box::new(InMemoryClient {
            shared: Arc::clone(&self.shared),
            id,
            subscription: None,
        }))
    }
}

struct Subscription {
    queue: String,
    prefetch: usize,
}

/// One connection to an [`InMemoryBroker`].
pub struct InMemoryClient {
    shared: Arc<Shared>,
    id: u64,
    subscription: Option<Subscription>,
}

#[async_trait]
impl QueueClient for InMemoryClient {
    async fn declare_durable_queue(&mut self, name: &str) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        state.ensure_available()?;
        state.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), QueueError> {
        {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            state.ensure_available()?;
            let Some(ready) = state.queues.get_mut(queue) else {
                return Err(QueueError::UnknownQueue(queue.to_string()));
            };
            if let Some(log) = state.publish_log.as_mut() {
                log.push(PublishRecord {
                    queue: queue.to_string(),
                    body: body.clone(),
                    persistent,
                });
            }
            ready.push_back(StoredMessage {
                body,
                persistent,
                redelivered: false,
            });
        } // Lock released here

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&mut self, queue: &str, prefetch_limit: usize) -> Result<(), QueueError> {
        if prefetch_limit == 0 {
            return Err(QueueError::InvalidPrefetch);
        }
        let state = self.shared.state.lock().await;
        state.ensure_available()?;
        if !state.queues.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        self.subscription = Some(Subscription {
            queue: queue.to_string(),
            prefetch: prefetch_limit,
        });
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, QueueError> {
        let Some(subscription) = &self.subscription else {
            return Err(QueueError::NotConsuming);
        };

        loop {
            // 先に enable しておけば、状態確認と await の間の publish も取りこぼさない
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                state.ensure_available()?;

                let outstanding = state.outstanding(self.id);
                if outstanding >= subscription.prefetch {
                    return Err(QueueError::PrefetchExhausted {
                        outstanding,
                        limit: subscription.prefetch,
                    });
                }

                let message = state
                    .queues
                    .get_mut(&subscription.queue)
                    .and_then(VecDeque::pop_front);

                if let Some(message) = message {
                    let handle = state.allocate_handle();
                    let delivery = Delivery {
                        handle,
                        body: message.body.clone(),
                        redelivered: message.redelivered,
                    };
                    state.unacked.insert(
                        handle,
                        Unacked {
                            client_id: self.id,
                            queue: subscription.queue.clone(),
                            message,
                        },
                    );
                    let held = outstanding + 1;
                    state.max_unacked_observed = state.max_unacked_observed.max(held);
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn acknowledge(&mut self, handle: DeliveryHandle) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        state.ensure_available()?;
        match state.unacked.get(&handle) {
            Some(unacked) if unacked.client_id == self.id => {
                state.unacked.remove(&handle);
                Ok(())
            }
            _ => Err(QueueError::UnknownDelivery(handle)),
        }
    }

    async fn close(self: Box<Self>) {
        let returned = {
            let mut state = self.shared.state.lock().await;
            let id = self.id;
            state.return_unacked(|u| u.client_id == id)
        };
        if returned > 0 {
            debug!(client = self.id, returned, "returned unacked deliveries on close");
            self.shared.notify.notify_waiters();
        }
    }
}
