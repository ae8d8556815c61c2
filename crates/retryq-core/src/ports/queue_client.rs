//! QueueClient port - 永続キュー（broker）への接続
//!
//! broker 本体（ディスク永続化・接続ネゴシエーション）は外部の責務。
//! ここで定義するのは worker / producer が必要とする最小限の操作だけです。
//!
//! # 所有権
//! - `Broker` は共有される接続ファクトリ（`Arc<dyn Broker>`）
//! - `QueueClient` は 1 つの接続/チャネル。worker が生存期間中ずっと排他的に所有する
//! - delivery handle はその client 上でしか ack できない

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque token correlating one delivery with its acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle(u64);

impl DeliveryHandle {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }
}

impl fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery-{}", self.0)
    }
}

/// One occurrence of the broker handing a message to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub handle: DeliveryHandle,
    pub body: Vec<u8>,
    /// Set when the broker hands back a message a previous consumer never acknowledged.
    pub redelivered: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("queue '{0}' has not been declared")]
    UnknownQueue(String),

    /// Never issued, already resolved, or issued to another client.
    #[error("unknown delivery handle: {0}")]
    UnknownDelivery(DeliveryHandle),

    #[error("prefetch limit must be at least 1")]
    InvalidPrefetch,

    #[error("{outstanding} unacknowledged deliveries already held (prefetch limit {limit})")]
    PrefetchExhausted { outstanding: usize, limit: usize },

    #[error("client is not consuming from any queue")]
    NotConsuming,
}

/// Connection factory. One call = one exclusively owned client.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError>;
}

/// A single connection/channel to the broker.
#[async_trait]
pub trait QueueClient: Send {
    /// Idempotent. The queue survives broker restarts.
    async fn declare_durable_queue(&mut self, name: &str) -> Result<(), QueueError>;

    /// Durable once this returns `Ok` and `persistent` is set.
    async fn publish(&mut self, queue: &str, body: Vec<u8>, persistent: bool)
        -> Result<(), QueueError>;

    /// Start consuming `queue`, holding at most `prefetch_limit` unacknowledged deliveries.
    async fn consume(&mut self, queue: &str, prefetch_limit: usize) -> Result<(), QueueError>;

    /// Wait for the next delivery of the consumed queue.
    ///
    /// Cancel safe: dropping the future before it resolves does not lose a message.
    async fn next_delivery(&mut self) -> Result<Delivery, QueueError>;

    /// Must be called exactly once per delivery handle.
    async fn acknowledge(&mut self, handle: DeliveryHandle) -> Result<(), QueueError>;

    /// Release the connection. Unacknowledged deliveries go back to their queue.
    async fn close(self: Box<Self>);
}
