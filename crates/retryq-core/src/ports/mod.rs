//! Ports - 抽象化レイヤー
//!
//! 外部の協調者（message broker, タスクの実処理）へのインターフェース。
//! - **QueueClient / Broker**: 永続キューへの publish / consume / ack
//! - **WorkExecutor**: payload を処理して Outcome を返す

pub mod executor;
pub mod queue_client;

pub use self::executor::WorkExecutor;
pub use self::queue_client::{Broker, Delivery, DeliveryHandle, QueueClient, QueueError};
