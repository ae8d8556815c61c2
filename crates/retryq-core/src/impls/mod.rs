//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryBroker**: プロセス内の durable queue broker（dead-letter queue も同じ仕組み）
//! - **SimulatedExecutor** ほか: 参照用・テスト用の WorkExecutor
//!
//! 実 broker（AMQP など）への接続は `Broker` / `QueueClient` を実装した別クレートに置く想定。

pub mod inmem_broker;
pub mod simulated;

pub use self::inmem_broker::{InMemoryBroker, InMemoryClient, PublishRecord};
pub use self::simulated::{AlwaysFail, AlwaysSucceed, FailTimes, SimulatedExecutor, fibonacci};
