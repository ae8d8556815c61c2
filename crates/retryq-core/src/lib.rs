//! retryq-core
//!
//! Durable task queue with bounded retries and a dead-letter queue.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, outcome, retry, decision, errors）
//! - **ports**: 抽象化レイヤー（Broker / QueueClient, WorkExecutor）
//! - **impls**: 実装（InMemoryBroker, SimulatedExecutor など開発用）
//! - **app**: アプリケーションロジック（producer, worker_loop, worker_group, baseline）
//! - **config**: 環境変数からの設定
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use config::{AckMode, Config};
pub use error::{ConfigError, WorkerError};
