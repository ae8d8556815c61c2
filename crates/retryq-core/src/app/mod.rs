//! App - アプリケーション層
//!
//! ports を組み合わせて producer / worker を実装します。
//!
//! # 主要コンポーネント
//! - **Producer**: タスクを task queue に投入
//! - **WorkerLoop**: 配送 1 件ごとの処理（decode→execute→decide→resolve）
//! - **WorkerGroup**: 複数 worker の起動と graceful shutdown
//! - **StatusBoard**: worker 間で共有する処理件数
//! - **baseline**: broker を使わない比較用の実行

pub mod baseline;
pub mod producer;
pub mod status;
pub mod worker_group;
pub mod worker_loop;

pub use self::baseline::{BaselineReport, run_parallel, run_sequential};
pub use self::producer::{Producer, PublishReport};
pub use self::status::{Resolution, StatusBoard, WorkerStats};
pub use self::worker_group::WorkerGroup;
pub use self::worker_loop::{WorkerLoop, WorkerSettings};
