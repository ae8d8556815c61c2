//! WorkExecutor port - タスクごとのビジネスロジック
//!
//! 契約は「payload を受け取り Success / Failure(reason) を返す」だけ。
//! payload は値渡しなので executor が envelope（retry_count）を書き換えることはできない。

use async_trait::async_trait;

use crate::domain::{Outcome, TaskPayload};

/// Runs the payload-specific work of one task.
///
/// # 使用例
/// ```ignore
/// struct Doubler;
///
/// #[async_trait]
/// impl WorkExecutor for Doubler {
///     async fn execute(&self, payload: TaskPayload) -> Outcome {
///         if payload.value < 0 {
///             return Outcome::failure("negative input");
///         }
///         Outcome::success()
///     }
/// }
/// ```
#[async_trait]
pub trait WorkExecutor: Send + Sync {
    async fn execute(&self, payload: TaskPayload) -> Outcome;
}
