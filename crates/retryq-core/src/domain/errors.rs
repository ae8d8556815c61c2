//! Errors - ドメイン層のエラー
//!
//! 実行失敗（ExecutionFailure）はエラーではなく `Outcome::Failure` で表現します。
//! ここに残るのは decode 時の構造エラーだけです。

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Required fields are missing or have the wrong shape. Never retried.
    #[error("malformed envelope: {reason}")]
    Malformed { reason: String },
}
