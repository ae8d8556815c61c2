//! TaskEnvelope - タスク本体 + リトライ情報の運搬用データ
//!
//! # wire format
//! フラットな JSON レコード:
//! ```text
//! {"id": 7, "value": 7, "retry_count": 0}
//! ```
//! - `id` / `value` は必須。欠けている・型が違う場合は `EnvelopeError::Malformed`
//! - `retry_count` は省略可（古い producer や最小構成の producer 向けに 0 扱い）
//!
//! # 不変条件
//! - `retry_count` は過去の失敗回数そのもの。再投入のたびに envelope と一緒に運ばれる
//! - `retry_count` を書き換えるのは worker loop だけ（`set_retry_count` は crate 内限定）

use serde::{Deserialize, Serialize};

use super::errors::EnvelopeError;
use super::ids::TaskId;

/// Application data handed to the work executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub value: i64,
}

impl TaskPayload {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

/// One unit of work plus its retry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    id: TaskId,

    #[serde(flatten)]
    payload: TaskPayload,

    #[serde(default)]
    retry_count: u32,
}

impl TaskEnvelope {
    /// Fresh envelope as created by a producer (`retry_count = 0`).
    pub fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            payload,
            retry_count: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn payload(&self) -> TaskPayload {
        self.payload
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Apply the retry count chosen by a decider.
    pub(crate) fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    /// Serialize into the flat wire record.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::json!({
            "id": self.id.get(),
            "value": self.payload.value,
            "retry_count": self.retry_count,
        })
        .to_string()
        .into_bytes()
    }

    /// Parse a wire record.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed {
            reason: e.to_string(),
        })
    }
}
