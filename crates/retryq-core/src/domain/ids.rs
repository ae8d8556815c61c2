//! Domain identifiers (strongly-typed IDs).
//!
//! TaskId は producer が一度だけ採番する論理タスクの ID です。
//! リトライで再投入されても同じ値のまま運ばれます（再利用はしない）。
//!
//! wire 上は素の整数（`{"id": 7}`）として表現するため `#[serde(transparent)]` を付けています。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical task.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 内部の整数値を取得
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_serializes_as_plain_integer() {
        let id = TaskId::new(42);
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "42");

        let back: TaskId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_has_prefix() {
        assert_eq!(TaskId::from(7).to_string(), "task-7");
    }

    #[test]
    fn negative_id_is_rejected() {
        let parsed: Result<TaskId, _> = serde_json::from_str("-1");
        assert!(parsed.is_err());
    }
}
