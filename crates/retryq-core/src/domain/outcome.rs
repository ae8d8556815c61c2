//! Outcome model: result of one execution attempt.
//!
//! The executor never throws for an expected failure; it returns
//! `Outcome::Failure` and the worker loop turns that into a retry decision.

use serde::{Deserialize, Serialize};

/// Result of running a payload through a work executor.
///
/// Serialized as `{"kind":"SUCCESS"}` / `{"kind":"FAILURE","reason":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure { reason: String },
}

impl Outcome {
    pub fn success() -> Self {
        Self::Success
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
