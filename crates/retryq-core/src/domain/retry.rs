//! Retry policy: how many retries a logical task gets.

use serde::{Deserialize, Serialize};

/// Retry budget for failed tasks.
///
/// A task may be retried while its (already incremented) retry count is
/// `<= retry_limit`. With `retry_limit = R` that means 1 initial attempt plus
/// R retries, and the envelope reaches the dead-letter queue with
/// `retry_count == R + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_limit: u32,
}

impl RetryPolicy {
    pub const DEFAULT_RETRY_LIMIT: u32 = 3;

    pub fn new(retry_limit: u32) -> Self {
        Self { retry_limit }
    }

    /// Is another attempt allowed for an envelope that has now failed
    /// `retry_count` times?
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count <= self.retry_limit
    }

    /// Total number of attempts a task that always fails will get.
    pub fn max_attempts(&self) -> u64 {
        u64::from(self.retry_limit) + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRY_LIMIT)
    }
}
