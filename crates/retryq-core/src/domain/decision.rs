//! Decision model: what to do with a delivery once its outcome is known.
//!
//! The Decider is a pure function (envelope as delivered + outcome -> next
//! action). Applying the decision (ack, republish, dead-letter) is the worker
//! loop's job.

use super::{Outcome, RetryPolicy, TaskEnvelope};

/// The next action for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Success: retire the delivery, nothing else.
    Acknowledge,

    /// Failure within budget: republish to the main queue with the new count.
    Requeue { retry_count: u32, reason: String },

    /// Failure over budget: publish to the dead-letter queue with the new count.
    DeadLetter { retry_count: u32, reason: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, envelope: &TaskEnvelope, outcome: &Outcome) -> Decision;
}

/// Default decider: count the failure, then compare against the retry limit.
#[derive(Debug, Clone, Default)]
pub struct RetryLimitDecider {
    retry_policy: RetryPolicy,
}

impl RetryLimitDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Decider for RetryLimitDecider {
    fn decide(&self, envelope: &TaskEnvelope, outcome: &Outcome) -> Decision {
        let reason = match outcome {
            Outcome::Success => return Decision::Acknowledge,
            Outcome::Failure { reason } => reason.clone(),
        };

        // インクリメントしてから比較する（<= なので R 回までリトライ可）
        // これ以上数えられない envelope はリトライしない
        match envelope.retry_count().checked_add(1) {
            Some(retry_count) if self.retry_policy.allows_retry(retry_count) => {
                Decision::Requeue {
                    retry_count,
                    reason,
                }
            }
            Some(retry_count) => Decision::DeadLetter {
                retry_count,
                reason,
            },
            None => Decision::DeadLetter {
                retry_count: u32::MAX,
                reason,
            },
        }
    }
}
