//! Executors for demos and tests.
//!
//! - **SimulatedExecutor**: CPU を少し使い、一定確率で失敗する参照実装
//! - **AlwaysSucceed / AlwaysFail / FailTimes**: テスト用の決定的な executor

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Outcome, TaskPayload};
use crate::ports::WorkExecutor;

/// Iterative fibonacci with wrapping arithmetic, used to burn some CPU.
pub fn fibonacci(n: i64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n.max(0) {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    a
}

/// Placeholder business logic: fibonacci of `value`, a random failure with
/// probability `failure_rate`, then a fixed `latency`.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    pub failure_rate: f64,
    pub latency: Duration,
}

impl SimulatedExecutor {
    pub const DEFAULT_FAILURE_RATE: f64 = 0.05;
    pub const DEFAULT_LATENCY: Duration = Duration::from_millis(2);

    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
        }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FAILURE_RATE, Self::DEFAULT_LATENCY)
    }
}

#[async_trait]
impl WorkExecutor for SimulatedExecutor {
    async fn execute(&self, payload: TaskPayload) -> Outcome {
        if rand::random::<f64>() < self.failure_rate {
            return Outcome::failure("simulated failure");
        }

        std::hint::black_box(fibonacci(payload.value));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Outcome::success()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlwaysSucceed;

#[async_trait]
impl WorkExecutor for AlwaysSucceed {
    async fn execute(&self, _payload: TaskPayload) -> Outcome {
        Outcome::success()
    }
}

#[derive(Debug, Clone)]
pub struct AlwaysFail {
    reason: String,
}

impl AlwaysFail {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Default for AlwaysFail {
    fn default() -> Self {
        Self::new("always fails")
    }
}

#[async_trait]
impl WorkExecutor for AlwaysFail {
    async fn execute(&self, _payload: TaskPayload) -> Outcome {
        Outcome::failure(self.reason.clone())
    }
}

/// Fails the first `n` executions (across all payloads), then succeeds.
#[derive(Debug)]
pub struct FailTimes {
    remaining_failures: AtomicU32,
}

impl FailTimes {
    pub fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl WorkExecutor for FailTimes {
    async fn execute(&self, _payload: TaskPayload) -> Outcome {
        let claimed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match claimed {
            Ok(left) => Outcome::failure(format!("intentional failure (left={left})")),
            Err(_) => Outcome::success(),
        }
    }
}
