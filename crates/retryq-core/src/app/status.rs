//! Status - worker の処理件数
//!
//! `StatusBoard` は同じ group の worker 間で共有されるカウンタ。
//! 共有されるのはこの観測用カウンタだけで、配送の調整はすべて broker 経由で行う。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Executor succeeded; delivery acknowledged.
    Acknowledged,
    /// Executor failed within budget; republished to the main queue.
    Requeued { retry_count: u32 },
    /// Executor failed over budget; published to the dead-letter queue.
    DeadLettered { retry_count: u32 },
    /// Body could not be decoded; raw bytes published to the dead-letter queue.
    Malformed,
}

/// Snapshot of delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub received: u64,
    pub succeeded: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
}

impl WorkerStats {
    /// Deliveries that reached a terminal resolution (no further attempts).
    pub fn settled(&self) -> u64 {
        self.succeeded + self.dead_lettered + self.malformed
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    received: AtomicU64,
    succeeded: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, resolution: Resolution) {
        let counter = match resolution {
            Resolution::Acknowledged => &self.succeeded,
            Resolution::Requeued { .. } => &self.requeued,
            Resolution::DeadLettered { .. } => &self.dead_lettered,
            Resolution::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}
