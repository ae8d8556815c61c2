//! Baseline - broker を使わない比較用の実行
//!
//! 同じ executor で同じ `value = i % 25` のタスクを処理し、queue 経由の構成と
//! スループットを比べるためのもの。失敗は数えるだけでリトライしない。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use super::producer::Producer;
use crate::domain::TaskPayload;
use crate::error::WorkerError;
use crate::ports::WorkExecutor;

const PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaselineReport {
    pub processed: u64,
    pub failed: u64,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub workers: usize,
}

impl BaselineReport {
    /// Tasks per second. Zero when nothing measurable happened.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn payload_for(i: u64) -> TaskPayload {
    Producer::envelope_for(i).payload()
}

/// Process `num_tasks` payloads one after another on the current task.
pub async fn run_sequential(num_tasks: u64, executor: &dyn WorkExecutor) -> BaselineReport {
    let started = Instant::now();
    let mut failed = 0;

    for i in 0..num_tasks {
        if !executor.execute(payload_for(i)).await.is_success() {
            failed += 1;
        }
        if i > 0 && i % PROGRESS_EVERY == 0 {
            info!(processed = i, "baseline progress");
        }
    }

    let report = BaselineReport {
        processed: num_tasks,
        failed,
        elapsed: started.elapsed(),
        workers: 1,
    };
    log_report(&report);
    report
}

/// Preload an in-process queue and drain it with `workers` tokio tasks.
pub async fn run_parallel(
    num_tasks: u64,
    workers: usize,
    executor: Arc<dyn WorkExecutor>,
) -> Result<BaselineReport, WorkerError> {
    let workers = workers.max(1);
    let queue: Arc<Mutex<VecDeque<TaskPayload>>> =
        Arc::new(Mutex::new((0..num_tasks).map(payload_for).collect()));
    let processed = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));

    let started = Instant::now();
    let joins: Vec<_> = (0..workers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let executor = Arc::clone(&executor);
            let processed = Arc::clone(&processed);
            let failed = Arc::clone(&failed);

            tokio::spawn(async move {
                loop {
                    // ロックは pop の間だけ
                    let next = queue.lock().await.pop_front();
                    let Some(payload) = next else {
                        return;
                    };
                    if !executor.execute(payload).await.is_success() {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % PROGRESS_EVERY == 0 {
                        info!(processed = done, "baseline progress");
                    }
                }
            })
        })
        .collect();

    for (worker, join) in joins.into_iter().enumerate() {
        join.await.map_err(|e| WorkerError::Panicked {
            worker,
            reason: e.to_string(),
        })?;
    }

    let report = BaselineReport {
        processed: processed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
        workers,
    };
    log_report(&report);
    Ok(report)
}

fn log_report(report: &BaselineReport) {
    info!(
        processed = report.processed,
        failed = report.failed,
        workers = report.workers,
        elapsed_s = report.elapsed.as_secs_f64(),
        throughput = report.throughput(),
        "baseline finished"
    );
}
