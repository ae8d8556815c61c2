use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::status::{StatusBoard, WorkerStats};
use super::worker_loop::{WorkerLoop, WorkerSettings};
use crate::error::WorkerError;
use crate::ports::{Broker, WorkExecutor};

/// Worker group handle.
/// - 各 worker は自分専用の queue client を持つ（共有するのは StatusBoard だけ）
/// - `shutdown_and_join()` で全 worker の終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<Result<(), WorkerError>>>,
    status: Arc<StatusBoard>,
}

impl WorkerGroup {
    /// Connect and spawn `n` workers.
    ///
    /// Every worker is connected before any is spawned, so a broker that is
    /// down fails here instead of inside a background task.
    pub async fn start(
        n: usize,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn WorkExecutor>,
        settings: WorkerSettings,
    ) -> Result<Self, WorkerError> {
        let status = Arc::new(StatusBoard::new());

        let mut workers = Vec::with_capacity(n);
        for worker_id in 0..n {
            let started = WorkerLoop::start(
                worker_id,
                broker.as_ref(),
                Arc::clone(&executor),
                settings.clone(),
                Arc::clone(&status),
            )
            .await;

            match started {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in workers {
                        worker.close().await;
                    }
                    return Err(e);
                }
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let joins = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown_rx.clone())))
            .collect();

        info!(workers = n, queue = %settings.task_queue, "worker group started");
        Ok(Self {
            shutdown_tx,
            joins,
            status,
        })
    }

    pub fn snapshot(&self) -> WorkerStats {
        self.status.snapshot()
    }

    /// True once any worker has stopped (normally only after shutdown, or on a broker error).
    pub fn any_finished(&self) -> bool {
        self.joins.iter().any(JoinHandle::is_finished)
    }

    /// Request shutdown for all workers.
    /// In-flight deliveries are still resolved; workers just stop taking new ones.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers. Returns the first worker error, if any.
    pub async fn shutdown_and_join(self) -> Result<WorkerStats, WorkerError> {
        self.request_shutdown();

        let mut first_error = None;
        for (worker, join) in self.joins.into_iter().enumerate() {
            let result = match join.await {
                Ok(result) => result,
                Err(e) => Err(WorkerError::Panicked {
                    worker,
                    reason: e.to_string(),
                }),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        let stats = self.status.snapshot();
        info!(
            succeeded = stats.succeeded,
            requeued = stats.requeued,
            dead_lettered = stats.dead_lettered,
            malformed = stats.malformed,
            "worker group stopped"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}
