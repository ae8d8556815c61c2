//! Producer - タスクを task queue に投入する
//!
//! id は 0..n の連番、payload の値は `id % 25`、retry_count は 0。
//! すべて persistent で publish する。

use std::time::{Duration, Instant};

use tracing::info;

use crate::domain::{TaskEnvelope, TaskId, TaskPayload};
use crate::ports::{Broker, QueueClient, QueueError};

const PROGRESS_EVERY: u64 = 1000;
const VALUE_MODULUS: u64 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub published: u64,
    pub elapsed: Duration,
}

pub struct Producer {
    client: Box<dyn QueueClient>,
    task_queue: String,
}

impl Producer {
    /// Open a client and declare the durable task queue.
    pub async fn connect(broker: &dyn Broker, task_queue: impl Into<String>) -> Result<Self, QueueError> {
        let task_queue = task_queue.into();
        let mut client = broker.connect().await?;
        if let Err(e) = client.declare_durable_queue(&task_queue).await {
            client.close().await;
            return Err(e);
        }
        Ok(Self { client, task_queue })
    }

    /// The envelope published for task `id`.
    pub fn envelope_for(id: u64) -> TaskEnvelope {
        TaskEnvelope::new(TaskId::new(id), TaskPayload::new((id % VALUE_MODULUS) as i64))
    }

    /// Publish tasks `0..n`. Stops at the first broker error.
    pub async fn publish(&mut self, n: u64) -> Result<PublishReport, QueueError> {
        let started = Instant::now();

        for id in 0..n {
            let body = Self::envelope_for(id).encode();
            self.client.publish(&self.task_queue, body, true).await?;

            let sent = id + 1;
            if sent % PROGRESS_EVERY == 0 {
                info!(sent, total = n, "publishing tasks");
            }
        }

        let elapsed = started.elapsed();
        info!(
            published = n,
            queue = %self.task_queue,
            elapsed_ms = elapsed.as_millis() as u64,
            "published all tasks"
        );
        Ok(PublishReport {
            published: n,
            elapsed,
        })
    }

    pub async fn close(self) {
        self.client.close().await;
    }
}
