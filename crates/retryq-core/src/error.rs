use thiserror::Error;

use crate::ports::QueueError;

/// Errors that end a worker (or producer) run.
///
/// Execution failures and malformed envelopes never show up here; the worker
/// loop absorbs them into ack / requeue / dead-letter decisions.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("worker {worker} panicked: {reason}")]
    Panicked { worker: usize, reason: String },
}

impl WorkerError {
    /// Broker went away: the run cannot continue safely.
    pub fn is_broker_unavailable(&self) -> bool {
        matches!(self, WorkerError::Queue(QueueError::BrokerUnavailable(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}
