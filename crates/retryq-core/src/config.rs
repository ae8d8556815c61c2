//! Typed configuration from environment variables.
//!
//! Loaded once at startup; an unparsable value fails fast, a missing one
//! falls back to its default. In local dev the binary calls
//! `dotenvy::dotenv().ok()` before this.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::error::ConfigError;

pub const ENV_BROKER_HOST: &str = "RETRYQ_BROKER_HOST";
pub const ENV_TASK_QUEUE: &str = "RETRYQ_TASK_QUEUE";
pub const ENV_DEAD_LETTER_QUEUE: &str = "RETRYQ_DEAD_LETTER_QUEUE";
pub const ENV_RETRY_LIMIT: &str = "RETRYQ_RETRY_LIMIT";
pub const ENV_PREFETCH: &str = "RETRYQ_PREFETCH";
pub const ENV_ACK_MODE: &str = "RETRYQ_ACK_MODE";

/// Order of "retire the old delivery" and "publish the new state" on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Ack first, then requeue / dead-letter. A crash in between loses the task.
    AckThenResolve,

    /// Requeue / dead-letter first, then ack. A crash in between may duplicate
    /// the task, but never loses it.
    #[default]
    ResolveThenAck,
}

impl AckMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::AckThenResolve => "ack-then-resolve",
            AckMode::ResolveThenAck => "resolve-then-ack",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ack-then-resolve" => Ok(AckMode::AckThenResolve),
            "resolve-then-ack" => Ok(AckMode::ResolveThenAck),
            other => Err(format!(
                "expected 'ack-then-resolve' or 'resolve-then-ack', got '{other}'"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub broker_host: String,
    pub task_queue: String,
    pub dead_letter_queue: String,
    pub retry_limit: u32,
    pub prefetch: usize,
    pub ack_mode: AckMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            task_queue: "task_queue".to_string(),
            dead_letter_queue: "task_queue_dead_letter".to_string(),
            retry_limit: RetryPolicy::DEFAULT_RETRY_LIMIT,
            prefetch: 1,
            ack_mode: AckMode::default(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let prefetch = parsed(&lookup, ENV_PREFETCH, defaults.prefetch)?;
        if prefetch == 0 {
            return Err(ConfigError::Invalid {
                name: ENV_PREFETCH,
                value: "0".to_string(),
                reason: "prefetch must be at least 1".to_string(),
            });
        }

        let task_queue = text(&lookup, ENV_TASK_QUEUE, defaults.task_queue);
        let dead_letter_queue = text(&lookup, ENV_DEAD_LETTER_QUEUE, defaults.dead_letter_queue);
        if task_queue == dead_letter_queue {
            return Err(ConfigError::Invalid {
                name: ENV_DEAD_LETTER_QUEUE,
                value: task_queue,
                reason: "dead-letter queue must differ from the task queue".to_string(),
            });
        }

        Ok(Self {
            broker_host: text(&lookup, ENV_BROKER_HOST, defaults.broker_host),
            task_queue,
            dead_letter_queue,
            retry_limit: parsed(&lookup, ENV_RETRY_LIMIT, defaults.retry_limit)?,
            prefetch,
            ack_mode: parsed(&lookup, ENV_ACK_MODE, defaults.ack_mode)?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit)
    }
}

fn text<F>(lookup: &F, name: &str, default: String) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
