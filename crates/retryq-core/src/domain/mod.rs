//! Domain model (ids, envelope, outcome, retry policy, decision, errors).
//!
//! ここには queue や broker の知識を持ち込まない。

pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod retry;

pub use decision::{Decider, Decision, RetryLimitDecider};
pub use envelope::{TaskEnvelope, TaskPayload};
pub use errors::EnvelopeError;
pub use ids::TaskId;
pub use outcome::Outcome;
pub use retry::RetryPolicy;
