use rlm::core::types::SessionOutcome;
use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    /// Depth or iteration budget ran out before a final answer.
    Exhausted,
    Error,
}

/// `session` is `None` when the session returned a transport error.
pub fn classify_outcome(session: Option<&SessionOutcome>, judgment: &Judgment) -> Outcome {
    match session {
        Some(SessionOutcome::Answered { .. }) => {
            if judgment.checks.iter().all(|check| check.passed()) {
                Outcome::Success
            } else {
                Outcome::Fail
            }
        }
        Some(SessionOutcome::DepthExhausted | SessionOutcome::IterationsExhausted) => {
            Outcome::Exhausted
        }
        None => Outcome::Error,
    }
}
