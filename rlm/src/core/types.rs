//! Shared deterministic types for the session core.
//!
//! These types define stable contracts between the orchestrator, the
//! execution environment and the transport. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Answer text returned when a session is entered past the depth cap.
pub const DEPTH_EXHAUSTED: &str = "Max recursion depth reached.";
/// Answer text returned when a session runs out of iterations.
pub const ITERATIONS_EXHAUSTED: &str = "Max iterations reached without final answer.";

/// Role tag of a turn in the session history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Operating instructions for the protocol. Serialized as `system` for
    /// chat-style model services.
    #[serde(rename = "system")]
    Instructions,
    User,
    Assistant,
}

/// One role-tagged message in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn instructions(content: impl Into<String>) -> Self {
        Self {
            role: Role::Instructions,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How a session terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// A final-answer directive was parsed from a reply.
    Answered { answer: String },
    /// The session was entered with `depth > max_depth`; no model call was made.
    DepthExhausted,
    /// The iteration cap was reached without a final-answer directive.
    IterationsExhausted,
}

impl SessionOutcome {
    pub fn answered(answer: impl Into<String>) -> Self {
        Self::Answered {
            answer: answer.into(),
        }
    }

    /// Text form of the outcome, as seen by a parent snippet.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { answer } => answer,
            Self::DepthExhausted => DEPTH_EXHAUSTED,
            Self::IterationsExhausted => ITERATIONS_EXHAUSTED,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered { .. })
    }
}

/// Everything that happened in one session, including nested delegations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub depth: u32,
    pub model: String,
    pub query: String,
    /// Context size in characters (the body itself is not recorded).
    pub context_chars: usize,
    /// Number of model calls issued by this session (children excluded).
    pub model_calls: u32,
    pub outcome: SessionOutcome,
    pub history: Vec<Turn>,
    pub duration_ms: u64,
    /// Child sessions spawned by `llm_query`, in call order.
    pub children: Vec<SessionRecord>,
}

impl SessionRecord {
    /// Model calls issued by this session and all of its descendants.
    pub fn total_model_calls(&self) -> u32 {
        self.model_calls
            + self
                .children
                .iter()
                .map(SessionRecord::total_model_calls)
                .sum::<u32>()
    }

    /// Deepest depth reached in this session tree.
    pub fn max_depth_reached(&self) -> u32 {
        self.children
            .iter()
            .map(SessionRecord::max_depth_reached)
            .max()
            .unwrap_or(self.depth)
    }
}
