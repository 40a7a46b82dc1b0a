//! Error taxonomy for the orchestration core.
//!
//! One flat enum rather than per-component nested enums: the taxonomy in
//! use is the contract every component (orchestrator, agent runtime, llm
//! gateway, event bus, session store) returns through, so callers match on
//! `CoreError` directly instead of downcasting through several layers.

use std::time::Duration;

use thiserror::Error;

/// The kind of a transient failure, carried through so callers can decide
/// whether it is worth retrying again at a higher level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientKind {
    Network,
    ParseFailure,
    StoreBusy,
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransientKind::Network => write!(f, "network"),
            TransientKind::ParseFailure => write!(f, "parse_failure"),
            TransientKind::StoreBusy => write!(f, "store_busy"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} is already terminal")]
    SessionTerminal(String),

    #[error("session {0} is not in the clarifying phase")]
    NotClarifying(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient error ({kind})")]
    TransientError { kind: TransientKind },

    #[error("llm provider unavailable: {0}")]
    LlmUnavailable(String),

    #[error("clarification exhausted after {rounds} rounds, overall quality {overall:.2}")]
    ClarificationExhausted { rounds: u32, overall: f64 },

    #[error("session {0} is stale")]
    StaleSession(String),

    #[error("session {0} timed out waiting for user input")]
    IdleTimeout(String),

    #[error("task graph for session {0} contains a cycle")]
    InvalidTaskGraph(String),

    #[error("requested sequence {requested} has fallen out of the retained window (earliest {earliest})")]
    ReplayUnavailable { requested: u64, earliest: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Whether a task-level retry loop should attempt this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientError {
                kind: TransientKind::Network | TransientKind::ParseFailure | TransientKind::StoreBusy
            }
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
