use crate::execution_loop::Attempt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepairError {
    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Query execution error: {message}")]
    QueryExecution { message: String },

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RepairError {
    /// Text fed back to the translator as the repair signal.
    ///
    /// Store failures carry the engine's message verbatim, without the
    /// variant prefix used by `Display`.
    pub fn repair_signal(&self) -> String {
        match self {
            RepairError::QueryExecution { message } => message.clone(),
            RepairError::Translation(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepairError>;

/// Terminal failure for one question: every attempt in the budget failed.
#[derive(Error, Debug, Clone)]
#[error("Max retries ({}) reached for {question:?}. Last error: {last_error}", .attempts.len())]
pub struct RetryExhausted {
    pub question: String,
    pub attempts: Vec<Attempt>,
    pub last_error: String,
}

/// Everything a repair run can surface to its caller.
#[derive(Error, Debug, Clone)]
pub enum QuestionFailure {
    #[error(transparent)]
    Exhausted(#[from] RetryExhausted),

    #[error("Cancelled {question:?} after {} attempt(s)", .attempts.len())]
    Cancelled {
        question: String,
        attempts: Vec<Attempt>,
    },

    /// The run itself died (a panicked batch task); no attempt was recorded.
    #[error("Aborted {question:?}: {reason}")]
    Aborted { question: String, reason: String },
}

impl QuestionFailure {
    pub fn question(&self) -> &str {
        match self {
            QuestionFailure::Exhausted(e) => &e.question,
            QuestionFailure::Cancelled { question, .. } => question,
            QuestionFailure::Aborted { question, .. } => question,
        }
    }

    pub fn attempts(&self) -> &[Attempt] {
        match self {
            QuestionFailure::Exhausted(e) => &e.attempts,
            QuestionFailure::Cancelled { attempts, .. } => attempts,
            QuestionFailure::Aborted { .. } => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuestionFailure::Cancelled { .. })
    }
}
