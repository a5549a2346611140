use thiserror::Error;

use crate::engine::EngineError;
use crate::task::TaskStatus;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("task submission rejected: {0}")]
    Submission(String),

    #[error("status query failed after {attempts} attempt(s): {source}")]
    Polling {
        attempts: u32,
        #[source]
        source: EngineError,
    },

    #[error("task {task_id} not confirmed after {attempts} attempt(s), last status {last_status}")]
    Timeout {
        task_id: String,
        attempts: u32,
        last_status: TaskStatus,
    },

    #[error("polling for task {task_id} cancelled, last status {last_status}")]
    Cancelled {
        task_id: String,
        last_status: TaskStatus,
    },

    #[error("task {task_id} failed on chain with status code {code}")]
    TaskFailed { task_id: String, code: u8 },

    #[error("task {task_id} status went from {from} to {to}")]
    StatusRegression {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("result unavailable for task {task_id}: {reason}")]
    ResultUnavailable { task_id: String, reason: String },

    #[error("operation out of order: {0}")]
    Precedence(String),

    #[error("result decryption failed: {0}")]
    Decryption(String),

    #[error("malformed task output: {0}")]
    OutputLayout(String),

    #[error("recovered public key {recovered} does not match {expected}")]
    VerificationMismatch { expected: String, recovered: String },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("step '{step}' failed (last status {last_status}): {source}")]
    StepFailed {
        step: String,
        last_status: TaskStatus,
        #[source]
        source: Box<TaskError>,
    },
}

impl TaskError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Submission(_) => "submission",
            Self::Polling { .. } => "polling",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::TaskFailed { .. } => "task_failed",
            Self::StatusRegression { .. } => "status_regression",
            Self::ResultUnavailable { .. } => "result_unavailable",
            Self::Precedence(_) => "precedence",
            Self::Decryption(_) => "decryption",
            Self::OutputLayout(_) => "output_layout",
            Self::VerificationMismatch { .. } => "verification_mismatch",
            Self::Crypto(_) => "crypto",
            Self::StepFailed { source, .. } => source.kind(),
        }
    }
}
