use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::{EngineStatus, TaskId, TaskRequest};

/// Transport-level failure talking to the execution layer.
#[derive(Clone, Debug)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn new(code: &str, message: &str, retryable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// Answer to a task submission: either the layer accepted the input and
/// assigned an id, or it refused it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { task_id: TaskId },
    Rejected { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultPayload {
    pub engine_status: EngineStatus,
    pub encrypted_output: Vec<u8>,
}

/// The execution layer as seen by the lifecycle components.
///
/// Implementations perform exactly one call per method and never retry;
/// retry policy belongs to the caller.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn submit_task(&self, request: &TaskRequest) -> Result<SubmitOutcome, EngineError>;

    /// Raw registry status code for the task record.
    async fn task_record_status(&self, task_id: &TaskId) -> Result<u8, EngineError>;

    async fn task_result(&self, task_id: &TaskId) -> Result<ResultPayload, EngineError>;
}
