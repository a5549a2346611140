use std::sync::Arc;

use tracing::{info, warn};

use crate::engine::{EngineTransport, SubmitOutcome};
use crate::error::TaskError;
use crate::task::{TaskHandle, TaskRequest};

/// Hands task requests to the execution layer. One attempt per call.
pub struct TaskSubmitter {
    transport: Arc<dyn EngineTransport>,
}

impl TaskSubmitter {
    pub fn new(transport: Arc<dyn EngineTransport>) -> Self {
        Self { transport }
    }

    pub async fn submit(&self, request: TaskRequest) -> Result<TaskHandle, TaskError> {
        let signature = request.validate().map_err(TaskError::Submission)?;

        let outcome = self.transport.submit_task(&request).await.map_err(|err| {
            warn!(function = %signature, error = %err, "task submission failed");
            TaskError::Submission(err.to_string())
        })?;

        match outcome {
            SubmitOutcome::Accepted { task_id } => {
                info!(task_id = %task_id, function = %signature, gas_limit = request.gas_limit, "task accepted");
                Ok(TaskHandle::pending(task_id, &request.function_signature))
            }
            SubmitOutcome::Rejected { reason } => {
                warn!(function = %signature, reason = %reason, "task rejected");
                Err(TaskError::Submission(reason))
            }
        }
    }
}
