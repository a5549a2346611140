use std::sync::Arc;

use tracing::{info, warn};

use crate::crypto::{decrypt_output, SessionKey};
use crate::engine::EngineTransport;
use crate::error::TaskError;
use crate::task::{EngineStatus, TaskHandle, TaskResult};

/// Turns a sealed task output back into plaintext with the caller's keys.
pub trait ResultDecryptor: Send + Sync {
    fn decrypt(&self, handle: &TaskHandle, encrypted: &[u8]) -> Result<Vec<u8>, TaskError>;
}

/// AES-256-GCM over `ciphertext ‖ tag ‖ iv` with a shared session key.
pub struct AesGcmDecryptor {
    key: SessionKey,
}

impl AesGcmDecryptor {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }
}

impl ResultDecryptor for AesGcmDecryptor {
    fn decrypt(&self, _handle: &TaskHandle, encrypted: &[u8]) -> Result<Vec<u8>, TaskError> {
        decrypt_output(&self.key, encrypted)
    }
}

pub struct ResultRetriever {
    transport: Arc<dyn EngineTransport>,
    decryptor: Arc<dyn ResultDecryptor>,
}

impl ResultRetriever {
    pub fn new(transport: Arc<dyn EngineTransport>, decryptor: Arc<dyn ResultDecryptor>) -> Self {
        Self { transport, decryptor }
    }

    /// Fetches and decrypts the output of a confirmed task.
    pub async fn retrieve(&self, handle: &TaskHandle) -> Result<TaskResult, TaskError> {
        if !handle.is_confirmed() {
            return Err(TaskError::Precedence(format!(
                "result of task {} requested while {}",
                handle.id(),
                handle.status()
            )));
        }

        let payload = self
            .transport
            .task_result(handle.id())
            .await
            .map_err(|err| TaskError::ResultUnavailable {
                task_id: handle.id().to_string(),
                reason: err.to_string(),
            })?;

        if payload.engine_status != EngineStatus::Success {
            warn!(task_id = %handle.id(), engine_status = payload.engine_status.as_wire(), "engine did not succeed");
            return Err(TaskError::ResultUnavailable {
                task_id: handle.id().to_string(),
                reason: format!("engine reported {}", payload.engine_status.as_wire()),
            });
        }

        let plaintext = self.decryptor.decrypt(handle, &payload.encrypted_output)?;
        info!(task_id = %handle.id(), bytes = plaintext.len(), "task result decrypted");
        Ok(TaskResult::encrypted(handle.id().clone(), payload.engine_status, payload.encrypted_output)
            .with_decrypted(plaintext))
    }
}
