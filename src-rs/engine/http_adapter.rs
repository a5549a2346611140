use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{EngineError, EngineTransport, ResultPayload, SubmitOutcome};
use crate::task::{EngineStatus, TaskId, TaskRequest};

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:3346";

pub struct GatewayConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// JSON-RPC client for the task gateway that fronts the registry and the
/// workers.
pub struct GatewayAdapter {
    cfg: GatewayConfig,
    client: Client,
    next_id: AtomicU64,
}

enum RpcReply {
    Result(Value),
    Error { code: i64, message: String },
}

impl GatewayAdapter {
    pub fn new(mut cfg: GatewayConfig) -> Result<Self, EngineError> {
        if cfg.base_url.is_empty() {
            cfg.base_url = DEFAULT_GATEWAY_URL.to_string();
        }
        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = 30;
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|err| EngineError::new("client_error", &err.to_string(), false))?;
        Ok(Self {
            cfg,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    async fn call(&self, method: &str, params: Value) -> Result<RpcReply, EngineError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "gateway call");

        let resp = self
            .client
            .post(&self.cfg.base_url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| EngineError::new("network_error", &err.to_string(), true))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(EngineError::new("server_error", &body, true));
        }
        if status.is_client_error() {
            return Err(EngineError::new(
                "api_error",
                &format!("HTTP {}: {}", status.as_u16(), body),
                false,
            ));
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|_| EngineError::new("parse_error", "invalid json", false))?;
        if let Some(err) = raw.get("error").filter(|v| !v.is_null()) {
            return Ok(RpcReply::Error {
                code: err.get("code").and_then(|v| v.as_i64()).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        raw.get("result")
            .cloned()
            .map(RpcReply::Result)
            .ok_or_else(|| EngineError::new("parse_error", "response has no result", false))
    }

    async fn call_result(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        match self.call(method, params).await? {
            RpcReply::Result(value) => Ok(value),
            RpcReply::Error { code, message } => Err(EngineError::new(
                "rpc_error",
                &format!("{} (code {})", message, code),
                false,
            )),
        }
    }
}

#[async_trait]
impl EngineTransport for GatewayAdapter {
    async fn submit_task(&self, request: &TaskRequest) -> Result<SubmitOutcome, EngineError> {
        let params = json!({
            "taskFn": request.function_signature,
            "taskArgs": request.wire_args(),
            "gasLimit": request.gas_limit,
            "gasPx": request.gas_price,
            "sender": request.sender,
            "contractAddr": request.target_contract,
        });
        match self.call("sendTaskInput", params).await? {
            RpcReply::Result(value) => {
                let task_id = value
                    .get("taskId")
                    .and_then(|v| v.as_str())
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| EngineError::new("parse_error", "missing taskId", false))?;
                Ok(SubmitOutcome::Accepted {
                    task_id: TaskId::new(task_id),
                })
            }
            RpcReply::Error { code, message } => Ok(SubmitOutcome::Rejected {
                reason: format!("{} (code {})", message, code),
            }),
        }
    }

    async fn task_record_status(&self, task_id: &TaskId) -> Result<u8, EngineError> {
        let value = self
            .call_result("getTaskRecordStatus", json!({ "taskId": task_id }))
            .await?;
        let code = value
            .get("ethStatus")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| EngineError::new("parse_error", "missing ethStatus", false))?;
        u8::try_from(code)
            .map_err(|_| EngineError::new("parse_error", &format!("status out of range: {}", code), false))
    }

    async fn task_result(&self, task_id: &TaskId) -> Result<ResultPayload, EngineError> {
        let value = self
            .call_result("getTaskResult", json!({ "taskId": task_id }))
            .await?;
        let engine_status = value
            .get("engStatus")
            .and_then(|v| v.as_str())
            .map(EngineStatus::from_wire)
            .ok_or_else(|| EngineError::new("parse_error", "missing engStatus", false))?;
        let encrypted_hex = value
            .get("encryptedOutput")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let encrypted_output = hex::decode(encrypted_hex.trim_start_matches("0x"))
            .map_err(|_| EngineError::new("parse_error", "encryptedOutput is not hex", false))?;
        Ok(ResultPayload {
            engine_status,
            encrypted_output,
        })
    }
}
