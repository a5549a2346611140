use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::types::{EngineError, EngineTransport, ResultPayload, SubmitOutcome};
use crate::crypto::{derive_public_key, encrypt_output, sign_message, SessionKey, PUBLIC_KEY_LEN};
use crate::lifecycle::verifier::OutputRecord;
use crate::task::{EngineStatus, TaskArg, TaskId, TaskRequest};

const STATUS_UNDEFINED: u8 = 0;
const STATUS_CREATED: u8 = 1;
const STATUS_VERIFIED: u8 = 2;
const STATUS_FAILED: u8 = 3;

struct User {
    user_id: String,
    private_key: Vec<u8>,
    public_key: [u8; PUBLIC_KEY_LEN],
}

struct Login {
    user_id: String,
    code: u128,
    valid: bool,
}

#[derive(Default)]
struct ContractState {
    users: Vec<User>,
    logins: Vec<Login>,
}

struct SimTask {
    queries: u32,
    outcome: Result<Vec<u8>, String>,
}

#[derive(Default)]
struct SimState {
    contract: ContractState,
    tasks: HashMap<TaskId, SimTask>,
    next_task: u64,
    submissions: usize,
    status_errors: u32,
}

/// In-process execution layer running the login/signing secret contract.
///
/// Each task reports status 1 for `confirm_after` queries, then 2 (or 3 if
/// the contract call failed). Outputs are sealed with the session key.
pub struct SimulatedEngine {
    session_key: SessionKey,
    confirm_after: u32,
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    pub fn new(session_key: SessionKey, confirm_after: u32) -> Self {
        Self {
            session_key,
            confirm_after,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Makes the next `count` status queries fail with a retryable error.
    pub fn inject_status_errors(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.status_errors = count;
        }
    }

    pub fn submissions(&self) -> usize {
        self.state.lock().map(|state| state.submissions).unwrap_or(0)
    }

    pub fn status_queries(&self, task_id: &TaskId) -> u32 {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.tasks.get(task_id).map(|task| task.queries))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::new("lock_error", "simulated engine state poisoned", false))
    }
}

#[async_trait]
impl EngineTransport for SimulatedEngine {
    async fn submit_task(&self, request: &TaskRequest) -> Result<SubmitOutcome, EngineError> {
        let mut state = self.lock()?;
        state.submissions += 1;
        let signature = match request.validate() {
            Ok(signature) => signature,
            Err(reason) => return Ok(SubmitOutcome::Rejected { reason }),
        };

        let outcome = execute(&mut state.contract, &signature.name, &request.args);
        state.next_task += 1;
        let task_id = TaskId::new(&format!("0x{:064x}", state.next_task));
        debug!(task_id = %task_id, function = %signature, ok = outcome.is_ok(), "simulated task executed");
        state.tasks.insert(task_id.clone(), SimTask { queries: 0, outcome });
        Ok(SubmitOutcome::Accepted { task_id })
    }

    async fn task_record_status(&self, task_id: &TaskId) -> Result<u8, EngineError> {
        let mut state = self.lock()?;
        if state.status_errors > 0 {
            state.status_errors -= 1;
            return Err(EngineError::new("network_error", "simulated outage", true));
        }
        let confirm_after = self.confirm_after;
        let task = match state.tasks.get_mut(task_id) {
            Some(task) => task,
            None => return Ok(STATUS_UNDEFINED),
        };
        task.queries += 1;
        if task.queries <= confirm_after {
            return Ok(STATUS_CREATED);
        }
        Ok(if task.outcome.is_ok() {
            STATUS_VERIFIED
        } else {
            STATUS_FAILED
        })
    }

    async fn task_result(&self, task_id: &TaskId) -> Result<ResultPayload, EngineError> {
        let state = self.lock()?;
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| EngineError::new("not_found", &format!("unknown task {}", task_id), false))?;
        if task.queries <= self.confirm_after {
            return Err(EngineError::new("not_ready", "task result not published yet", true));
        }
        match &task.outcome {
            Ok(plaintext) => {
                let encrypted_output = encrypt_output(&self.session_key, plaintext)
                    .map_err(|err| EngineError::new("engine_error", &err.to_string(), false))?;
                Ok(ResultPayload {
                    engine_status: EngineStatus::Success,
                    encrypted_output,
                })
            }
            Err(_) => Ok(ResultPayload {
                engine_status: EngineStatus::Failure,
                encrypted_output: Vec::new(),
            }),
        }
    }
}

fn execute(contract: &mut ContractState, function: &str, args: &[TaskArg]) -> Result<Vec<u8>, String> {
    match (function, args) {
        ("add_user", [TaskArg::String(user_id), TaskArg::Bytes(private_key)]) => {
            let public_key = derive_public_key(private_key).map_err(|err| err.to_string())?;
            contract.users.push(User {
                user_id: user_id.clone(),
                private_key: private_key.clone(),
                public_key,
            });
            Ok(Vec::new())
        }
        ("add_login", [TaskArg::String(user_id), TaskArg::Uint256(code)]) => {
            if !contract.users.iter().any(|u| &u.user_id == user_id) {
                return Err("user does not exist".to_string());
            }
            contract.logins.push(Login {
                user_id: user_id.clone(),
                code: *code,
                valid: true,
            });
            Ok(Vec::new())
        }
        ("sign_message", [TaskArg::Uint256(code), TaskArg::String(message)]) => {
            let login = contract
                .logins
                .iter_mut()
                .find(|l| l.code == *code)
                .ok_or_else(|| "code does not exist".to_string())?;
            if !login.valid {
                return Err("code not valid".to_string());
            }
            let user = contract
                .users
                .iter()
                .find(|u| u.user_id == login.user_id)
                .ok_or_else(|| "user does not exist".to_string())?;
            let signature = sign_message(&user.private_key, message.as_bytes()).map_err(|err| err.to_string())?;
            login.valid = false;
            Ok(OutputRecord::new(user.public_key, signature).encode())
        }
        _ => Err(format!("no handler for {}", function)),
    }
}
