use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::TaskError;

/// Lifecycle status of a task record on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Unknown,
    Pending,
    Confirmed,
    Failed,
}

impl TaskStatus {
    /// Maps a raw registry status code. Only `2` ever means confirmed.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TaskStatus::Pending,
            2 => TaskStatus::Confirmed,
            3..=5 => TaskStatus::Failed,
            _ => TaskStatus::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Confirmed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Unknown => "unknown",
            TaskStatus::Pending => "pending",
            TaskStatus::Confirmed => "confirmed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Worker-reported outcome, independent of on-chain confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE", alias = "FAILED")]
    Failure,
}

impl EngineStatus {
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("success") {
            EngineStatus::Success
        } else {
            EngineStatus::Failure
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            EngineStatus::Success => "SUCCESS",
            EngineStatus::Failure => "FAILURE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    String,
    Bytes,
    Uint256,
    Address,
    Bool,
}

impl ArgType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "string" => Some(ArgType::String),
            "bytes" => Some(ArgType::Bytes),
            "uint256" | "uint" => Some(ArgType::Uint256),
            "address" => Some(ArgType::Address),
            "bool" => Some(ArgType::Bool),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Bytes => "bytes",
            ArgType::Uint256 => "uint256",
            ArgType::Address => "address",
            ArgType::Bool => "bool",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskArg {
    String(String),
    Bytes(Vec<u8>),
    Uint256(u128),
    Address(String),
    Bool(bool),
}

impl TaskArg {
    pub fn arg_type(&self) -> ArgType {
        match self {
            TaskArg::String(_) => ArgType::String,
            TaskArg::Bytes(_) => ArgType::Bytes,
            TaskArg::Uint256(_) => ArgType::Uint256,
            TaskArg::Address(_) => ArgType::Address,
            TaskArg::Bool(_) => ArgType::Bool,
        }
    }

    /// `[value, typeTag]` pair as the gateway expects it.
    pub fn to_wire(&self) -> Value {
        let value = match self {
            TaskArg::String(s) | TaskArg::Address(s) => Value::String(s.clone()),
            TaskArg::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
            TaskArg::Uint256(n) => u64::try_from(*n)
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(n.to_string())),
            TaskArg::Bool(b) => Value::Bool(*b),
        };
        json!([value, self.arg_type().tag()])
    }
}

/// Parsed `name(type,type,...)` function signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<ArgType>,
}

impl FunctionSignature {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let open = raw
            .find('(')
            .ok_or_else(|| format!("missing '(' in function signature: {}", raw))?;
        if !raw.ends_with(')') {
            return Err(format!("missing ')' in function signature: {}", raw));
        }
        let name = &raw[..open];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid function name: {:?}", name));
        }
        let inner = &raw[open + 1..raw.len() - 1];
        let mut params = Vec::new();
        if !inner.trim().is_empty() {
            for tag in inner.split(',') {
                let ty = ArgType::from_tag(tag)
                    .ok_or_else(|| format!("unsupported parameter type: {:?}", tag.trim()))?;
                params.push(ty);
            }
        }
        Ok(Self {
            name: name.to_string(),
            params,
        })
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.params.iter().map(|p| p.tag()).collect();
        write!(f, "{}({})", self.name, tags.join(","))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRequest {
    pub function_signature: String,
    pub args: Vec<TaskArg>,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub sender: String,
    pub target_contract: String,
}

impl TaskRequest {
    pub fn new(function_signature: &str, args: Vec<TaskArg>) -> Self {
        Self {
            function_signature: function_signature.to_string(),
            args,
            gas_limit: 0,
            gas_price: 0,
            sender: String::new(),
            target_contract: String::new(),
        }
    }

    pub fn with_gas(mut self, gas_limit: u64, gas_price: u64) -> Self {
        self.gas_limit = gas_limit;
        self.gas_price = gas_price;
        self
    }

    pub fn from_account(mut self, sender: &str, target_contract: &str) -> Self {
        self.sender = sender.to_string();
        self.target_contract = target_contract.to_string();
        self
    }

    /// Checks the request against its own signature before anything leaves
    /// the process.
    pub fn validate(&self) -> Result<FunctionSignature, String> {
        let signature = FunctionSignature::parse(&self.function_signature)?;
        if signature.params.len() != self.args.len() {
            return Err(format!(
                "{} expects {} argument(s), got {}",
                signature,
                signature.params.len(),
                self.args.len()
            ));
        }
        for (idx, (expected, arg)) in signature.params.iter().zip(&self.args).enumerate() {
            if *expected != arg.arg_type() {
                return Err(format!(
                    "argument {} of {} must be {}, got {}",
                    idx,
                    signature,
                    expected.tag(),
                    arg.arg_type().tag()
                ));
            }
        }
        if self.gas_limit == 0 {
            return Err("gas limit must be non-zero".to_string());
        }
        if self.sender.trim().is_empty() {
            return Err("sender address is empty".to_string());
        }
        if self.target_contract.trim().is_empty() {
            return Err("target contract address is empty".to_string());
        }
        Ok(signature)
    }

    pub fn wire_args(&self) -> Vec<Value> {
        self.args.iter().map(TaskArg::to_wire).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracking object for one submitted task.
///
/// Status only moves forward: once confirmed or failed the handle rejects
/// any other observation.
#[derive(Clone, Debug, Serialize)]
pub struct TaskHandle {
    id: TaskId,
    function: String,
    status: TaskStatus,
    last_code: Option<u8>,
    observations: u32,
    submitted_at: DateTime<Utc>,
    last_observed_at: Option<DateTime<Utc>>,
}

impl TaskHandle {
    /// Handle for a task the execution layer just accepted.
    pub fn pending(id: TaskId, function: &str) -> Self {
        Self {
            id,
            function: function.to_string(),
            status: TaskStatus::Pending,
            last_code: None,
            observations: 0,
            submitted_at: Utc::now(),
            last_observed_at: None,
        }
    }

    /// Handle for a task submitted elsewhere, known only by id.
    pub fn track(id: TaskId) -> Self {
        Self {
            id,
            function: String::new(),
            status: TaskStatus::Unknown,
            last_code: None,
            observations: 0,
            submitted_at: Utc::now(),
            last_observed_at: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn last_code(&self) -> Option<u8> {
        self.last_code
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.last_observed_at
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == TaskStatus::Confirmed
    }

    /// Applies a freshly queried status code. A rejected observation leaves
    /// the handle untouched.
    pub fn observe(&mut self, code: u8) -> Result<TaskStatus, TaskError> {
        let next = match (self.status, TaskStatus::from_code(code)) {
            (current, next) if current.is_terminal() && current != next => {
                return Err(TaskError::StatusRegression {
                    task_id: self.id.to_string(),
                    from: current,
                    to: next,
                });
            }
            // record not visible yet on the node we asked
            (TaskStatus::Pending, TaskStatus::Unknown) => TaskStatus::Pending,
            (_, next) => next,
        };

        self.status = next;
        self.observations += 1;
        self.last_code = Some(code);
        self.last_observed_at = Some(Utc::now());
        Ok(next)
    }
}

/// Output of a confirmed task. The decrypted payload is attached once by the
/// retriever and only read afterwards.
#[derive(Clone, Debug)]
pub struct TaskResult {
    task_id: TaskId,
    engine_status: EngineStatus,
    encrypted_output: Vec<u8>,
    decrypted_output: Option<Vec<u8>>,
}

impl TaskResult {
    pub fn encrypted(task_id: TaskId, engine_status: EngineStatus, encrypted_output: Vec<u8>) -> Self {
        Self {
            task_id,
            engine_status,
            encrypted_output,
            decrypted_output: None,
        }
    }

    pub(crate) fn with_decrypted(mut self, plaintext: Vec<u8>) -> Self {
        self.decrypted_output = Some(plaintext);
        self
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn engine_status(&self) -> EngineStatus {
        self.engine_status
    }

    pub fn encrypted_output(&self) -> &[u8] {
        &self.encrypted_output
    }

    pub fn decrypted_output(&self) -> Option<&[u8]> {
        self.decrypted_output.as_deref()
    }
}
