use std::collections::HashSet;
use std::sync::Arc;

use tracing::{error, info};

use super::poller::TaskStatusPoller;
use super::retriever::ResultRetriever;
use super::submitter::TaskSubmitter;
use super::verifier::ResultVerifier;
use crate::config::ClientConfig;
use crate::error::TaskError;
use crate::result::{ScenarioReport, StepReport};
use crate::task::{TaskArg, TaskHandle, TaskLedger, TaskRequest, TaskStatus};

pub const ADD_GAS_LIMIT: u64 = 500_000;
pub const SIGN_GAS_LIMIT: u64 = 50_000_000;

/// One submit → confirm (→ retrieve → verify) cycle.
#[derive(Clone, Debug)]
pub struct ScenarioStep {
    pub name: String,
    pub request: TaskRequest,
    pub requires: Option<String>,
    pub verify: Option<Vec<u8>>,
}

impl ScenarioStep {
    pub fn new(name: &str, request: TaskRequest) -> Self {
        Self {
            name: name.to_string(),
            request,
            requires: None,
            verify: None,
        }
    }

    /// Only submit once `step` has been confirmed in the same run.
    pub fn after(mut self, step: &str) -> Self {
        self.requires = Some(step.to_string());
        self
    }

    /// Retrieve the output and check it carries a valid signature over
    /// `plaintext`.
    pub fn verify_signature_of(mut self, plaintext: &[u8]) -> Self {
        self.verify = Some(plaintext.to_vec());
        self
    }
}

/// Inputs for the login-and-sign workflow.
#[derive(Clone, Debug)]
pub struct EnableScenario {
    pub user_id: String,
    pub private_key: Vec<u8>,
    pub login_code: u128,
    pub message: String,
}

impl Default for EnableScenario {
    fn default() -> Self {
        Self {
            user_id: "1".to_string(),
            private_key: vec![
                0x4f, 0x3e, 0xdf, 0x98, 0x3a, 0xc6, 0x36, 0xa6, 0x5a, 0x84, 0x2c, 0xe7, 0xc7, 0x8d, 0x9a, 0xa7,
                0x06, 0xd3, 0xb1, 0x13, 0xbc, 0xe9, 0xc4, 0x6f, 0x30, 0xd7, 0xd2, 0x17, 0x15, 0xb2, 0x3b, 0x1d,
            ],
            login_code: 12345,
            message: "Hello world!".to_string(),
        }
    }
}

impl EnableScenario {
    pub fn steps(&self, cfg: &ClientConfig) -> Vec<ScenarioStep> {
        let request = |sig: &str, args: Vec<TaskArg>, gas_limit: u64| {
            TaskRequest::new(sig, args)
                .with_gas(gas_limit, cfg.gas_price)
                .from_account(&cfg.sender, &cfg.contract_address)
        };
        vec![
            ScenarioStep::new(
                "add_user",
                request(
                    "add_user(string,bytes)",
                    vec![
                        TaskArg::String(self.user_id.clone()),
                        TaskArg::Bytes(self.private_key.clone()),
                    ],
                    ADD_GAS_LIMIT,
                ),
            ),
            ScenarioStep::new(
                "add_login",
                request(
                    "add_login(string,uint256)",
                    vec![TaskArg::String(self.user_id.clone()), TaskArg::Uint256(self.login_code)],
                    ADD_GAS_LIMIT,
                ),
            )
            .after("add_user"),
            ScenarioStep::new(
                "sign_message",
                request(
                    "sign_message(uint256,string)",
                    vec![TaskArg::Uint256(self.login_code), TaskArg::String(self.message.clone())],
                    SIGN_GAS_LIMIT,
                ),
            )
            .after("add_login")
            .verify_signature_of(self.message.as_bytes()),
        ]
    }
}

/// Called with the step name once its task is confirmed.
pub type StepObserver = Arc<dyn Fn(&str, &TaskHandle) + Send + Sync>;

pub struct ScenarioRunner {
    submitter: TaskSubmitter,
    poller: TaskStatusPoller,
    retriever: ResultRetriever,
    ledger: Option<Arc<TaskLedger>>,
    on_confirmed: Option<StepObserver>,
}

impl ScenarioRunner {
    pub fn new(submitter: TaskSubmitter, poller: TaskStatusPoller, retriever: ResultRetriever) -> Self {
        Self {
            submitter,
            poller,
            retriever,
            ledger: None,
            on_confirmed: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_step_observer(mut self, observer: StepObserver) -> Self {
        self.on_confirmed = Some(observer);
        self
    }

    /// Runs the steps in order. The first failing step aborts the run;
    /// nothing after it is submitted.
    pub async fn run(&self, steps: Vec<ScenarioStep>) -> Result<ScenarioReport, TaskError> {
        let mut confirmed: HashSet<String> = HashSet::new();
        let mut report = ScenarioReport::default();

        for step in steps {
            if let Some(required) = &step.requires {
                if !confirmed.contains(required) {
                    return Err(TaskError::StepFailed {
                        step: step.name.clone(),
                        last_status: TaskStatus::Unknown,
                        source: Box::new(TaskError::Precedence(format!(
                            "step '{}' requires '{}' to be confirmed first",
                            step.name, required
                        ))),
                    });
                }
            }

            let name = step.name.clone();
            match self.run_step(step).await {
                Ok(step_report) => {
                    confirmed.insert(name);
                    report.steps.push(step_report);
                }
                Err((last_status, source)) => {
                    error!(step = %name, last_status = %last_status, kind = source.kind(), error = %source, "step failed");
                    return Err(TaskError::StepFailed {
                        step: name,
                        last_status,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn run_step(&self, step: ScenarioStep) -> Result<StepReport, (TaskStatus, TaskError)> {
        info!(step = %step.name, function = %step.request.function_signature, "submitting task");
        let handle = self
            .submitter
            .submit(step.request)
            .await
            .map_err(|err| (TaskStatus::Unknown, err))?;
        let task_id = handle.id().to_string();
        if let Some(ledger) = &self.ledger {
            ledger.record_submitted(&step.name, &handle);
        }

        let outcome = match self.poller.wait_for_confirmation(handle).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let last_status = match &err {
                    TaskError::Cancelled { last_status, .. } => *last_status,
                    TaskError::StatusRegression { from, .. } => *from,
                    _ => TaskStatus::Pending,
                };
                return Err(self.fail(&task_id, last_status, err));
            }
        };
        if let Some(ledger) = &self.ledger {
            ledger.record_status(outcome.handle());
        }
        let last_status = outcome.handle().status();
        let handle = outcome
            .into_confirmed()
            .map_err(|err| self.fail(&task_id, last_status, err))?;
        if let Some(observer) = &self.on_confirmed {
            observer(&step.name, &handle);
        }

        let mut step_report = StepReport {
            step: step.name.clone(),
            task_id: task_id.clone(),
            function: handle.function().to_string(),
            status: handle.status(),
            observations: handle.observations(),
            public_key: None,
            signature: None,
        };

        if let Some(plaintext) = &step.verify {
            let result = self
                .retriever
                .retrieve(&handle)
                .await
                .map_err(|err| self.fail(&task_id, TaskStatus::Confirmed, err))?;
            let decrypted = result.decrypted_output().unwrap_or_default();
            let verified = ResultVerifier::verify(decrypted, plaintext)
                .map_err(|err| self.fail(&task_id, TaskStatus::Confirmed, err))?;
            step_report.public_key = Some(verified.public_key_hex());
            step_report.signature = Some(verified.signature_hex());
        }

        info!(step = %step.name, task_id = %task_id, "step complete");
        Ok(step_report)
    }

    fn fail(&self, task_id: &str, last_status: TaskStatus, err: TaskError) -> (TaskStatus, TaskError) {
        if let Some(ledger) = &self.ledger {
            ledger.record_error(task_id, &err.to_string());
        }
        (last_status, err)
    }
}
