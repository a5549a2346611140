use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::SessionKey;
use crate::engine::DEFAULT_GATEWAY_URL;
use crate::lifecycle::{Backoff, RetryPolicy};

/// 1 ENG expressed in grains.
pub const DEFAULT_GAS_PRICE: u64 = 100_000_000;

const SIMULATED_SENDER: &str = "0x1df62f291b2e969fb0849d99d9ce41e2f137006e";
const SIMULATED_CONTRACT: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SgxMode {
    Software,
    Hardware,
}

impl SgxMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "SW" => Some(SgxMode::Software),
            "HW" => Some(SgxMode::Hardware),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SgxMode::Software => "SW",
            SgxMode::Hardware => "HW",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub backoff_factor: Option<f64>,
    pub max_interval_ms: u64,
    pub max_attempts: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            backoff_factor: None,
            max_interval_ms: 30_000,
            max_attempts: None,
            deadline_secs: None,
            max_consecutive_errors: 0,
        }
    }
}

impl PollConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::fixed(Duration::from_millis(self.interval_ms))
            .with_error_tolerance(self.max_consecutive_errors);
        if let Some(factor) = self.backoff_factor.filter(|f| *f > 1.0) {
            policy = policy.with_backoff(Backoff::Exponential {
                factor,
                max: Duration::from_millis(self.max_interval_ms),
            });
        }
        if let Some(max) = self.max_attempts {
            policy = policy.with_max_attempts(max);
        }
        if let Some(secs) = self.deadline_secs {
            policy = policy.with_deadline(Duration::from_secs(secs));
        }
        policy
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub sgx_mode: SgxMode,
    pub gateway_url: String,
    pub sender: String,
    pub contract_address: String,
    pub session_key: Option<SessionKey>,
    pub gas_price: u64,
    pub request_timeout_secs: u64,
    pub poll: PollConfig,
    pub ledger_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            sgx_mode: SgxMode::Software,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            sender: String::new(),
            contract_address: String::new(),
            session_key: None,
            gas_price: DEFAULT_GAS_PRICE,
            request_timeout_secs: 30,
            poll: PollConfig::default(),
            ledger_path: None,
        }
    }
}

impl ClientConfig {
    /// Fills in placeholder accounts so requests pass validation against the
    /// in-process engine.
    pub fn for_simulation(mut self) -> Self {
        if self.sender.trim().is_empty() {
            self.sender = SIMULATED_SENDER.to_string();
        }
        if self.contract_address.trim().is_empty() {
            self.contract_address = SIMULATED_CONTRACT.to_string();
        }
        self
    }
}
