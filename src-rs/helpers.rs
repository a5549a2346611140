use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ClientConfig, SgxMode};
use crate::crypto::SessionKey;
use crate::engine::{EngineTransport, GatewayAdapter, GatewayConfig, SimulatedEngine};
use crate::error::TaskError;
use crate::lifecycle::{
    AesGcmDecryptor, CancelToken, ResultDecryptor, ResultRetriever, ScenarioRunner, StatusObserver, TaskStatusPoller,
    TaskSubmitter,
};
use crate::task::TaskLedger;

pub const DEFAULT_CONTRACT_FILE: &str = "test/enable.txt";

/// Where the client sends its tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineMode {
    Gateway,
    Simulated { confirm_after: u32 },
}

/// Transport plus the matching way to open its outputs.
#[derive(Clone)]
pub struct EngineStack {
    pub transport: Arc<dyn EngineTransport>,
    pub decryptor: Arc<dyn ResultDecryptor>,
}

pub fn load_config_from_env() -> Result<ClientConfig, TaskError> {
    load_config(|key| env::var(key).ok())
}

/// Builds the client configuration from a variable lookup. `SGX_MODE` is
/// mandatory; everything else falls back to defaults.
pub fn load_config<F>(lookup: F) -> Result<ClientConfig, TaskError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let sgx_mode = match var("SGX_MODE") {
        Some(raw) => SgxMode::parse(&raw).ok_or_else(|| {
            TaskError::Configuration(format!("SGX_MODE must be SW or HW, got '{}'", raw))
        })?,
        None => return Err(TaskError::Configuration("SGX_MODE must be set to SW or HW".to_string())),
    };

    let mut cfg = ClientConfig {
        sgx_mode,
        ..ClientConfig::default()
    };

    if let Some(url) = var("ENIGMA_GATEWAY_URL") {
        cfg.gateway_url = url;
    }
    cfg.sender = var("ENIGMA_SENDER").unwrap_or_default();
    cfg.contract_address = match var("ENIGMA_CONTRACT_ADDR") {
        Some(address) => address,
        None => match var("ENIGMA_CONTRACT_FILE") {
            Some(path) => read_contract_file(&path, true)?,
            None => read_contract_file(DEFAULT_CONTRACT_FILE, false)?,
        },
    };
    cfg.session_key = var("ENIGMA_SESSION_KEY")
        .map(|raw| SessionKey::from_hex(&raw))
        .transpose()?;

    if let Some(price) = parse_var(&var, "ENIGMA_GAS_PRICE")? {
        cfg.gas_price = price;
    }
    if let Some(secs) = parse_var(&var, "ENIGMA_REQUEST_TIMEOUT_SECS")? {
        cfg.request_timeout_secs = secs;
    }
    if let Some(ms) = parse_var(&var, "ENIGMA_POLL_INTERVAL_MS")? {
        cfg.poll.interval_ms = ms;
    }
    cfg.poll.backoff_factor = parse_var(&var, "ENIGMA_POLL_BACKOFF")?;
    if let Some(ms) = parse_var(&var, "ENIGMA_POLL_MAX_INTERVAL_MS")? {
        cfg.poll.max_interval_ms = ms;
    }
    cfg.poll.max_attempts = parse_var(&var, "ENIGMA_POLL_MAX_ATTEMPTS")?;
    cfg.poll.deadline_secs = parse_var(&var, "ENIGMA_POLL_DEADLINE_SECS")?;
    if let Some(count) = parse_var(&var, "ENIGMA_POLL_ERROR_TOLERANCE")? {
        cfg.poll.max_consecutive_errors = count;
    }
    cfg.ledger_path = var("ENIGMA_TASK_LEDGER").map(PathBuf::from);

    Ok(cfg)
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>, TaskError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| TaskError::Configuration(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(None),
    }
}

/// Reads a deployed contract address. A missing default file is not an
/// error, an explicitly named one is.
fn read_contract_file(path: &str, required: bool) -> Result<String, TaskError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound && !required => Ok(String::new()),
        Err(err) => Err(TaskError::Configuration(format!(
            "cannot read contract address from {}: {}",
            path, err
        ))),
    }
}

pub fn build_engine(cfg: &ClientConfig, mode: EngineMode) -> Result<EngineStack, TaskError> {
    match mode {
        EngineMode::Simulated { confirm_after } => {
            let key = cfg.session_key.clone().unwrap_or_else(SessionKey::generate);
            info!(confirm_after, "using simulated engine");
            Ok(EngineStack {
                transport: Arc::new(SimulatedEngine::new(key.clone(), confirm_after)),
                decryptor: Arc::new(AesGcmDecryptor::new(key)),
            })
        }
        EngineMode::Gateway => {
            let key = cfg.session_key.clone().ok_or_else(|| {
                TaskError::Configuration("ENIGMA_SESSION_KEY is required to read task outputs".to_string())
            })?;
            Ok(EngineStack {
                transport: build_gateway(cfg)?,
                decryptor: Arc::new(AesGcmDecryptor::new(key)),
            })
        }
    }
}

/// Gateway transport alone, enough for status queries.
pub fn build_gateway(cfg: &ClientConfig) -> Result<Arc<dyn EngineTransport>, TaskError> {
    let adapter = GatewayAdapter::new(GatewayConfig {
        base_url: cfg.gateway_url.clone(),
        timeout_secs: cfg.request_timeout_secs,
    })
    .map_err(|err| TaskError::Configuration(err.to_string()))?;
    info!(gateway = adapter.base_url(), sgx_mode = cfg.sgx_mode.as_str(), "using gateway");
    Ok(Arc::new(adapter))
}

/// Accounts must be known before anything is sent to a real gateway.
pub fn require_accounts(cfg: &ClientConfig) -> Result<(), TaskError> {
    if cfg.sender.trim().is_empty() {
        return Err(TaskError::Configuration("ENIGMA_SENDER is not set".to_string()));
    }
    if cfg.contract_address.trim().is_empty() {
        return Err(TaskError::Configuration(format!(
            "no contract address: set ENIGMA_CONTRACT_ADDR or deploy to {}",
            DEFAULT_CONTRACT_FILE
        )));
    }
    Ok(())
}

pub fn build_poller(
    cfg: &ClientConfig,
    transport: Arc<dyn EngineTransport>,
    observer: Option<StatusObserver>,
    cancel: Option<CancelToken>,
) -> TaskStatusPoller {
    let mut poller = TaskStatusPoller::new(transport, cfg.poll.retry_policy());
    if let Some(observer) = observer {
        poller = poller.with_observer(observer);
    }
    if let Some(token) = cancel {
        poller = poller.with_cancel(token);
    }
    poller
}

pub fn build_runner(
    cfg: &ClientConfig,
    stack: &EngineStack,
    observer: Option<StatusObserver>,
    cancel: Option<CancelToken>,
) -> ScenarioRunner {
    let runner = ScenarioRunner::new(
        TaskSubmitter::new(stack.transport.clone()),
        build_poller(cfg, stack.transport.clone(), observer, cancel),
        ResultRetriever::new(stack.transport.clone(), stack.decryptor.clone()),
    );
    match open_ledger(cfg) {
        Some(ledger) => runner.with_ledger(Arc::new(ledger)),
        None => runner,
    }
}

pub fn open_ledger(cfg: &ClientConfig) -> Option<TaskLedger> {
    let path = cfg.ledger_path.clone()?;
    if path.exists() && TaskLedger::load_from_disk(path.clone()).is_none() {
        warn!(path = %path.display(), "task ledger unreadable, starting fresh");
    }
    Some(TaskLedger::open(path))
}
