use std::io::{self, Write};
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::TaskError;
use crate::lifecycle::{StatusObserver, StatusSnapshot, StepObserver, VerifiedSignature};
use crate::result::ScenarioReport;
use crate::task::{TaskHandle, TaskRecord};

pub fn banner(cfg: &ClientConfig, simulated: bool) {
    println!("Secret task client");
    if simulated {
        println!("Engine: simulated");
    } else {
        println!("Gateway: {}", cfg.gateway_url);
    }
    println!("SGX mode: {}  Gas price: {}", cfg.sgx_mode.as_str(), cfg.gas_price);
    if !cfg.contract_address.is_empty() {
        println!("Contract: {}", cfg.contract_address);
    }
}

/// Overwrites the current line while a task is still pending.
pub fn progress(snapshot: &StatusSnapshot) {
    print!("{}\r", progress_line(snapshot.code));
    let _ = io::stdout().flush();
}

fn progress_line(code: u8) -> String {
    format!("Waiting. Current Task Status is {}", code)
}

pub fn completed(handle: &TaskHandle) {
    println!("{}", completed_line(handle));
}

/// Same width as the progress line, so it fully replaces it.
fn completed_line(handle: &TaskHandle) -> String {
    let code = handle.last_code().map(|c| c.to_string()).unwrap_or_default();
    format!("Completed. Final Task Status is {}", code)
}

/// Console hooks for a scenario run. With JSON output stdout carries the
/// report alone, so there are none.
pub fn run_observers(json: bool) -> (Option<StatusObserver>, Option<StepObserver>) {
    if json {
        return (None, None);
    }
    let on_status: StatusObserver = Arc::new(progress);
    let on_step: StepObserver = Arc::new(|_step: &str, handle: &TaskHandle| completed(handle));
    (Some(on_status), Some(on_step))
}

pub fn report_json(report: &ScenarioReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

pub fn status(handle: &TaskHandle) {
    let code = handle.last_code().map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
    println!("task {}: {} (code {})", handle.id(), handle.status(), code);
}

pub fn verified(sig: &VerifiedSignature) {
    println!("Public key: 0x{}", sig.public_key_hex());
    println!("Signature: {}", sig.signature_hex());
    println!("Signature verified");
}

pub fn report(report: &ScenarioReport) {
    for step in &report.steps {
        println!(
            "[{}] {} {} after {} observation(s)",
            step.status, step.step, step.task_id, step.observations
        );
        if let Some(public_key) = &step.public_key {
            println!("  public key: 0x{}", public_key);
        }
        if let Some(signature) = &step.signature {
            println!("  signature: {}", signature);
        }
    }
}

pub fn tasks(records: &[TaskRecord]) {
    if records.is_empty() {
        println!("no tasks");
        return;
    }
    for record in records {
        let code = record.code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] {} {} ({}) code {}",
            record.status, record.created_at.to_rfc3339(), record.id, record.step, code
        );
        if let Some(err) = &record.error {
            println!("  error: {}", err);
        }
    }
}

pub fn error(err: &TaskError) {
    eprintln!();
    match err {
        TaskError::StepFailed {
            step,
            last_status,
            source,
        } => {
            eprintln!("error [{}] in step {} (last status {}): {}", err.kind(), step, last_status, source);
        }
        _ => eprintln!("error [{}]: {}", err.kind(), err),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::result::StepReport;
    use crate::task::{TaskId, TaskStatus};

    fn sample_report() -> ScenarioReport {
        ScenarioReport {
            steps: vec![StepReport {
                step: "sign_message".to_string(),
                task_id: "0x03".to_string(),
                function: "sign_message(uint256,string)".to_string(),
                status: TaskStatus::Confirmed,
                observations: 3,
                public_key: Some("ab".repeat(64)),
                signature: Some(format!("0x{}", "cd".repeat(65))),
            }],
        }
    }

    #[test]
    fn json_run_has_no_console_hooks() {
        let (on_status, on_step) = run_observers(true);
        assert!(on_status.is_none());
        assert!(on_step.is_none());

        let (on_status, on_step) = run_observers(false);
        assert!(on_status.is_some() && on_step.is_some());
    }

    #[test]
    fn json_report_is_the_whole_document() {
        let out = report_json(&sample_report()).unwrap();
        assert!(out.starts_with('{'));
        assert!(out.ends_with('}'));
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["steps"][0]["step"], "sign_message");
        assert_eq!(parsed["steps"][0]["observations"], 3);
    }

    #[test]
    fn completed_line_covers_progress_line() {
        let mut handle = TaskHandle::pending(TaskId::new("0x01"), "add_user(string,bytes)");
        handle.observe(1).unwrap();
        handle.observe(2).unwrap();
        let line = completed_line(&handle);
        assert_eq!(line, "Completed. Final Task Status is 2");
        assert!(line.len() >= progress_line(1).len());
    }
}
