use std::sync::{Arc, Mutex};

use secret_task_rs::config::ClientConfig;
use secret_task_rs::crypto::{derive_public_key, SessionKey};
use secret_task_rs::helpers::{build_engine, build_runner, EngineMode};
use secret_task_rs::lifecycle::{StatusObserver, StatusSnapshot};
use secret_task_rs::{EnableScenario, TaskError, TaskStatus};

fn simulated_config() -> ClientConfig {
    ClientConfig {
        session_key: Some(SessionKey::generate()),
        ..ClientConfig::default()
    }
    .for_simulation()
}

#[tokio::test(start_paused = true)]
async fn login_and_sign_recovers_the_user_key() {
    let cfg = simulated_config();
    let stack = build_engine(&cfg, EngineMode::Simulated { confirm_after: 2 }).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let observer: StatusObserver = Arc::new(move |snap: &StatusSnapshot| sink.lock().unwrap().push(snap.code));
    let runner = build_runner(&cfg, &stack, Some(observer), None);

    let scenario = EnableScenario::default();
    let report = runner.run(scenario.steps(&cfg)).await.unwrap();

    let names: Vec<&str> = report.steps.iter().map(|s| s.step.as_str()).collect();
    assert_eq!(names, vec!["add_user", "add_login", "sign_message"]);
    assert!(report.steps.iter().all(|s| s.status == TaskStatus::Confirmed && s.observations == 3));
    // two pending observations per task before confirmation
    assert_eq!(*seen.lock().unwrap(), vec![1; 6]);

    let signed = &report.steps[2];
    let expected = hex::encode(derive_public_key(&scenario.private_key).unwrap());
    assert_eq!(signed.public_key.as_deref(), Some(expected.as_str()));
    let signature = signed.signature.as_deref().unwrap();
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 65 * 2);
}

#[tokio::test(start_paused = true)]
async fn second_run_on_same_engine_cannot_reuse_the_login_code() {
    let cfg = simulated_config();
    let stack = build_engine(&cfg, EngineMode::Simulated { confirm_after: 0 }).unwrap();
    let runner = build_runner(&cfg, &stack, None, None);
    let scenario = EnableScenario::default();

    runner.run(scenario.steps(&cfg)).await.unwrap();

    let sign_only: Vec<_> = scenario
        .steps(&cfg)
        .into_iter()
        .filter(|s| s.name == "sign_message")
        .map(|mut s| {
            s.requires = None;
            s
        })
        .collect();
    match runner.run(sign_only).await.unwrap_err() {
        TaskError::StepFailed {
            step,
            last_status,
            source,
        } => {
            assert_eq!(step, "sign_message");
            assert_eq!(last_status, TaskStatus::Failed);
            assert_eq!(source.kind(), "task_failed");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn attempt_cap_surfaces_as_timeout() {
    let mut cfg = simulated_config();
    cfg.poll.max_attempts = Some(2);
    let stack = build_engine(&cfg, EngineMode::Simulated { confirm_after: 5 }).unwrap();
    let runner = build_runner(&cfg, &stack, None, None);

    let err = runner.run(EnableScenario::default().steps(&cfg)).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(matches!(
        err,
        TaskError::StepFailed {
            last_status: TaskStatus::Pending,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn ledger_persists_every_step() {
    let path = std::env::temp_dir().join(format!("secret-task-it-ledger-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let mut cfg = simulated_config();
    cfg.ledger_path = Some(path.clone());
    let stack = build_engine(&cfg, EngineMode::Simulated { confirm_after: 1 }).unwrap();

    build_runner(&cfg, &stack, None, None)
        .run(EnableScenario::default().steps(&cfg))
        .await
        .unwrap();

    let records = secret_task_rs::task::TaskLedger::load_from_disk(path.clone()).unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.status == TaskStatus::Confirmed && r.code == Some(2)));
    assert!(records.iter().all(|r| r.completed_at.is_some()));
    let _ = std::fs::remove_file(path);
}
