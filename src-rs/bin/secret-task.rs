use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use secret_task_rs::helpers::{
    build_engine, build_gateway, build_poller, build_runner, load_config_from_env, require_accounts, EngineMode,
};
use secret_task_rs::lifecycle::{CancelToken, OutputRecord, StatusObserver};
use secret_task_rs::task::TaskLedger;
use secret_task_rs::{render, EnableScenario, ResultVerifier, TaskError, TaskHandle, TaskId};

#[derive(Parser, Debug)]
#[command(name = "secret-task", about = "Submit and follow secret compute tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the add_user → add_login → sign_message workflow.
    Run {
        /// Use the in-process engine instead of the gateway.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        simulate: bool,

        /// Pending observations the simulated engine reports per task.
        #[arg(long, default_value_t = 3)]
        confirm_after: u32,

        /// Print the report as JSON.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
    },
    /// Query a task's status once.
    Status { task_id: String },
    /// Poll a task until it is confirmed or fails.
    Watch { task_id: String },
    /// Check a decrypted signing output offline.
    Verify {
        #[arg(long)]
        output: String,

        #[arg(long)]
        message: String,
    },
    /// List tasks recorded in the ledger.
    Tasks {
        #[arg(long, env = "ENIGMA_TASK_LEDGER")]
        ledger: PathBuf,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<TaskError>() {
                Some(task_err) => render::error(task_err),
                None => eprintln!("error: {:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Run {
            simulate,
            confirm_after,
            json,
        } => run(simulate, confirm_after, json).await,
        Command::Status { task_id } => status(&task_id).await,
        Command::Watch { task_id } => watch(&task_id).await,
        Command::Verify { output, message } => verify(&output, &message),
        Command::Tasks { ledger, limit } => {
            if !ledger.exists() {
                return Err(anyhow!("no ledger at {}", ledger.display()));
            }
            render::tasks(&TaskLedger::open(ledger).list(limit));
            Ok(())
        }
    }
}

async fn run(simulate: bool, confirm_after: u32, json: bool) -> Result<()> {
    let mut cfg = load_config_from_env()?;
    let mode = if simulate {
        cfg = cfg.for_simulation();
        EngineMode::Simulated { confirm_after }
    } else {
        require_accounts(&cfg)?;
        EngineMode::Gateway
    };
    let stack = build_engine(&cfg, mode)?;
    if !json {
        render::banner(&cfg, simulate);
    }

    let (on_status, on_step) = render::run_observers(json);
    let mut runner = build_runner(&cfg, &stack, on_status, Some(cancel_on_ctrl_c()));
    if let Some(on_step) = on_step {
        runner = runner.with_step_observer(on_step);
    }
    let report = runner.run(EnableScenario::default().steps(&cfg)).await?;

    if json {
        println!("{}", render::report_json(&report)?);
    } else {
        render::report(&report);
    }
    Ok(())
}

async fn status(task_id: &str) -> Result<()> {
    let cfg = load_config_from_env()?;
    let poller = build_poller(&cfg, build_gateway(&cfg)?, None, None);
    let mut handle = TaskHandle::track(TaskId::new(task_id));
    poller.refresh(&mut handle).await?;
    render::status(&handle);
    Ok(())
}

async fn watch(task_id: &str) -> Result<()> {
    let cfg = load_config_from_env()?;
    let observer: StatusObserver = Arc::new(render::progress);
    let poller = build_poller(&cfg, build_gateway(&cfg)?, Some(observer), Some(cancel_on_ctrl_c()));
    let outcome = poller.wait_for_confirmation(TaskHandle::track(TaskId::new(task_id))).await?;
    let handle = outcome.into_confirmed()?;
    render::completed(&handle);
    Ok(())
}

fn verify(output: &str, message: &str) -> Result<()> {
    let record = OutputRecord::parse_hex(output)?;
    let verified = ResultVerifier::verify_record(&record, message.as_bytes())?;
    render::verified(&verified);
    Ok(())
}

fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupted, stopping the wait");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "cannot listen for ctrl-c"),
        }
    });
    token
}
