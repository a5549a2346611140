use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::EngineTransport;
use crate::error::TaskError;
use crate::task::{TaskHandle, TaskId, TaskStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    Fixed,
    Exponential { factor: f64, max: Duration },
}

/// How long and how often to wait for confirmation. The default keeps
/// polling every second with no cap.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
    pub max_attempts: Option<u32>,
    pub deadline: Option<Duration>,
    pub max_consecutive_errors: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL)
    }
}

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff: Backoff::Fixed,
            max_attempts: None,
            deadline: None,
            max_consecutive_errors: 0,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_error_tolerance(mut self, max_consecutive_errors: u32) -> Self {
        self.max_consecutive_errors = max_consecutive_errors;
        self
    }

    /// Delay after the `attempt`-th query (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { factor, max } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.interval.as_secs_f64() * factor.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// How a wait ended, short of an error.
#[derive(Debug)]
pub enum PollOutcome {
    Confirmed(TaskHandle),
    Failed {
        handle: TaskHandle,
        code: u8,
    },
    TimedOut {
        handle: TaskHandle,
        attempts: u32,
        elapsed: Duration,
    },
}

impl PollOutcome {
    pub fn handle(&self) -> &TaskHandle {
        match self {
            PollOutcome::Confirmed(handle) => handle,
            PollOutcome::Failed { handle, .. } => handle,
            PollOutcome::TimedOut { handle, .. } => handle,
        }
    }

    pub fn into_confirmed(self) -> Result<TaskHandle, TaskError> {
        match self {
            PollOutcome::Confirmed(handle) => Ok(handle),
            PollOutcome::Failed { handle, code } => Err(TaskError::TaskFailed {
                task_id: handle.id().to_string(),
                code,
            }),
            PollOutcome::TimedOut { handle, attempts, .. } => Err(TaskError::Timeout {
                task_id: handle.id().to_string(),
                attempts,
                last_status: handle.status(),
            }),
        }
    }
}

/// One progress observation while waiting.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub code: u8,
    pub attempt: u32,
    pub elapsed: Duration,
}

pub type StatusObserver = Arc<dyn Fn(&StatusSnapshot) + Send + Sync>;

/// Cloneable flag that stops a wait in progress.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskStatusPoller {
    transport: Arc<dyn EngineTransport>,
    policy: RetryPolicy,
    observer: Option<StatusObserver>,
    cancel: Option<CancelToken>,
}

impl TaskStatusPoller {
    pub fn new(transport: Arc<dyn EngineTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            observer: None,
            cancel: None,
        }
    }

    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Single status query applied to the handle.
    pub async fn refresh(&self, handle: &mut TaskHandle) -> Result<TaskStatus, TaskError> {
        let code = self
            .transport
            .task_record_status(handle.id())
            .await
            .map_err(|source| TaskError::Polling { attempts: 1, source })?;
        handle.observe(code)
    }

    /// Polls until the task is confirmed or failed on chain, or the policy
    /// gives up. Confirmation is only ever reported from a fresh query.
    pub async fn wait_for_confirmation(&self, mut handle: TaskHandle) -> Result<PollOutcome, TaskError> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut consecutive_errors = 0u32;

        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(cancelled(&handle));
            }
            attempts += 1;

            match self.transport.task_record_status(handle.id()).await {
                Ok(code) => {
                    consecutive_errors = 0;
                    let status = handle.observe(code)?;
                    match status {
                        TaskStatus::Confirmed => {
                            info!(task_id = %handle.id(), attempts, "task confirmed");
                            return Ok(PollOutcome::Confirmed(handle));
                        }
                        TaskStatus::Failed => {
                            warn!(task_id = %handle.id(), code, attempts, "task failed on chain");
                            return Ok(PollOutcome::Failed { handle, code });
                        }
                        _ => {
                            let snapshot = StatusSnapshot {
                                task_id: handle.id().clone(),
                                status,
                                code,
                                attempt: attempts,
                                elapsed: started.elapsed(),
                            };
                            debug!(task_id = %snapshot.task_id, code, attempt = attempts, "waiting for confirmation");
                            if let Some(observer) = &self.observer {
                                observer(&snapshot);
                            }
                        }
                    }
                }
                Err(source) => {
                    consecutive_errors += 1;
                    if !source.retryable || consecutive_errors > self.policy.max_consecutive_errors {
                        return Err(TaskError::Polling { attempts, source });
                    }
                    warn!(task_id = %handle.id(), error = %source, consecutive_errors, "status query failed, retrying");
                }
            }

            if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                return Ok(timed_out(handle, attempts, started));
            }
            let delay = self.policy.delay_for(attempts);
            if self
                .policy
                .deadline
                .is_some_and(|deadline| started.elapsed() + delay > deadline)
            {
                return Ok(timed_out(handle, attempts, started));
            }
            self.pause(delay, &handle).await?;
        }
    }

    async fn pause(&self, delay: Duration, handle: &TaskHandle) -> Result<(), TaskError> {
        match &self.cancel {
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(token) => tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(()),
                _ = token.cancelled() => Err(cancelled(handle)),
            },
        }
    }
}

fn cancelled(handle: &TaskHandle) -> TaskError {
    TaskError::Cancelled {
        task_id: handle.id().to_string(),
        last_status: handle.status(),
    }
}

fn timed_out(handle: TaskHandle, attempts: u32, started: Instant) -> PollOutcome {
    let elapsed = started.elapsed();
    warn!(task_id = %handle.id(), attempts, elapsed_ms = elapsed.as_millis() as u64, "gave up waiting for confirmation");
    PollOutcome::TimedOut {
        handle,
        attempts,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    use super::*;
    use crate::crypto::SessionKey;
    use crate::engine::scripted::ScriptedTransport;
    use crate::engine::{EngineError, SimulatedEngine};
    use crate::lifecycle::TaskSubmitter;
    use crate::task::{TaskArg, TaskRequest};

    async fn submitted(engine: &Arc<SimulatedEngine>) -> TaskHandle {
        let request = TaskRequest::new(
            "add_user(string,bytes)",
            vec![TaskArg::String("1".into()), TaskArg::Bytes(vec![9u8; 32])],
        )
        .with_gas(500_000, 100_000_000)
        .from_account("0xsender", "0xcontract");
        TaskSubmitter::new(engine.clone()).submit(request).await.unwrap()
    }

    fn scripted_handle() -> TaskHandle {
        TaskHandle::pending(TaskId::new("0x01"), "f()")
    }

    #[tokio::test(start_paused = true)]
    async fn waits_one_interval_per_pending_observation() {
        let engine = Arc::new(SimulatedEngine::new(SessionKey::generate(), 3));
        let handle = submitted(&engine).await;
        let id = handle.id().clone();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let poller = TaskStatusPoller::new(engine.clone(), RetryPolicy::default()).with_observer(Arc::new(
            move |snap: &StatusSnapshot| sink.lock().unwrap().push((snap.attempt, snap.status)),
        ));

        let started = Instant::now();
        let outcome = poller.wait_for_confirmation(handle).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Confirmed(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(engine.status_queries(&id), 4);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, TaskStatus::Pending), (2, TaskStatus::Pending), (3, TaskStatus::Pending)]
        );
        assert!(outcome.handle().is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn already_confirmed_on_first_query() {
        let engine = Arc::new(SimulatedEngine::new(SessionKey::generate(), 0));
        let handle = submitted(&engine).await;
        let id = handle.id().clone();
        let poller = TaskStatusPoller::new(engine.clone(), RetryPolicy::default());
        let confirmed = poller.wait_for_confirmation(handle).await.unwrap().into_confirmed().unwrap();
        assert_eq!(confirmed.observations(), 1);
        assert_eq!(engine.status_queries(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reserved_codes_keep_waiting() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[0, 7, 1, 2]));
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default());
        let handle = poller
            .wait_for_confirmation(scripted_handle())
            .await
            .unwrap()
            .into_confirmed()
            .unwrap();
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 4);
        assert_eq!(handle.last_code(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_status_ends_the_wait() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[1, 3]));
        let poller = TaskStatusPoller::new(transport, RetryPolicy::default());
        let outcome = poller.wait_for_confirmation(scripted_handle()).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Failed { code: 3, .. }));
        assert!(matches!(
            outcome.into_confirmed(),
            Err(TaskError::TaskFailed { code: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_cap_times_out() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[1]));
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default().with_max_attempts(5));
        let outcome = poller.wait_for_confirmation(scripted_handle()).await.unwrap();
        match &outcome {
            PollOutcome::TimedOut { attempts, elapsed, .. } => {
                assert_eq!(*attempts, 5);
                assert_eq!(*elapsed, Duration::from_secs(4));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            outcome.into_confirmed(),
            Err(TaskError::Timeout {
                attempts: 5,
                last_status: TaskStatus::Pending,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_times_out_without_oversleeping() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[1]));
        let poller = TaskStatusPoller::new(
            transport.clone(),
            RetryPolicy::fixed(Duration::from_millis(1000)).with_deadline(Duration::from_millis(2500)),
        );
        let started = Instant::now();
        let outcome = poller.wait_for_confirmation(scripted_handle()).await.unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 3, .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn query_errors_surface_unless_tolerated() {
        let engine = Arc::new(SimulatedEngine::new(SessionKey::generate(), 1));
        let handle = submitted(&engine).await;
        engine.inject_status_errors(1);
        let strict = TaskStatusPoller::new(engine.clone(), RetryPolicy::default());
        assert!(matches!(
            strict.wait_for_confirmation(handle.clone()).await,
            Err(TaskError::Polling { attempts: 1, .. })
        ));

        engine.inject_status_errors(2);
        let tolerant = TaskStatusPoller::new(engine.clone(), RetryPolicy::default().with_error_tolerance(2));
        let outcome = tolerant.wait_for_confirmation(handle).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Confirmed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_never_retried() {
        let transport = Arc::new(
            ScriptedTransport::new().with_status_error(EngineError::new("rpc_error", "bad task id", false)),
        );
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default().with_error_tolerance(5));
        assert!(matches!(
            poller.wait_for_confirmation(scripted_handle()).await,
            Err(TaskError::Polling { .. })
        ));
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_the_wait() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[1]));
        let token = CancelToken::new();
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default()).with_cancel(token.clone());

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let err = poller.wait_for_confirmation(scripted_handle()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Cancelled {
                last_status: TaskStatus::Pending,
                ..
            }
        ));
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_querying() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[2]));
        let token = CancelToken::new();
        token.cancel();
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default()).with_cancel(token);
        assert!(poller.wait_for_confirmation(scripted_handle()).await.is_err());
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_is_one_fresh_query() {
        let transport = Arc::new(ScriptedTransport::new().with_statuses(&[1, 2]));
        let poller = TaskStatusPoller::new(transport.clone(), RetryPolicy::default());
        let mut handle = TaskHandle::track(TaskId::new("0x05"));
        assert_eq!(poller.refresh(&mut handle).await.unwrap(), TaskStatus::Pending);
        assert_eq!(poller.refresh(&mut handle).await.unwrap(), TaskStatus::Confirmed);
        assert_eq!(transport.status_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::fixed(Duration::from_millis(500)).with_backoff(Backoff::Exponential {
            factor: 2.0,
            max: Duration::from_secs(3),
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(3));
        assert_eq!(RetryPolicy::default().delay_for(9), DEFAULT_POLL_INTERVAL);
    }
}
