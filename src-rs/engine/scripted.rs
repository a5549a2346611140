use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::{EngineError, EngineTransport, ResultPayload, SubmitOutcome};
use crate::task::{TaskId, TaskRequest};

/// Transport that replays canned answers. Once the status script runs out
/// the last answer repeats.
pub struct ScriptedTransport {
    statuses: Mutex<VecDeque<Result<u8, EngineError>>>,
    last_status: Mutex<Option<Result<u8, EngineError>>>,
    result: Mutex<Option<Result<ResultPayload, EngineError>>>,
    pub status_calls: AtomicU32,
    pub result_calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            result: Mutex::new(None),
            status_calls: AtomicU32::new(0),
            result_calls: AtomicU32::new(0),
        }
    }

    pub fn with_statuses(self, codes: &[u8]) -> Self {
        self.statuses.lock().unwrap().extend(codes.iter().map(|c| Ok(*c)));
        self
    }

    pub fn with_status_error(self, err: EngineError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn with_result(self, result: Result<ResultPayload, EngineError>) -> Self {
        *self.result.lock().unwrap() = Some(result);
        self
    }
}

#[async_trait]
impl EngineTransport for ScriptedTransport {
    async fn submit_task(&self, _request: &TaskRequest) -> Result<SubmitOutcome, EngineError> {
        Err(EngineError::new("unscripted", "submission is not scripted", false))
    }

    async fn task_record_status(&self, _task_id: &TaskId) -> Result<u8, EngineError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last_status.lock().unwrap();
        match next {
            Some(answer) => {
                *last = Some(answer.clone());
                answer
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(EngineError::new("unscripted", "no status answer", false))),
        }
    }

    async fn task_result(&self, _task_id: &TaskId) -> Result<ResultPayload, EngineError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(EngineError::new("unscripted", "no result answer", false)))
    }
}
