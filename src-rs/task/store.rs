use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::types::{TaskHandle, TaskStatus};

/// Ledger entry for one task the runner has touched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub step: String,
    pub function: String,
    pub status: TaskStatus,
    pub code: Option<u8>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct TaskLedger {
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskLedger {
    /// In-memory ledger; `path` turns on JSON persistence after every write.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Persistent ledger that starts from whatever `path` already holds.
    pub fn open(path: PathBuf) -> Self {
        let records = Self::load_from_disk(path.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            path: Some(path),
            records: RwLock::new(records),
        }
    }

    pub fn record_submitted(&self, step: &str, handle: &TaskHandle) -> TaskRecord {
        let record = TaskRecord {
            id: handle.id().to_string(),
            step: step.to_string(),
            function: handle.function().to_string(),
            status: handle.status(),
            code: handle.last_code(),
            error: None,
            created_at: handle.submitted_at(),
            completed_at: None,
        };
        if let Ok(mut map) = self.records.write() {
            map.insert(record.id.clone(), record.clone());
        }
        self.save_if_needed();
        record
    }

    pub fn record_status(&self, handle: &TaskHandle) -> Option<TaskRecord> {
        let mut updated = None;
        if let Ok(mut map) = self.records.write() {
            if let Some(record) = map.get_mut(handle.id().as_str()) {
                record.status = handle.status();
                record.code = handle.last_code();
                if record.status.is_terminal() && record.completed_at.is_none() {
                    record.completed_at = Some(handle.last_observed_at().unwrap_or_else(Utc::now));
                }
                updated = Some(record.clone());
            }
        }
        self.save_if_needed();
        updated
    }

    pub fn record_error(&self, id: &str, error: &str) -> Option<TaskRecord> {
        let mut updated = None;
        if let Ok(mut map) = self.records.write() {
            if let Some(record) = map.get_mut(id) {
                record.error = Some(error.to_string());
                if record.completed_at.is_none() {
                    record.completed_at = Some(Utc::now());
                }
                updated = Some(record.clone());
            }
        }
        self.save_if_needed();
        updated
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        let map = self.records.read().ok()?;
        map.get(id).cloned()
    }

    pub fn list(&self, limit: usize) -> Vec<TaskRecord> {
        let map = match self.records.read() {
            Ok(lock) => lock,
            Err(_) => return vec![],
        };
        let mut items: Vec<TaskRecord> = map.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        items
    }

    fn save_if_needed(&self) {
        let path = match &self.path {
            Some(path) => path,
            None => return,
        };
        let map = match self.records.read() {
            Ok(lock) => lock,
            Err(_) => return,
        };
        let mut list: Vec<&TaskRecord> = map.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        match serde_json::to_string_pretty(&list) {
            Ok(serialized) => {
                if let Err(err) = fs::write(path, serialized) {
                    warn!(path = %path.display(), error = %err, "failed to persist task ledger");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize task ledger"),
        }
    }

    pub fn load_from_disk(path: PathBuf) -> Option<Vec<TaskRecord>> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str::<Vec<TaskRecord>>(&data).ok()
    }
}
