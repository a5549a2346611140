use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub task_id: String,
    pub function: String,
    pub status: TaskStatus,
    pub observations: u32,
    pub public_key: Option<String>,
    pub signature: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub steps: Vec<StepReport>,
}

impl ScenarioReport {
    /// Steps whose output signature was checked.
    pub fn verified_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.public_key.is_some())
    }
}
