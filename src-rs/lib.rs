pub mod config;
pub mod crypto;
pub mod error;
pub mod helpers;
pub mod render;
pub mod result;

#[path = "engine/lib.rs"]
pub mod engine;
#[path = "task/lib.rs"]
pub mod task;
#[path = "lifecycle/lib.rs"]
pub mod lifecycle;

pub use config::{ClientConfig, PollConfig, SgxMode};
pub use error::TaskError;
pub use lifecycle::{
    EnableScenario, ResultRetriever, ResultVerifier, ScenarioRunner, ScenarioStep, TaskStatusPoller, TaskSubmitter,
};
pub use result::{ScenarioReport, StepReport};
pub use task::{TaskHandle, TaskId, TaskRequest, TaskStatus};
