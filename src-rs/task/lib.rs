pub mod store;
pub mod types;

pub use store::{TaskLedger, TaskRecord};
pub use types::{
    ArgType, EngineStatus, FunctionSignature, TaskArg, TaskHandle, TaskId, TaskRequest, TaskResult, TaskStatus,
};
