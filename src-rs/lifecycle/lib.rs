pub mod poller;
pub mod retriever;
pub mod scenario;
pub mod submitter;
pub mod verifier;

pub use poller::{Backoff, CancelToken, PollOutcome, RetryPolicy, StatusObserver, StatusSnapshot, TaskStatusPoller};
pub use retriever::{AesGcmDecryptor, ResultDecryptor, ResultRetriever};
pub use scenario::{EnableScenario, ScenarioRunner, ScenarioStep, StepObserver};
pub use submitter::TaskSubmitter;
pub use verifier::{OutputRecord, ResultVerifier, VerifiedSignature};
