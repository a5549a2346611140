pub mod http_adapter;
pub mod simulated;
pub mod types;

#[cfg(test)]
pub(crate) mod scripted;

pub use http_adapter::{GatewayAdapter, GatewayConfig, DEFAULT_GATEWAY_URL};
pub use simulated::SimulatedEngine;
pub use types::{EngineError, EngineTransport, ResultPayload, SubmitOutcome};
