use crate::agent::Target;
use crate::error::ConductorResult;
use async_trait::async_trait;
use std::time::Duration;

/// The single way the engine triggers agents and tools.
///
/// Implementations may block or suspend; callers always bound the call with
/// their own deadline and never assume either behavior.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke `target` with JSON parameters and return its JSON outcome.
    async fn invoke(
        &self,
        target: &Target,
        parameters: &serde_json::Value,
    ) -> ConductorResult<serde_json::Value>;
}

/// Receiver of per-agent execution outcomes (the feedback channel).
///
/// Fire-and-forget from the caller's point of view.
pub trait OutcomeSink: Send + Sync {
    /// Record one completed invocation of `agent_id`.
    fn record_outcome(&self, agent_id: &str, success: bool, latency: Duration);
}

/// An [`OutcomeSink`] that drops everything.
pub struct NullSink;

impl OutcomeSink for NullSink {
    fn record_outcome(&self, _agent_id: &str, _success: bool, _latency: Duration) {}
}
