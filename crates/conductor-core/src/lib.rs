//! Core types and collaborator traits for the Conductor task distribution engine.
//!
//! This crate holds everything the engine shares with the outside world:
//! the unified error type, agent and tool descriptors, the per-agent
//! performance record, configuration snapshots, and the outbound
//! [`Invoker`] / [`OutcomeSink`] traits.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`]: Convenience alias for `Result<T, ConductorError>`.
//! - [`AgentDescriptor`] / [`ToolDescriptor`]: Registered capability providers.
//! - [`PerformanceRecord`]: Historical outcomes of one agent.
//! - [`ConfigSnapshot`]: Agent registry plus selection rules for one cycle.
//! - [`Invoker`]: The only way the engine reaches agents and tools.

/// Agent, tool, and performance record types.
pub mod agent;
/// Configuration snapshots and sources.
pub mod config;
/// Error type and failure kinds.
pub mod error;
/// Outbound invocation and feedback traits.
pub mod invoke;

pub use agent::{AgentDescriptor, PerformanceRecord, Target, ToolDescriptor};
pub use config::{
    default_tools, ConfigSnapshot, ConfigSource, ScoreWeights, SelectionRules, SharedConfig,
    StaticConfig, TIMEOUT_CEILING_SECS,
};
pub use error::{ConductorError, ConductorResult, FailureKind};
pub use invoke::{Invoker, NullSink, OutcomeSink};
