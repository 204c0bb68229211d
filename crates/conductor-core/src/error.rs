use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// The broad kind of failure reported by an invocation backend.
///
/// Backends are free to report [`FailureKind::Other`]; the kind only sharpens
/// severity assignment in the error classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend ran out of memory.
    OutOfMemory,
    /// An operating-system level failure (process, file descriptor, signal).
    Os,
    /// The backend was denied access to a resource.
    Permission,
    /// A parameter had an unacceptable value.
    InvalidValue,
    /// A required key was absent from the parameters or the response.
    MissingKey,
    /// An attribute or field was accessed that does not exist.
    InvalidAttribute,
    /// The backend gave up waiting on something.
    Timeout,
    /// An internal failure of the backend runtime itself.
    System,
    /// Anything else.
    #[default]
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::OutOfMemory => "out_of_memory",
            FailureKind::Os => "os",
            FailureKind::Permission => "permission",
            FailureKind::InvalidValue => "invalid_value",
            FailureKind::MissingKey => "missing_key",
            FailureKind::InvalidAttribute => "invalid_attribute",
            FailureKind::Timeout => "timeout",
            FailureKind::System => "system",
            FailureKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Top-level error type for the Conductor workspace.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Configuration could not be read, parsed, or validated.
    #[error("Config error: {0}")]
    Config(String),

    /// An agent or tool invocation failed.
    #[error("Invocation error: {message}")]
    Invocation {
        /// Backend-provided failure message.
        message: String,
        /// Broad kind of the failure.
        kind: FailureKind,
    },

    /// A unit did not finish inside its time budget.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Relevance vectorization failed.
    #[error("Relevance error: {0}")]
    Relevance(String),

    /// Agent selection could not produce a candidate.
    #[error("Selection error: {0}")]
    Selection(String),

    /// The strategy planner could not build a plan.
    #[error("Planning error: {0}")]
    Planning(String),

    /// A failure inside the orchestration engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A task lifecycle transition that the state machine forbids.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the task was in.
        from: String,
        /// State that was requested.
        to: String,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Build an invocation error with an explicit failure kind.
    pub fn invocation(message: impl Into<String>, kind: FailureKind) -> Self {
        ConductorError::Invocation {
            message: message.into(),
            kind,
        }
    }

    /// The failure kind carried by this error, inferred for non-invocation variants.
    pub fn kind(&self) -> FailureKind {
        match self {
            ConductorError::Invocation { kind, .. } => *kind,
            ConductorError::Timeout(_) => FailureKind::Timeout,
            ConductorError::Io(e) => match e.kind() {
                std::io::ErrorKind::PermissionDenied => FailureKind::Permission,
                std::io::ErrorKind::OutOfMemory => FailureKind::OutOfMemory,
                std::io::ErrorKind::TimedOut => FailureKind::Timeout,
                _ => FailureKind::Os,
            },
            ConductorError::Json(_) => FailureKind::InvalidValue,
            _ => FailureKind::Other,
        }
    }
}
