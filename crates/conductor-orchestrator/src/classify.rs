use crate::rules::{Rule, RuleTable, TermPattern};
use conductor_core::{ConductorError, FailureKind, Target};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What kind of failure an error represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Operating system, permission, or access failures.
    SystemError,
    /// Bad or unreadable configuration and parameters.
    ConfigurationError,
    /// An agent or the delegation machinery misbehaved.
    AgentError,
    /// Connectivity failures.
    NetworkError,
    /// Something did not finish in time.
    TimeoutError,
    /// Memory, disk, or CPU exhaustion.
    ResourceError,
    /// Inputs or outputs failed validation.
    ValidationError,
    /// No rule matched.
    UnknownError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::SystemError => "system_error",
            ErrorCategory::ConfigurationError => "configuration_error",
            ErrorCategory::AgentError => "agent_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::ResourceError => "resource_error",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::UnknownError => "unknown_error",
        };
        write!(f, "{name}")
    }
}

/// Impact of an error, independent of its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Default.
    Low,
    /// General programming errors and timeouts.
    Medium,
    /// OS and permission failures.
    High,
    /// Out-of-memory or explicitly fatal failures.
    Critical,
}

/// A failure with its category, severity, and recoverability decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Source error message.
    pub message: String,
    /// Failure kind reported by the backend.
    pub kind: FailureKind,
    /// Assigned category.
    pub category: ErrorCategory,
    /// Assigned severity.
    pub severity: Severity,
    /// Whether recovery may be attempted at all.
    pub recoverable: bool,
    /// Task context at the time of the failure.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    /// Execution unit that failed, if the failure came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<usize>,
    /// Target that failed, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
}

impl ClassifiedError {
    /// Attach the failing unit and target.
    pub fn at_unit(mut self, unit: usize, target: &Target) -> Self {
        self.unit = Some(unit);
        self.target = Some(target.clone());
        self
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{:?}] {}", self.category, self.severity, self.message)
    }
}

/// Deterministic, keyword-driven error classification.
pub struct ErrorClassifier {
    categories: RuleTable<ErrorCategory>,
    critical_terms: Vec<TermPattern>,
}

impl ErrorClassifier {
    /// Classifier with the built-in category table.
    pub fn new() -> Self {
        Self {
            categories: category_rules(),
            critical_terms: ["critical", "fatal", "crash", "corrupt"]
                .iter()
                .map(|t| TermPattern::new(*t))
                .collect(),
        }
    }

    /// The category table, in precedence order.
    pub fn rules(&self) -> &RuleTable<ErrorCategory> {
        &self.categories
    }

    /// Classify an engine error.
    pub fn classify(&self, error: &ConductorError, context: &Map<String, Value>) -> ClassifiedError {
        let message = match error {
            ConductorError::Invocation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.classify_message(message, error.kind(), context)
    }

    /// Classify a raw failure message with a known kind.
    pub fn classify_message(
        &self,
        message: impl Into<String>,
        kind: FailureKind,
        context: &Map<String, Value>,
    ) -> ClassifiedError {
        let message = message.into();
        let category = self.category(&message);
        ClassifiedError {
            severity: self.severity(&message, kind),
            recoverable: recoverable(category, kind),
            message,
            kind,
            category,
            context: context.clone(),
            unit: None,
            target: None,
        }
    }

    /// Category of a message: first matching rule, else `UnknownError`.
    pub fn category(&self, message: &str) -> ErrorCategory {
        self.categories
            .first_match(message)
            .map_or(ErrorCategory::UnknownError, |r| r.outcome)
    }

    /// Severity from explicit fatal language first, then from the failure kind.
    pub fn severity(&self, message: &str, kind: FailureKind) -> Severity {
        if self.critical_terms.iter().any(|t| t.matches(message)) {
            return Severity::Critical;
        }
        match kind {
            FailureKind::OutOfMemory => Severity::Critical,
            FailureKind::Os | FailureKind::Permission => Severity::High,
            FailureKind::InvalidValue
            | FailureKind::MissingKey
            | FailureKind::InvalidAttribute
            | FailureKind::Timeout => Severity::Medium,
            FailureKind::System | FailureKind::Other => Severity::Low,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Transient categories are always worth a retry; otherwise only the
/// catastrophic kinds are denied.
fn recoverable(category: ErrorCategory, kind: FailureKind) -> bool {
    if matches!(
        category,
        ErrorCategory::NetworkError | ErrorCategory::TimeoutError | ErrorCategory::AgentError
    ) {
        return true;
    }
    !matches!(kind, FailureKind::OutOfMemory | FailureKind::System)
}

/// Error category rules. Timeout is a refinement of the network family and
/// is checked first.
pub fn category_rules() -> RuleTable<ErrorCategory> {
    RuleTable::new(vec![
        Rule::new(
            "timeout",
            &["timeout", "timed out", "deadline"],
            ErrorCategory::TimeoutError,
            10,
        ),
        Rule::new(
            "network",
            &["connection", "network", "unreachable", "dns", "socket"],
            ErrorCategory::NetworkError,
            20,
        ),
        Rule::new(
            "configuration",
            &["config", "configuration", "setting", "parameter", "yaml", "json", "toml"],
            ErrorCategory::ConfigurationError,
            30,
        ),
        Rule::new(
            "resource",
            &["memory", "disk", "cpu", "resource", "quota"],
            ErrorCategory::ResourceError,
            40,
        ),
        Rule::new(
            "validation",
            &["validation", "invalid", "missing", "required"],
            ErrorCategory::ValidationError,
            50,
        ),
        Rule::new(
            "agent",
            &["agent", "delegation", "orchestration"],
            ErrorCategory::AgentError,
            60,
        ),
        Rule::new(
            "system",
            &["system", "os", "permission", "access"],
            ErrorCategory::SystemError,
            70,
        ),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn classify(message: &str, kind: FailureKind) -> ClassifiedError {
        ErrorClassifier::new().classify_message(message, kind, &Map::new())
    }

    #[test]
    fn test_timeout_checked_before_network() {
        let classifier = ErrorClassifier::new();
        let order: Vec<&str> = classifier.rules().rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order[0], "timeout");
        assert_eq!(order[1], "network");

        assert_eq!(
            classify("connection timeout to upstream", FailureKind::Other).category,
            ErrorCategory::TimeoutError
        );
        assert_eq!(
            classify("Connection refused", FailureKind::Other).category,
            ErrorCategory::NetworkError
        );
    }

    #[test]
    fn test_categories() {
        let cases = [
            ("bad config value for retries", ErrorCategory::ConfigurationError),
            ("disk full", ErrorCategory::ResourceError),
            ("field 'name' is required", ErrorCategory::ValidationError),
            ("agent returned garbage", ErrorCategory::AgentError),
            ("permission denied", ErrorCategory::SystemError),
            ("something odd happened", ErrorCategory::UnknownError),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(message, FailureKind::Other).category, expected, "{message}");
        }
    }

    #[test]
    fn test_severity() {
        assert_eq!(classify("fatal: index corrupted", FailureKind::Other).severity, Severity::Critical);
        assert_eq!(classify("alloc failed", FailureKind::OutOfMemory).severity, Severity::Critical);
        assert_eq!(classify("denied", FailureKind::Permission).severity, Severity::High);
        assert_eq!(classify("eh", FailureKind::Os).severity, Severity::High);
        assert_eq!(classify("bad value", FailureKind::InvalidValue).severity, Severity::Medium);
        assert_eq!(classify("too slow", FailureKind::Timeout).severity, Severity::Medium);
        assert_eq!(classify("meh", FailureKind::Other).severity, Severity::Low);
    }

    #[test]
    fn test_recoverability() {
        assert!(classify("weird", FailureKind::Other).recoverable);
        assert!(!classify("allocation failed", FailureKind::OutOfMemory).recoverable);
        assert!(!classify("runtime panicked", FailureKind::System).recoverable);
        // Transient categories stay recoverable whatever the kind.
        assert!(classify("network down", FailureKind::System).recoverable);
    }

    #[test]
    fn test_classify_engine_errors() {
        let classifier = ErrorClassifier::new();
        let mut context = Map::new();
        context.insert("user".into(), Value::from("alice"));

        let timeout = classifier.classify(
            &ConductorError::Timeout("unit 3 exceeded 30s".into()),
            &context,
        );
        assert_eq!(timeout.category, ErrorCategory::TimeoutError);
        assert_eq!(timeout.kind, FailureKind::Timeout);
        assert_eq!(timeout.context["user"], "alice");

        let invocation = classifier.classify(
            &ConductorError::invocation("upstream unreachable", FailureKind::Os),
            &Map::new(),
        );
        assert_eq!(invocation.message, "upstream unreachable");
        assert_eq!(invocation.category, ErrorCategory::NetworkError);
        assert_eq!(invocation.severity, Severity::High);
    }
}
