use crate::classify::{ClassifiedError, ErrorCategory};
use async_trait::async_trait;
use conductor_core::{ConductorResult, SelectionRules};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Growth factor applied by the increase-timeout strategy.
const TIMEOUT_GROWTH: f64 = 1.5;

/// A named recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry the same work with exponential backoff.
    RetryWithBackoff,
    /// Retry against an alternative agent.
    AlternativeEndpoint,
    /// Serve from an offline cache.
    OfflineMode,
    /// Retry with a longer timeout.
    IncreaseTimeout,
    /// Retry with the maximum timeout.
    AsyncExecution,
    /// Split the work into batches.
    BatchProcessing,
    /// Re-read configuration.
    ReloadConfig,
    /// Retry without the caller-supplied configuration parameter.
    UseDefaultConfig,
    /// Validate configuration before retrying.
    ConfigValidation,
    /// Retry against the first alternative agent.
    FallbackAgent,
    /// Bypass delegation and execute directly.
    DirectExecution,
    /// Retry against the second alternative agent.
    AlternativeWorkflow,
    /// Release engine-owned resources.
    ResourceCleanup,
    /// Retry with a reduced scope flag.
    ReduceScope,
    /// Wait, then retry.
    DeferExecution,
    /// One plain retry.
    GenericRetry,
    /// Deliver a degraded result instead of failing.
    GracefulDegradation,
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryStrategy::RetryWithBackoff => "retry_with_backoff",
            RecoveryStrategy::AlternativeEndpoint => "alternative_endpoint",
            RecoveryStrategy::OfflineMode => "offline_mode",
            RecoveryStrategy::IncreaseTimeout => "increase_timeout",
            RecoveryStrategy::AsyncExecution => "async_execution",
            RecoveryStrategy::BatchProcessing => "batch_processing",
            RecoveryStrategy::ReloadConfig => "reload_config",
            RecoveryStrategy::UseDefaultConfig => "use_default_config",
            RecoveryStrategy::ConfigValidation => "config_validation",
            RecoveryStrategy::FallbackAgent => "fallback_agent",
            RecoveryStrategy::DirectExecution => "direct_execution",
            RecoveryStrategy::AlternativeWorkflow => "alternative_workflow",
            RecoveryStrategy::ResourceCleanup => "resource_cleanup",
            RecoveryStrategy::ReduceScope => "reduce_scope",
            RecoveryStrategy::DeferExecution => "defer_execution",
            RecoveryStrategy::GenericRetry => "generic_retry",
            RecoveryStrategy::GracefulDegradation => "graceful_degradation",
        };
        write!(f, "{name}")
    }
}

/// Ordered strategies for a category, followed by the two universal fallbacks.
pub fn strategies_for(category: ErrorCategory) -> Vec<RecoveryStrategy> {
    use RecoveryStrategy::*;
    let mut strategies = match category {
        ErrorCategory::NetworkError => vec![RetryWithBackoff, AlternativeEndpoint, OfflineMode],
        ErrorCategory::TimeoutError => vec![IncreaseTimeout, AsyncExecution, BatchProcessing],
        ErrorCategory::ConfigurationError => {
            vec![ReloadConfig, UseDefaultConfig, ConfigValidation]
        }
        ErrorCategory::AgentError => vec![FallbackAgent, DirectExecution, AlternativeWorkflow],
        ErrorCategory::ResourceError => vec![ResourceCleanup, ReduceScope, DeferExecution],
        ErrorCategory::SystemError
        | ErrorCategory::ValidationError
        | ErrorCategory::UnknownError => Vec::new(),
    };
    strategies.extend([GenericRetry, GracefulDegradation]);
    strategies
}

/// How a retry differs from the failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Adjustment {
    /// Identical parameters and target.
    Same,
    /// A different time budget.
    Timeout(Duration),
    /// A different agent.
    Agent(String),
    /// The parameters without one key.
    WithoutParameter(String),
    /// The parameters with `reduced_scope: true`.
    ReducedScope,
}

/// The failed piece of work, as seen by the recovery engine.
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    /// Time budget of the failed attempt.
    fn current_timeout(&self) -> Duration;

    /// Agents that may stand in for the failed one, best first.
    fn alternatives(&self) -> Vec<String>;

    /// Whether the failed attempt's parameters contain `key`.
    fn has_parameter(&self, key: &str) -> bool;

    /// Re-run the work with an adjustment applied.
    async fn retry(&self, adjustment: Adjustment) -> ConductorResult<Value>;
}

/// Numeric recovery policy, taken from the cycle's [`SelectionRules`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Maximum attempts of the retry-with-backoff strategy.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds.
    pub backoff_max_ms: u64,
    /// Cap for grown timeouts.
    pub max_timeout: Duration,
    /// Whether graceful degradation may succeed.
    pub allow_degradation: bool,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::from_rules(&SelectionRules::default())
    }
}

impl RecoveryPolicy {
    /// Extract the policy from a rule set.
    pub fn from_rules(rules: &SelectionRules) -> Self {
        Self {
            max_retries: rules.max_retries,
            backoff_base_ms: rules.backoff_base_ms,
            backoff_max_ms: rules.backoff_max_ms,
            max_timeout: Duration::from_secs(rules.max_timeout_secs),
            allow_degradation: rules.allow_degradation,
        }
    }

    /// `base × 2^attempt`, capped at the maximum delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

/// How one strategy went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The strategy recovered the work.
    Succeeded,
    /// The strategy ran and failed.
    Failed(String),
    /// The strategy could not be applied here.
    NotApplicable(String),
}

/// One entry of the recovery trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// Strategy tried.
    pub strategy: RecoveryStrategy,
    /// Invocations made by the strategy.
    pub invocations: u32,
    /// Result.
    pub outcome: AttemptOutcome,
}

/// Result of a recovery run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Whether some strategy recovered the work.
    pub recovered: bool,
    /// The strategy that succeeded.
    pub strategy: Option<RecoveryStrategy>,
    /// Every strategy tried, in order.
    pub tried: Vec<RecoveryAttempt>,
    /// Backoff delays applied, in milliseconds.
    pub delays_ms: Vec<u64>,
    /// Recovered value.
    pub value: Option<Value>,
    /// Whether the value is a degraded placeholder.
    pub degraded: bool,
}

impl RecoveryReport {
    /// Names of every strategy that was tried.
    pub fn exhausted(&self) -> Vec<RecoveryStrategy> {
        self.tried.iter().map(|a| a.strategy).collect()
    }
}

enum StepResult {
    Recovered(Value),
    Failed(String),
    NotApplicable(&'static str),
}

/// Walks a category's strategies in priority order until one succeeds.
pub struct RecoveryEngine {
    policy: RecoveryPolicy,
}

impl RecoveryEngine {
    /// Engine with the given policy.
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in force.
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Try to recover `error` by re-running `target`. Unrecoverable errors fail fast.
    pub async fn recover(&self, error: &ClassifiedError, target: &dyn RecoveryTarget) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        if !error.recoverable {
            warn!(category = %error.category, error = %error.message, "Unrecoverable error, failing fast");
            return report;
        }

        for strategy in strategies_for(error.category) {
            let mut invocations = 0;
            let step = self
                .apply(strategy, error, target, &mut invocations, &mut report.delays_ms)
                .await;
            let outcome = match step {
                StepResult::Recovered(value) => {
                    info!(strategy = %strategy, invocations, "Recovery succeeded");
                    report.degraded = strategy == RecoveryStrategy::GracefulDegradation;
                    report.recovered = true;
                    report.strategy = Some(strategy);
                    report.value = Some(value);
                    AttemptOutcome::Succeeded
                }
                StepResult::Failed(reason) => {
                    warn!(strategy = %strategy, error = %reason, "Recovery strategy failed");
                    AttemptOutcome::Failed(reason)
                }
                StepResult::NotApplicable(reason) => AttemptOutcome::NotApplicable(reason.into()),
            };
            report.tried.push(RecoveryAttempt {
                strategy,
                invocations,
                outcome,
            });
            if report.recovered {
                break;
            }
        }

        if !report.recovered {
            warn!(
                category = %error.category,
                tried = report.tried.len(),
                "All recovery strategies exhausted"
            );
        }
        report
    }

    async fn apply(
        &self,
        strategy: RecoveryStrategy,
        error: &ClassifiedError,
        target: &dyn RecoveryTarget,
        invocations: &mut u32,
        delays: &mut Vec<u64>,
    ) -> StepResult {
        use RecoveryStrategy::*;
        let alternatives = target.alternatives();
        let adjustment = match strategy {
            RetryWithBackoff => return self.retry_with_backoff(target, invocations, delays).await,
            IncreaseTimeout => {
                let current = target.current_timeout();
                let grown = grow_timeout(current).min(self.policy.max_timeout);
                if grown <= current {
                    return StepResult::NotApplicable("timeout already at maximum");
                }
                Adjustment::Timeout(grown)
            }
            AsyncExecution => {
                let grown = grow_timeout(target.current_timeout());
                if self.policy.max_timeout <= grown {
                    return StepResult::NotApplicable("no budget beyond the increased timeout");
                }
                Adjustment::Timeout(self.policy.max_timeout)
            }
            AlternativeEndpoint | FallbackAgent => match alternatives.first() {
                Some(agent) => Adjustment::Agent(agent.clone()),
                None => return StepResult::NotApplicable("no alternative agent"),
            },
            AlternativeWorkflow => match alternatives.get(1) {
                Some(agent) => Adjustment::Agent(agent.clone()),
                None => return StepResult::NotApplicable("no second alternative agent"),
            },
            UseDefaultConfig => {
                if !target.has_parameter("config") {
                    return StepResult::NotApplicable("no configuration parameter to drop");
                }
                Adjustment::WithoutParameter("config".into())
            }
            ReduceScope => Adjustment::ReducedScope,
            DeferExecution => {
                let delay = self.policy.backoff(0);
                delays.push(delay.as_millis() as u64);
                tokio::time::sleep(delay).await;
                Adjustment::Same
            }
            GenericRetry => Adjustment::Same,
            GracefulDegradation => {
                if !self.policy.allow_degradation {
                    return StepResult::NotApplicable("degradation disabled");
                }
                return StepResult::Recovered(json!({
                    "degraded": true,
                    "error": error.message,
                    "category": error.category,
                }));
            }
            ReloadConfig | ConfigValidation => {
                return StepResult::NotApplicable("configuration is fixed for the cycle")
            }
            OfflineMode => return StepResult::NotApplicable("no offline cache"),
            BatchProcessing => return StepResult::NotApplicable("work is not batchable"),
            DirectExecution => return StepResult::NotApplicable("no direct tool for this work"),
            ResourceCleanup => return StepResult::NotApplicable("no engine-owned resources"),
        };

        *invocations += 1;
        match target.retry(adjustment).await {
            Ok(value) => StepResult::Recovered(value),
            Err(e) => StepResult::Failed(e.to_string()),
        }
    }

    async fn retry_with_backoff(
        &self,
        target: &dyn RecoveryTarget,
        invocations: &mut u32,
        delays: &mut Vec<u64>,
    ) -> StepResult {
        let mut last = String::from("no retries configured");
        for attempt in 0..self.policy.max_retries {
            let delay = self.policy.backoff(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            delays.push(delay.as_millis() as u64);
            tokio::time::sleep(delay).await;

            *invocations += 1;
            match target.retry(Adjustment::Same).await {
                Ok(value) => return StepResult::Recovered(value),
                Err(e) => last = e.to_string(),
            }
        }
        StepResult::Failed(last)
    }
}

/// Scale a timeout by the growth factor, saturating instead of overflowing.
fn grow_timeout(current: Duration) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * TIMEOUT_GROWTH).unwrap_or(Duration::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::classify::ErrorClassifier;
    use conductor_core::{ConductorError, FailureKind};
    use parking_lot::Mutex;
    use serde_json::Map;
    use std::collections::VecDeque;

    struct ScriptedTarget {
        responses: Mutex<VecDeque<ConductorResult<Value>>>,
        adjustments: Mutex<Vec<Adjustment>>,
        alternatives: Vec<String>,
        timeout: Duration,
    }

    impl ScriptedTarget {
        fn new(responses: Vec<ConductorResult<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                adjustments: Mutex::new(Vec::new()),
                alternatives: Vec::new(),
                timeout: Duration::from_secs(30),
            }
        }
    }

    #[async_trait]
    impl RecoveryTarget for ScriptedTarget {
        fn current_timeout(&self) -> Duration {
            self.timeout
        }

        fn alternatives(&self) -> Vec<String> {
            self.alternatives.clone()
        }

        fn has_parameter(&self, _key: &str) -> bool {
            false
        }

        async fn retry(&self, adjustment: Adjustment) -> ConductorResult<Value> {
            self.adjustments.lock().push(adjustment);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ConductorError::invocation("still down", FailureKind::Other)))
        }
    }

    fn failure() -> ConductorResult<Value> {
        Err(ConductorError::invocation("still down", FailureKind::Other))
    }

    fn network_error() -> ClassifiedError {
        ErrorClassifier::new().classify_message("connection reset", FailureKind::Other, &Map::new())
    }

    #[test]
    fn test_strategy_lists() {
        assert_eq!(
            strategies_for(ErrorCategory::NetworkError),
            vec![
                RecoveryStrategy::RetryWithBackoff,
                RecoveryStrategy::AlternativeEndpoint,
                RecoveryStrategy::OfflineMode,
                RecoveryStrategy::GenericRetry,
                RecoveryStrategy::GracefulDegradation,
            ]
        );
        assert_eq!(
            strategies_for(ErrorCategory::UnknownError),
            vec![RecoveryStrategy::GenericRetry, RecoveryStrategy::GracefulDegradation]
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RecoveryPolicy {
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 3000,
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_when_all_retries_fail() {
        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let target = ScriptedTarget::new(vec![failure(), failure(), failure(), failure()]);
        let start = tokio::time::Instant::now();

        let report = engine.recover(&network_error(), &target).await;

        assert!(!report.recovered);
        assert_eq!(&report.delays_ms[..3], &[1000, 2000, 4000]);
        assert_eq!(report.tried[0].invocations, 3);
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(
            report.exhausted(),
            strategies_for(ErrorCategory::NetworkError)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_stops_on_first_success() {
        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let target = ScriptedTarget::new(vec![failure(), Ok(json!("ok"))]);

        let report = engine.recover(&network_error(), &target).await;

        assert!(report.recovered);
        assert_eq!(report.strategy, Some(RecoveryStrategy::RetryWithBackoff));
        assert_eq!(report.delays_ms, vec![1000, 2000]);
        assert_eq!(report.value, Some(json!("ok")));
        assert_eq!(target.adjustments.lock().len(), 2);
        assert_eq!(report.tried.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_grows_by_half() {
        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let target = ScriptedTarget::new(vec![Ok(json!({"done": true}))]);
        let error =
            ErrorClassifier::new().classify_message("deadline exceeded", FailureKind::Timeout, &Map::new());

        let report = engine.recover(&error, &target).await;

        assert!(report.recovered);
        assert_eq!(report.strategy, Some(RecoveryStrategy::IncreaseTimeout));
        assert_eq!(
            target.adjustments.lock()[0],
            Adjustment::Timeout(Duration::from_secs(45))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_growth_saturates() {
        assert_eq!(grow_timeout(Duration::MAX), Duration::MAX);

        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let target = ScriptedTarget {
            timeout: Duration::MAX,
            ..ScriptedTarget::new(vec![Ok(json!({"done": true}))])
        };
        let error =
            ErrorClassifier::new().classify_message("deadline exceeded", FailureKind::Timeout, &Map::new());

        let report = engine.recover(&error, &target).await;

        assert_ne!(report.strategy, Some(RecoveryStrategy::IncreaseTimeout));
        assert!(!target
            .adjustments
            .lock()
            .iter()
            .any(|a| matches!(a, Adjustment::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_error_uses_fallback_agent() {
        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let mut target = ScriptedTarget::new(vec![failure(), Ok(json!("second"))]);
        target.alternatives = vec!["alt-1".into(), "alt-2".into()];
        let error =
            ErrorClassifier::new().classify_message("agent crashed mid-answer", FailureKind::Other, &Map::new());

        let report = engine.recover(&error, &target).await;

        assert!(report.recovered);
        assert_eq!(report.strategy, Some(RecoveryStrategy::AlternativeWorkflow));
        let adjustments = target.adjustments.lock();
        assert_eq!(adjustments[0], Adjustment::Agent("alt-1".into()));
        assert_eq!(adjustments[1], Adjustment::Agent("alt-2".into()));
        assert!(matches!(
            report.tried[1].outcome,
            AttemptOutcome::NotApplicable(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_fails_fast() {
        let engine = RecoveryEngine::new(RecoveryPolicy::default());
        let target = ScriptedTarget::new(vec![Ok(json!("never used"))]);
        let error =
            ErrorClassifier::new().classify_message("heap exhausted", FailureKind::OutOfMemory, &Map::new());

        let report = engine.recover(&error, &target).await;

        assert!(!report.recovered);
        assert!(report.tried.is_empty());
        assert!(target.adjustments.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_degradation_when_allowed() {
        let policy = RecoveryPolicy {
            allow_degradation: true,
            ..Default::default()
        };
        let engine = RecoveryEngine::new(policy);
        let target = ScriptedTarget::new(vec![failure()]);
        let error = ErrorClassifier::new().classify_message("bad output", FailureKind::Other, &Map::new());

        let report = engine.recover(&error, &target).await;

        assert!(report.recovered);
        assert!(report.degraded);
        assert_eq!(report.strategy, Some(RecoveryStrategy::GracefulDegradation));
        assert_eq!(report.value.as_ref().unwrap()["degraded"], true);
    }
}
