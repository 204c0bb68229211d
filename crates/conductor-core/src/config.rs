use crate::agent::{AgentDescriptor, ToolDescriptor};
use crate::error::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tolerance used when checking that blend weights sum to one.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Largest timeout any rule may configure, in seconds (one day).
pub const TIMEOUT_CEILING_SECS: u64 = 86_400;

/// Linear blend of the three agent sub-scores. Always sums to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    /// Weight of the semantic relevance score.
    pub semantic: f64,
    /// Weight of the capability match score.
    pub capability: f64,
    /// Weight of the historical performance score.
    pub performance: f64,
}

impl ScoreWeights {
    /// Build weights, rejecting negative values or a sum other than 1.
    pub fn new(semantic: f64, capability: f64, performance: f64) -> ConductorResult<Self> {
        let weights = Self {
            semantic,
            capability,
            performance,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Check the blend invariant.
    pub fn validate(&self) -> ConductorResult<()> {
        if [self.semantic, self.capability, self.performance]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(ConductorError::Config(format!(
                "score weights must be finite and non-negative: {self:?}"
            )));
        }
        let sum = self.semantic + self.capability + self.performance;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ConductorError::Config(format!(
                "score weights must sum to 1, got {sum:.4}"
            )));
        }
        Ok(())
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.3,
            capability: 0.2,
            performance: 0.5,
        }
    }
}

/// Tunable selection and execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionRules {
    /// Combined-score gap under which the top two candidates conflict.
    pub conflict_margin: f64,
    /// Maximum number of candidates the selection resolver returns.
    pub top_k: usize,
    /// Default score blend.
    pub weights: ScoreWeights,
    /// Ambiguity above which clarification is always requested.
    pub high_ambiguity: f64,
    /// Ambiguity above which mid-or-higher complexity tasks need clarification.
    pub moderate_ambiguity: f64,
    /// Complexity level at which moderate ambiguity triggers clarification.
    pub mid_complexity: u8,
    /// Synchronization window for concurrent strategies, in seconds.
    pub sync_timeout_secs: u64,
    /// Maximum attempts of the retry-with-backoff strategy.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
    /// Upper bound for timeouts grown by recovery.
    pub max_timeout_secs: u64,
    /// Whether graceful degradation may turn a failure into a degraded success.
    pub allow_degradation: bool,
    /// How many fallback plans the engine may build after a terminal failure.
    pub max_replans: u32,
}

impl Default for SelectionRules {
    fn default() -> Self {
        Self {
            conflict_margin: 0.05,
            top_k: 3,
            weights: ScoreWeights::default(),
            high_ambiguity: 0.8,
            moderate_ambiguity: 0.6,
            mid_complexity: 3,
            sync_timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            max_timeout_secs: 300,
            allow_degradation: false,
            max_replans: 1,
        }
    }
}

impl SelectionRules {
    /// Validate the rule set.
    pub fn validate(&self) -> ConductorResult<()> {
        self.weights.validate()?;
        if self.top_k == 0 {
            return Err(ConductorError::Config("top_k must be at least 1".into()));
        }
        if !self.conflict_margin.is_finite() || self.conflict_margin < 0.0 {
            return Err(ConductorError::Config(
                "conflict_margin must be a non-negative number".into(),
            ));
        }
        if !(1..=5).contains(&self.mid_complexity) {
            return Err(ConductorError::Config(
                "mid_complexity must be between 1 and 5".into(),
            ));
        }
        if self.moderate_ambiguity > self.high_ambiguity {
            return Err(ConductorError::Config(
                "moderate_ambiguity must not exceed high_ambiguity".into(),
            ));
        }
        if self.sync_timeout_secs == 0 {
            return Err(ConductorError::Config(
                "sync_timeout_secs must be positive".into(),
            ));
        }
        if self.max_timeout_secs > TIMEOUT_CEILING_SECS {
            return Err(ConductorError::Config(format!(
                "max_timeout_secs must not exceed {TIMEOUT_CEILING_SECS}"
            )));
        }
        if self.sync_timeout_secs > self.max_timeout_secs {
            return Err(ConductorError::Config(
                "sync_timeout_secs must not exceed max_timeout_secs".into(),
            ));
        }
        Ok(())
    }

    /// Synchronization deadline as a [`Duration`].
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// The agent registry and rule set in force for one decision cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// Registered agents.
    pub agents: Vec<AgentDescriptor>,
    /// Directly executable tools. Empty means the built-in routing table.
    pub tools: Vec<ToolDescriptor>,
    /// Selection and execution policy.
    pub rules: SelectionRules,
}

impl ConfigSnapshot {
    /// Validate rules and agent identifiers.
    pub fn validate(&self) -> ConductorResult<()> {
        self.rules.validate()?;
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if agent.id.trim().is_empty() {
                return Err(ConductorError::Config("agent id must not be empty".into()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ConductorError::Config(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }
        Ok(())
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Configured tools, or the built-in routing table when none are configured.
    pub fn effective_tools(&self) -> Vec<ToolDescriptor> {
        if self.tools.is_empty() {
            default_tools()
        } else {
            self.tools.clone()
        }
    }
}

/// Built-in direct-tool routing table, in priority order.
pub fn default_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "web_search",
            "search_research",
            ["search", "find", "research", "look up", "investigate"],
        ),
        ToolDescriptor::new(
            "documentation",
            "documentation",
            ["documentation", "docs", "manual", "guide", "reference"],
        ),
        ToolDescriptor::new(
            "file_ops",
            "file_operations",
            ["read file", "check file", "list files", "find file"],
        ),
        ToolDescriptor::new(
            "config_helper",
            "configuration",
            ["configure", "setup simple", "basic config"],
        ),
        ToolDescriptor::new(
            "web_fetch",
            "web_content",
            ["get web content", "fetch page", "web search"],
        ),
    ]
}

/// Read-only access to the current configuration.
///
/// Implementations are refreshed by an outside collaborator between cycles;
/// consumers take one snapshot per cycle and never re-read mid-cycle.
pub trait ConfigSource: Send + Sync {
    /// The snapshot in force right now.
    fn snapshot(&self) -> Arc<ConfigSnapshot>;
}

/// A configuration that never changes.
pub struct StaticConfig {
    snapshot: Arc<ConfigSnapshot>,
}

impl StaticConfig {
    /// Wrap a validated snapshot.
    pub fn new(snapshot: ConfigSnapshot) -> ConductorResult<Self> {
        snapshot.validate()?;
        Ok(Self {
            snapshot: Arc::new(snapshot),
        })
    }
}

impl ConfigSource for StaticConfig {
    fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot)
    }
}

/// A swappable configuration fed by "configuration changed" notifications.
pub struct SharedConfig {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl SharedConfig {
    /// Start from a validated snapshot.
    pub fn new(snapshot: ConfigSnapshot) -> ConductorResult<Self> {
        snapshot.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Replace the snapshot. Invalid snapshots are rejected and the old one kept.
    pub fn replace(&self, snapshot: ConfigSnapshot) -> ConductorResult<()> {
        snapshot.validate()?;
        let agents = snapshot.agents.len();
        *self.current.write() = Arc::new(snapshot);
        info!(agents, "Configuration snapshot replaced");
        Ok(())
    }
}

impl ConfigSource for SharedConfig {
    fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoreWeights::default();
        assert!(w.validate().is_ok());
        assert!((w.semantic + w.capability + w.performance - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn test_weights_reject_bad_sum() {
        assert!(ScoreWeights::new(0.3, 0.5, 0.5).is_err());
        assert!(ScoreWeights::new(-0.1, 0.6, 0.5).is_err());
        assert!(ScoreWeights::new(0.4, 0.4, 0.2).is_ok());
    }

    #[test]
    fn test_rules_validation() {
        let mut rules = SelectionRules::default();
        assert!(rules.validate().is_ok());
        rules.top_k = 0;
        assert!(rules.validate().is_err());

        let mut rules = SelectionRules::default();
        rules.moderate_ambiguity = 0.9;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_rules_reject_unbounded_timeouts() {
        let rules = SelectionRules {
            sync_timeout_secs: u64::MAX,
            ..Default::default()
        };
        assert!(rules.validate().is_err());

        let rules = SelectionRules {
            sync_timeout_secs: 600,
            max_timeout_secs: 300,
            ..Default::default()
        };
        assert!(rules.validate().is_err());

        let rules = SelectionRules {
            max_timeout_secs: TIMEOUT_CEILING_SECS + 1,
            ..Default::default()
        };
        assert!(rules.validate().is_err());

        let rules = SelectionRules {
            sync_timeout_secs: TIMEOUT_CEILING_SECS,
            max_timeout_secs: TIMEOUT_CEILING_SECS,
            ..Default::default()
        };
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_snapshot_rejects_duplicate_agents() {
        let snapshot = ConfigSnapshot {
            agents: vec![
                AgentDescriptor::new("a", "one"),
                AgentDescriptor::new("a", "two"),
            ],
            ..Default::default()
        };
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_effective_tools_fall_back_to_defaults() {
        let snapshot = ConfigSnapshot::default();
        let tools = snapshot.effective_tools();
        assert_eq!(tools[0].id, "web_search");
        assert_eq!(tools.len(), 5);
    }

    #[test]
    fn test_shared_config_replace_keeps_old_on_invalid() {
        let shared = SharedConfig::new(ConfigSnapshot::default()).unwrap();
        let mut bad = ConfigSnapshot::default();
        bad.rules.top_k = 0;
        assert!(shared.replace(bad).is_err());
        assert_eq!(shared.snapshot().rules.top_k, 3);

        let good = ConfigSnapshot {
            agents: vec![AgentDescriptor::new("solo", "does everything")],
            ..Default::default()
        };
        shared.replace(good).unwrap();
        assert_eq!(shared.snapshot().agents.len(), 1);
    }

    #[test]
    fn test_snapshot_parses_from_toml_with_defaults() {
        let snapshot: ConfigSnapshot = toml::from_str(
            r#"
[[agents]]
id = "backend"
capabilities = "api database"

[rules]
top_k = 2
"#,
        )
        .unwrap();
        assert_eq!(snapshot.agents[0].id, "backend");
        assert_eq!(snapshot.rules.top_k, 2);
        assert_eq!(snapshot.rules.conflict_margin, 0.05);
    }
}
