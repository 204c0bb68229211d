use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smoothing factor for the recency-weighted latency average.
const LATENCY_EWMA_ALPHA: f64 = 0.3;

/// A named capability provider registered from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent identifier.
    pub id: String,
    /// Free-text description of what the agent is good at.
    #[serde(default)]
    pub capabilities: String,
    /// Explicit capability tags, matched case-insensitively.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional backend command (used by command-backed invokers).
    #[serde(default)]
    pub command: Option<String>,
}

impl AgentDescriptor {
    /// Create a descriptor with a capability description and no tags.
    pub fn new(id: impl Into<String>, capabilities: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into(),
            tags: Vec::new(),
            command: None,
        }
    }

    /// Attach capability tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Capability text used for relevance scoring: description plus tags.
    pub fn capability_text(&self) -> String {
        if self.tags.is_empty() {
            self.capabilities.clone()
        } else {
            format!("{} {}", self.capabilities, self.tags.join(" "))
        }
    }

    /// Lowercase keyword set of the declared capabilities.
    pub fn capability_keywords(&self) -> BTreeSet<String> {
        self.capability_text()
            .split(|c: char| !c.is_alphanumeric() && c != '.')
            .map(|w| w.trim_matches('.').to_lowercase())
            .filter(|w| !w.is_empty())
            .collect()
    }
}

/// A directly executable tool (no agent involved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool identifier.
    pub id: String,
    /// Routing category, e.g. `search_research`.
    #[serde(default)]
    pub category: String,
    /// Lowercase phrases that route a simple task to this tool.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Optional backend command (used by command-backed invokers).
    #[serde(default)]
    pub command: Option<String>,
}

impl ToolDescriptor {
    /// Create a tool descriptor.
    pub fn new<I, S>(id: impl Into<String>, category: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            category: category.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            command: None,
        }
    }
}

/// What an execution unit invokes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Target {
    /// A registered agent.
    Agent(String),
    /// A direct tool.
    Tool(String),
}

impl Target {
    /// The identifier of the agent or tool.
    pub fn id(&self) -> &str {
        match self {
            Target::Agent(id) | Target::Tool(id) => id,
        }
    }

    /// The agent id, when this target is an agent.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Target::Agent(id) => Some(id),
            Target::Tool(_) => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Agent(id) => write!(f, "agent:{id}"),
            Target::Tool(id) => write!(f, "tool:{id}"),
        }
    }
}

/// Historical performance of one agent. Owned by the feedback loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Completed invocations (successes + failures).
    pub invocations: u64,
    /// Successful invocations.
    pub successes: u64,
    /// Failed or timed-out invocations.
    pub failures: u64,
    /// Sum of observed latencies.
    pub total_latency_ms: u64,
    /// Exponentially weighted latency, biased toward recent completions.
    pub recent_latency_ms: f64,
    /// When the last outcome was recorded.
    pub last_outcome_at: Option<DateTime<Utc>>,
}

impl PerformanceRecord {
    /// Fold one completion into the record.
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_latency_ms = self.total_latency_ms.saturating_add(latency_ms);
        self.recent_latency_ms = if self.invocations == 1 {
            latency_ms as f64
        } else {
            LATENCY_EWMA_ALPHA * latency_ms as f64
                + (1.0 - LATENCY_EWMA_ALPHA) * self.recent_latency_ms
        };
        self.last_outcome_at = Some(Utc::now());
    }

    /// Fraction of successful invocations, `None` without history.
    pub fn success_rate(&self) -> Option<f64> {
        if self.invocations == 0 {
            None
        } else {
            Some(self.successes as f64 / self.invocations as f64)
        }
    }

    /// Mean latency over all invocations.
    pub fn average_latency_ms(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.invocations as f64
        }
    }
}
