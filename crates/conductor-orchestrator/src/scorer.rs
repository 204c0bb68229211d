use crate::relevance::{KeywordOverlapScorer, RelevanceScorer};
use conductor_core::{
    AgentDescriptor, ConductorError, ConductorResult, PerformanceRecord, ScoreWeights,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Score for agents without history, and capability score for tasks that
/// state no explicit requirements.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Latency at which the latency factor drops to one half.
const REFERENCE_LATENCY_MS: f64 = 5000.0;

/// Per (task, agent) scores for one decision cycle. Never reused across cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    /// Agent being scored.
    pub agent_id: String,
    /// Semantic relevance of the agent's capability text to the task.
    pub semantic: f64,
    /// Fraction of explicit task requirements the agent declares.
    pub capability: f64,
    /// Historical performance.
    pub performance: f64,
    /// Weighted blend of the three sub-scores.
    pub combined: f64,
    /// Which factors drove the result.
    pub rationale: String,
    /// Relevance implementation that produced the semantic score.
    pub relevance_method: String,
    /// Set when scoring this agent failed; all scores are zero then.
    pub failure: Option<String>,
}

impl ScoreCard {
    fn failed(agent_id: &str, reason: String) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            semantic: 0.0,
            capability: 0.0,
            performance: 0.0,
            combined: 0.0,
            rationale: format!("scoring failed: {reason}"),
            relevance_method: String::new(),
            failure: Some(reason),
        }
    }

    /// Whether this card's sub-scores are all >= `other`'s and at least one is greater.
    pub fn dominates(&self, other: &ScoreCard) -> bool {
        let mine = [self.semantic, self.capability, self.performance];
        let theirs = [other.semantic, other.capability, other.performance];
        mine.iter().zip(theirs.iter()).all(|(a, b)| a >= b)
            && mine.iter().zip(theirs.iter()).any(|(a, b)| a > b)
    }
}

/// Historical performance score: success rate scaled by a recency-weighted
/// latency factor. No history yields [`NEUTRAL_SCORE`].
pub fn performance_score(record: Option<&PerformanceRecord>) -> f64 {
    let Some(record) = record else {
        return NEUTRAL_SCORE;
    };
    let Some(success_rate) = record.success_rate() else {
        return NEUTRAL_SCORE;
    };
    let latency = record.recent_latency_ms.max(0.0);
    let latency_factor = REFERENCE_LATENCY_MS / (REFERENCE_LATENCY_MS + latency);
    (success_rate * (0.7 + 0.3 * latency_factor)).clamp(0.0, 1.0)
}

/// Fraction of requirement keywords found in the agent's declared capabilities.
pub fn capability_score(agent: &AgentDescriptor, requirements: &[String]) -> ConductorResult<f64> {
    let keywords = agent.capability_keywords();
    if keywords.is_empty() {
        return Err(ConductorError::Selection(format!(
            "agent '{}' declares no capabilities",
            agent.id
        )));
    }
    if requirements.is_empty() {
        return Ok(NEUTRAL_SCORE);
    }
    let matched = requirements
        .iter()
        .filter(|req| keywords.contains(req.as_str()))
        .count();
    Ok(matched as f64 / requirements.len() as f64)
}

fn describe(label: &str, value: f64) -> Option<String> {
    if value > 0.8 {
        Some(format!("high {label} ({value:.2})"))
    } else if value > 0.6 {
        Some(format!("moderate {label} ({value:.2})"))
    } else {
        None
    }
}

fn rationale(semantic: f64, capability: f64, performance: f64) -> String {
    let parts: Vec<String> = [
        describe("semantic relevance", semantic),
        describe("capability match", capability),
        describe("performance record", performance),
    ]
    .into_iter()
    .flatten()
    .collect();
    if parts.is_empty() {
        "no dominant factor".to_string()
    } else {
        parts.join("; ")
    }
}

/// Computes semantic, capability, and performance scores per candidate agent.
pub struct AgentScorer {
    relevance: Arc<dyn RelevanceScorer>,
    fallback: KeywordOverlapScorer,
}

impl AgentScorer {
    /// Create a scorer around the chosen relevance implementation.
    pub fn new(relevance: Arc<dyn RelevanceScorer>) -> Self {
        Self {
            relevance,
            fallback: KeywordOverlapScorer::new(),
        }
    }

    /// Name of the primary relevance implementation.
    pub fn relevance_name(&self) -> &'static str {
        self.relevance.name()
    }

    /// Score every candidate. A failure for one agent yields a zero card for
    /// that agent; it never aborts the pass.
    pub fn score(
        &self,
        description: &str,
        requirements: &[String],
        agents: &[AgentDescriptor],
        history: &HashMap<String, PerformanceRecord>,
        weights: ScoreWeights,
    ) -> BTreeMap<String, ScoreCard> {
        let texts: Vec<String> = agents.iter().map(AgentDescriptor::capability_text).collect();
        let docs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (semantic, method) = self.semantic_scores(description, &docs);

        agents
            .iter()
            .enumerate()
            .map(|(idx, agent)| {
                let card = match self.score_one(
                    agent,
                    semantic.get(idx).copied(),
                    requirements,
                    history.get(&agent.id),
                    weights,
                    method,
                ) {
                    Ok(card) => card,
                    Err(e) => {
                        warn!(agent = %agent.id, error = %e, "Agent scoring failed");
                        ScoreCard::failed(&agent.id, e.to_string())
                    }
                };
                debug!(
                    agent = %card.agent_id,
                    semantic = card.semantic,
                    capability = card.capability,
                    performance = card.performance,
                    combined = card.combined,
                    "Scored agent"
                );
                (agent.id.clone(), card)
            })
            .collect()
    }

    fn semantic_scores(&self, description: &str, docs: &[&str]) -> (Vec<f64>, &'static str) {
        match self.relevance.score(description, docs) {
            Ok(scores) if scores.len() == docs.len() => (scores, self.relevance.name()),
            Ok(scores) => {
                warn!(
                    expected = docs.len(),
                    got = scores.len(),
                    "Relevance scorer returned wrong length, using keyword overlap"
                );
                self.fallback_scores(description, docs)
            }
            Err(e) => {
                warn!(scorer = self.relevance.name(), error = %e, "Relevance scoring failed, using keyword overlap");
                self.fallback_scores(description, docs)
            }
        }
    }

    fn fallback_scores(&self, description: &str, docs: &[&str]) -> (Vec<f64>, &'static str) {
        let scores = self
            .fallback
            .score(description, docs)
            .unwrap_or_else(|_| vec![0.0; docs.len()]);
        (scores, self.fallback.name())
    }

    fn score_one(
        &self,
        agent: &AgentDescriptor,
        semantic: Option<f64>,
        requirements: &[String],
        record: Option<&PerformanceRecord>,
        weights: ScoreWeights,
        method: &str,
    ) -> ConductorResult<ScoreCard> {
        let semantic = semantic.ok_or_else(|| {
            ConductorError::Relevance(format!("no relevance score for agent '{}'", agent.id))
        })?;
        let capability = capability_score(agent, requirements)?;
        let performance = performance_score(record);

        let combined = weights.semantic * semantic
            + weights.capability * capability
            + weights.performance * performance;
        if !combined.is_finite() {
            return Err(ConductorError::Selection(format!(
                "non-finite combined score for agent '{}'",
                agent.id
            )));
        }

        Ok(ScoreCard {
            agent_id: agent.id.clone(),
            semantic,
            capability,
            performance,
            combined,
            rationale: rationale(semantic, capability, performance),
            relevance_method: method.to_string(),
            failure: None,
        })
    }
}
