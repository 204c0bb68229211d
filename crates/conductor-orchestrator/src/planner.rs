use crate::analyzer::Analysis;
use crate::rules::TermPattern;
use crate::selection::Selection;
use crate::types::{ExecutionPlan, PlannedUnit, Strategy, Task};
use conductor_core::{
    AgentDescriptor, ConductorError, ConductorResult, ConfigSnapshot, ScoreWeights,
    SelectionRules, Target, ToolDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

/// Capability-heavy blend used above the lowest complexity tier, where
/// matching the stated requirements matters more than raw track record.
const DELEGATION_WEIGHTS: ScoreWeights = ScoreWeights {
    semantic: 0.3,
    capability: 0.4,
    performance: 0.3,
};

/// Independent work areas a task can be split along.
const DOMAINS: &[(&str, &[&str])] = &[
    ("backend", &["backend", "api", "server", "database", "endpoint", "service"]),
    ("frontend", &["frontend", "ui", "interface", "component", "page", "css"]),
    ("testing", &["test", "testing", "qa"]),
    ("documentation", &["docs", "documentation", "readme"]),
    ("deployment", &["deploy", "deployment", "infrastructure", "pipeline"]),
];

const ALTERNATIVE_MARKERS: &[&str] = &[
    "alternative",
    "alternatives",
    "options",
    "compare",
    "best approach",
    "best way",
    "prototype",
    "explore",
    "competing",
];

/// Stage roles for sequential delegation, by number of stages.
fn stage_roles(stages: usize) -> &'static [&'static str] {
    match stages {
        0 | 1 => &["implement"],
        2 => &["implement", "review"],
        _ => &["plan", "implement", "review"],
    }
}

/// Planner verdict for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Suspend the task and ask the caller for more information.
    Clarify,
    /// Run this plan.
    Execute(ExecutionPlan),
}

/// An independent sub-part of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Domain name, e.g. `backend`.
    pub domain: String,
    /// Instruction sent to the agent handling this domain.
    pub description: String,
    /// Domain terms found in the task.
    pub terms: Vec<String>,
}

/// Maps analysis and selection results to an execution strategy.
pub struct StrategyPlanner {
    domains: Vec<(&'static str, Vec<TermPattern>)>,
    alternative_markers: Vec<TermPattern>,
}

impl StrategyPlanner {
    /// Create a planner with the built-in domain table.
    pub fn new() -> Self {
        Self {
            domains: DOMAINS
                .iter()
                .map(|(name, terms)| (*name, terms.iter().map(|t| TermPattern::new(*t)).collect()))
                .collect(),
            alternative_markers: ALTERNATIVE_MARKERS
                .iter()
                .map(|t| TermPattern::new(*t))
                .collect(),
        }
    }

    /// Score blend for this task: configured default for the lowest tier,
    /// capability-heavy for tasks that will be delegated.
    pub fn scoring_weights(&self, analysis: &Analysis, rules: &SelectionRules) -> ScoreWeights {
        if analysis.complexity.is_lowest() {
            rules.weights
        } else {
            DELEGATION_WEIGHTS
        }
    }

    /// Clarification rule: high ambiguity, or moderate ambiguity on a task of
    /// at least mid complexity.
    pub fn needs_clarification(&self, analysis: &Analysis, rules: &SelectionRules) -> bool {
        analysis.ambiguity > rules.high_ambiguity
            || (analysis.complexity.value() >= rules.mid_complexity
                && analysis.ambiguity > rules.moderate_ambiguity)
    }

    /// First tool (in table order) whose patterns match the description.
    pub fn match_tool<'a>(&self, description: &str, tools: &'a [ToolDescriptor]) -> Option<&'a ToolDescriptor> {
        tools.iter().find(|tool| {
            tool.patterns
                .iter()
                .any(|p| TermPattern::new(p.as_str()).matches(description))
        })
    }

    /// Split a task into independent sub-parts. Fewer than two distinct
    /// domains means the task does not decompose.
    pub fn decompose(&self, description: &str) -> Vec<Subtask> {
        let found: Vec<Subtask> = self
            .domains
            .iter()
            .filter_map(|(domain, patterns)| {
                let terms: Vec<String> = patterns
                    .iter()
                    .filter(|p| p.matches(description))
                    .map(|p| p.term().to_string())
                    .collect();
                (!terms.is_empty()).then(|| Subtask {
                    domain: (*domain).to_string(),
                    description: format!("{domain} part of: {description}"),
                    terms,
                })
            })
            .collect();
        if found.len() >= 2 {
            found
        } else {
            Vec::new()
        }
    }

    /// Whether the task admits more than one valid solution shape.
    pub fn admits_alternatives(&self, description: &str, context: &serde_json::Map<String, Value>) -> bool {
        context
            .get("allow_alternatives")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || self.alternative_markers.iter().any(|m| m.matches(description))
    }

    /// Choose a strategy and build its plan. First matching rule wins.
    pub fn plan(
        &self,
        task: &Task,
        analysis: &Analysis,
        selection: &Selection,
        snapshot: &ConfigSnapshot,
    ) -> ConductorResult<Decision> {
        let rules = &snapshot.rules;
        if self.needs_clarification(analysis, rules) {
            info!(task_id = %task.id, ambiguity = analysis.ambiguity, "Clarification required");
            return Ok(Decision::Clarify);
        }

        let base = base_parameters(task);
        let lowest = analysis.complexity.is_lowest();

        if lowest {
            let tools = snapshot.effective_tools();
            if let Some(tool) = self.match_tool(&task.description, &tools) {
                let mut parameters = base;
                parameters["tool_category"] = json!(tool.category);
                return Ok(Decision::Execute(self.build(
                    Strategy::DirectTool,
                    vec![PlannedUnit {
                        target: Target::Tool(tool.id.clone()),
                        parameters,
                    }],
                    rules,
                    selection,
                )));
            }
        }

        let top = selection.top().ok_or_else(|| {
            ConductorError::Selection(format!(
                "no eligible agent among {} registered",
                snapshot.agents.len()
            ))
        })?;

        if lowest {
            return Ok(Decision::Execute(self.build(
                Strategy::SingleAgent,
                vec![PlannedUnit {
                    target: Target::Agent(top.agent_id.clone()),
                    parameters: base,
                }],
                rules,
                selection,
            )));
        }

        if selection.has_co_candidates() {
            let subtasks = self.decompose(&task.description);
            if !subtasks.is_empty() {
                let units = self.assign_subtasks(&subtasks, selection, snapshot, &base);
                return Ok(Decision::Execute(self.build(
                    Strategy::ParallelDelegation,
                    units,
                    rules,
                    selection,
                )));
            }
            if self.admits_alternatives(&task.description, &task.context) {
                let units = selection
                    .co_candidates
                    .iter()
                    .map(|agent| PlannedUnit {
                        target: Target::Agent(agent.clone()),
                        parameters: base.clone(),
                    })
                    .collect();
                return Ok(Decision::Execute(self.build(
                    Strategy::CompetitiveDelegation,
                    units,
                    rules,
                    selection,
                )));
            }
        }

        let stages = &selection.ranked;
        let roles = stage_roles(stages.len());
        let units = stages
            .iter()
            .zip(roles.iter())
            .enumerate()
            .map(|(idx, (card, role))| {
                let mut parameters = base.clone();
                parameters["stage"] = json!(idx + 1);
                parameters["stages"] = json!(roles.len().min(stages.len()));
                parameters["role"] = json!(role);
                PlannedUnit {
                    target: Target::Agent(card.agent_id.clone()),
                    parameters,
                }
            })
            .collect();
        Ok(Decision::Execute(self.build(
            Strategy::SequentialDelegation,
            units,
            rules,
            selection,
        )))
    }

    /// A single-agent plan on the best ranked agent not in `used`.
    pub fn fallback_plan(
        &self,
        task: &Task,
        selection: &Selection,
        used: &[String],
        rules: &SelectionRules,
    ) -> Option<ExecutionPlan> {
        let card = selection
            .ranked
            .iter()
            .find(|c| !used.contains(&c.agent_id))?;
        let mut parameters = base_parameters(task);
        parameters["fallback"] = json!(true);
        Some(self.build(
            Strategy::SingleAgent,
            vec![PlannedUnit {
                target: Target::Agent(card.agent_id.clone()),
                parameters,
            }],
            rules,
            selection,
        ))
    }

    /// Give each subtask the co-candidate whose capabilities cover most of the
    /// subtask's domain terms, spreading ties round-robin.
    fn assign_subtasks(
        &self,
        subtasks: &[Subtask],
        selection: &Selection,
        snapshot: &ConfigSnapshot,
        base: &Value,
    ) -> Vec<PlannedUnit> {
        let agents: Vec<&AgentDescriptor> = selection
            .co_candidates
            .iter()
            .filter_map(|id| snapshot.agent(id))
            .collect();

        subtasks
            .iter()
            .enumerate()
            .map(|(idx, subtask)| {
                let fallback = &selection.co_candidates[idx % selection.co_candidates.len()];
                let hits: Vec<(usize, &str)> = agents
                    .iter()
                    .map(|agent| {
                        let keywords = agent.capability_keywords();
                        let hits = subtask
                            .terms
                            .iter()
                            .chain(std::iter::once(&subtask.domain))
                            .filter(|t| keywords.contains(t.as_str()))
                            .count();
                        (hits, agent.id.as_str())
                    })
                    .collect();
                let top = hits.iter().map(|(h, _)| *h).max().unwrap_or(0);
                let tied: Vec<&str> = hits
                    .iter()
                    .filter(|(h, _)| top > 0 && *h == top)
                    .map(|(_, id)| *id)
                    .collect();
                let best = if tied.is_empty() || tied.contains(&fallback.as_str()) {
                    fallback.as_str()
                } else {
                    tied[0]
                };

                let mut parameters = base.clone();
                parameters["subtask"] = json!(subtask.description);
                parameters["domain"] = json!(subtask.domain);
                PlannedUnit {
                    target: Target::Agent(best.to_string()),
                    parameters,
                }
            })
            .collect()
    }

    fn build(
        &self,
        strategy: Strategy,
        units: Vec<PlannedUnit>,
        rules: &SelectionRules,
        selection: &Selection,
    ) -> ExecutionPlan {
        let alternatives = selection
            .ranked
            .iter()
            .map(|c| c.agent_id.clone())
            .filter(|id| !units.iter().any(|u| u.target.agent_id() == Some(id.as_str())))
            .collect();
        ExecutionPlan {
            id: Uuid::new_v4(),
            strategy,
            requires_sync: strategy.is_concurrent(),
            units,
            timeout: rules.sync_timeout(),
            alternatives,
        }
    }
}

impl Default for StrategyPlanner {
    fn default() -> Self {
        Self::new()
    }
}

fn base_parameters(task: &Task) -> Value {
    json!({
        "task_id": task.id.to_string(),
        "task": task.description,
        "context": task.context,
    })
}
