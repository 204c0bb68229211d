use crate::analyzer::{Analysis, ComplexityAnalyzer};
use crate::coordinator::ExecutionCoordinator;
use crate::monitor::PerformanceMonitor;
use crate::planner::{Decision, StrategyPlanner};
use crate::quality::QualityScorer;
use crate::recovery::{RecoveryEngine, RecoveryPolicy};
use crate::relevance::{RelevanceScorer, TfIdfScorer};
use crate::scorer::{AgentScorer, ScoreCard};
use crate::selection::{Selection, SelectionResolver};
use crate::task_store::TaskStore;
use crate::types::{
    CycleMetrics, ExecutionOutcome, ExecutionPlan, ExecutionReport, Task, TaskResult, TaskStatus,
};
use conductor_core::{ConductorError, ConductorResult, ConfigSnapshot, ConfigSource, Invoker};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything decided about a task before execution.
struct Assessment {
    analysis: Analysis,
    cards: BTreeMap<String, ScoreCard>,
    selection: Selection,
}

/// A dry run of the decision pipeline: nothing is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPreview {
    /// Complexity, ambiguity, and extracted requirements.
    pub analysis: Analysis,
    /// Score card per agent id.
    pub scores: BTreeMap<String, ScoreCard>,
    /// Ranked candidates and conflict flag.
    pub selection: Selection,
    /// `None` when the task would be sent back for clarification.
    pub plan: Option<ExecutionPlan>,
    /// Clarification questions, empty when the task would run.
    pub questions: Vec<String>,
}

/// The task orchestrator.
/// Implements the analyze → select → plan → execute pattern, one
/// configuration snapshot per cycle.
pub struct Orchestrator {
    config: Arc<dyn ConfigSource>,
    analyzer: ComplexityAnalyzer,
    scorer: AgentScorer,
    planner: StrategyPlanner,
    coordinator: ExecutionCoordinator,
    monitor: Arc<PerformanceMonitor>,
    store: Arc<RwLock<TaskStore>>,
}

impl Orchestrator {
    /// Create an orchestrator with the vector-space relevance scorer and the
    /// default quality heuristic.
    pub fn new(config: Arc<dyn ConfigSource>, invoker: Arc<dyn Invoker>) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new());
        let coordinator = ExecutionCoordinator::new(invoker, monitor.clone());
        Self {
            config,
            analyzer: ComplexityAnalyzer::new(),
            scorer: AgentScorer::new(Arc::new(TfIdfScorer::new())),
            planner: StrategyPlanner::new(),
            coordinator,
            monitor,
            store: Arc::new(RwLock::new(TaskStore::new())),
        }
    }

    /// Swap the relevance scorer used for semantic scoring.
    pub fn with_relevance(mut self, relevance: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = AgentScorer::new(relevance);
        self
    }

    /// Swap the quality function used to pick competitive results.
    pub fn with_quality(mut self, quality: Arc<dyn QualityScorer>) -> Self {
        self.coordinator = self.coordinator.with_quality(quality);
        self
    }

    /// Get a reference to the feedback loop.
    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Get a reference to the task store.
    pub fn store(&self) -> &Arc<RwLock<TaskStore>> {
        &self.store
    }

    /// Run one full processing cycle for a new task.
    pub async fn process_task(
        &self,
        description: &str,
        context: Map<String, Value>,
    ) -> ConductorResult<TaskResult> {
        let task = Task::new(description, context);
        info!(task_id = %task.id, "Orchestrator: received task");
        self.run_cycle(task).await
    }

    /// Resume a task suspended for clarification. `answers` are merged into
    /// the task context under `clarifications`.
    pub async fn resume_task(
        &self,
        task_id: Uuid,
        answers: Map<String, Value>,
    ) -> ConductorResult<TaskResult> {
        let mut task = self.store.write().take_suspended(task_id).ok_or_else(|| {
            ConductorError::Orchestrator(format!("no task {task_id} awaiting clarification"))
        })?;

        let clarifications = task
            .context
            .entry("clarifications")
            .or_insert_with(|| Value::Object(Map::new()));
        match clarifications {
            Value::Object(existing) => existing.extend(answers),
            other => *other = Value::Object(answers),
        }
        info!(task_id = %task.id, "Orchestrator: resuming task with clarifications");
        self.run_cycle(task).await
    }

    /// Analyze, score, select and plan without invoking anything.
    pub fn preview(
        &self,
        description: &str,
        context: Map<String, Value>,
    ) -> ConductorResult<PlanPreview> {
        let task = Task::new(description, context);
        let snapshot = self.config.snapshot();
        let assessment = self.assess(&task, &snapshot);
        let decision =
            self.planner
                .plan(&task, &assessment.analysis, &assessment.selection, &snapshot)?;
        let (plan, questions) = match decision {
            Decision::Clarify => (
                None,
                self.analyzer.clarification_questions(&assessment.analysis),
            ),
            Decision::Execute(plan) => (Some(plan), Vec::new()),
        };
        Ok(PlanPreview {
            analysis: assessment.analysis,
            scores: assessment.cards,
            selection: assessment.selection,
            plan,
            questions,
        })
    }

    fn assess(&self, task: &Task, snapshot: &ConfigSnapshot) -> Assessment {
        let analysis = self.analyzer.analyze(&task.description, &task.context);
        let weights = self.planner.scoring_weights(&analysis, &snapshot.rules);
        let cards = self.scorer.score(
            &task.description,
            &analysis.requirements,
            &snapshot.agents,
            &self.monitor.snapshot(),
            weights,
        );
        for card in cards.values() {
            debug!(
                task_id = %task.id,
                agent = %card.agent_id,
                semantic = card.semantic,
                capability = card.capability,
                performance = card.performance,
                combined = card.combined,
                "Scored agent"
            );
        }
        let selection =
            SelectionResolver::new(snapshot.rules.conflict_margin, snapshot.rules.top_k)
                .resolve(&cards);
        Assessment {
            analysis,
            cards,
            selection,
        }
    }

    async fn run_cycle(&self, mut task: Task) -> ConductorResult<TaskResult> {
        let start = Instant::now();
        let snapshot = self.config.snapshot();
        self.monitor.register_agents(&snapshot.agents);

        // Phase 1: analyze and select
        let assessment = self.assess(&task, &snapshot);
        let analysis = &assessment.analysis;
        let selection = &assessment.selection;
        task.complexity = Some(analysis.complexity);
        task.ambiguity = Some(analysis.ambiguity);
        task.transition(TaskStatus::Analyzed)?;
        info!(
            task_id = %task.id,
            complexity = analysis.complexity.value(),
            ambiguity = analysis.ambiguity,
            candidates = ?selection.agent_ids(),
            conflict = selection.conflict,
            "Orchestrator: task analyzed"
        );

        // Phase 2: plan
        let decision = match self.planner.plan(&task, analysis, selection, &snapshot) {
            Ok(decision) => decision,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Orchestrator: planning failed");
                self.monitor.record_task(false, start.elapsed());
                self.store.write().mark_finished(&task, false);
                return Err(e);
            }
        };

        let mut plan = match decision {
            Decision::Clarify => {
                task.transition(TaskStatus::ClarificationRequested)?;
                let questions = self.analyzer.clarification_questions(analysis);
                let ambiguity = analysis.ambiguity;
                let task_id = self.store.write().suspend(task);
                info!(
                    task_id = %task_id,
                    questions = questions.len(),
                    "Orchestrator: clarification requested"
                );
                return Ok(TaskResult::Clarification {
                    task_id,
                    questions,
                    ambiguity,
                });
            }
            Decision::Execute(plan) => plan,
        };
        task.transition(TaskStatus::Planned)?;
        info!(
            task_id = %task.id,
            strategy = %plan.strategy,
            units = plan.units.len(),
            "Orchestrator: plan ready"
        );

        // Phase 3: execute, replanning on terminal failure while the budget allows
        let recovery = RecoveryEngine::new(RecoveryPolicy::from_rules(&snapshot.rules));
        let mut used: Vec<String> = plan.agents().into_iter().map(str::to_string).collect();
        let mut replans = 0;
        let mut units = plan.units.len();
        task.transition(TaskStatus::Executing)?;

        let outcome = loop {
            let outcome = self.coordinator.execute(&plan, &task, &recovery).await;
            for error in outcome.unit_errors() {
                self.monitor.record_error(error.category);
            }

            let retryable = match &outcome {
                ExecutionOutcome::Failure(failure) if failure.error.recoverable => {
                    Some(failure.error.category)
                }
                _ => None,
            };
            let Some(category) = retryable else {
                break outcome;
            };
            if replans >= snapshot.rules.max_replans {
                break outcome;
            }
            let Some(fallback) =
                self.planner
                    .fallback_plan(&task, selection, &used, &snapshot.rules)
            else {
                warn!(task_id = %task.id, "Orchestrator: no unused candidate left to replan with");
                break outcome;
            };

            replans += 1;
            warn!(
                task_id = %task.id,
                category = %category,
                replan = replans,
                agents = ?fallback.agents(),
                "Orchestrator: terminal failure, replanning"
            );
            task.transition(TaskStatus::Recovering)?;
            task.transition(TaskStatus::Executing)?;
            used.extend(fallback.agents().into_iter().map(str::to_string));
            units += fallback.units.len();
            plan = fallback;
        };

        // Phase 4: close out
        let succeeded = !outcome.is_failure();
        if succeeded {
            task.transition(TaskStatus::Succeeded)?;
        } else {
            task.transition(TaskStatus::Failed)?;
        }
        task.transition(TaskStatus::Completed)?;

        let duration = start.elapsed();
        self.monitor.record_task(succeeded, duration);
        self.store.write().mark_finished(&task, succeeded);

        if succeeded {
            info!(
                task_id = %task.id,
                strategy = %plan.strategy,
                duration_ms = duration.as_millis() as u64,
                "Orchestrator: task completed"
            );
        } else {
            error!(
                task_id = %task.id,
                strategy = %plan.strategy,
                duration_ms = duration.as_millis() as u64,
                "Orchestrator: task failed"
            );
        }

        Ok(TaskResult::Completed(Box::new(ExecutionReport {
            task_id: task.id,
            status: task.status,
            succeeded,
            strategy: plan.strategy,
            outcome,
            metrics: CycleMetrics {
                complexity: analysis.complexity,
                ambiguity: analysis.ambiguity,
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                units,
                replans,
                candidates: selection.agent_ids().into_iter().map(str::to_string).collect(),
                conflict: selection.conflict,
            },
            history: task.history.clone(),
        })))
    }
}
