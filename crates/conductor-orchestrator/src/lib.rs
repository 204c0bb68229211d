//! Task analysis, agent selection, concurrent execution, and failure recovery.
//!
//! Every task passes through one processing cycle: the description is scored
//! for complexity and ambiguity, each registered agent gets a score card, the
//! resolver picks the final candidates, the planner chooses an execution
//! strategy, and the coordinator runs the plan, classifying and recovering
//! from failures along the way. Outcomes feed back into the per-agent
//! performance records used by later cycles.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Entry point with `process_task` and `resume_task`.
//! - [`ComplexityAnalyzer`]: Lexical complexity and ambiguity scoring.
//! - [`AgentScorer`]: Blends semantic, capability, and performance scores.
//! - [`SelectionResolver`]: Ranks score cards and detects conflicts.
//! - [`StrategyPlanner`]: Maps an analysis and a selection to a plan.
//! - [`ExecutionCoordinator`]: Runs plans under explicit deadlines.
//! - [`ErrorClassifier`] / [`RecoveryEngine`]: Failure taxonomy and recovery strategies.
//! - [`PerformanceMonitor`]: The feedback loop.

/// Complexity tiers, ambiguity, and task types.
pub mod analyzer;
/// Error categories, severities, and the classifier.
pub mod classify;
/// Plan execution and partial-failure triage.
pub mod coordinator;
/// The orchestrator facade.
pub mod engine;
/// Per-agent performance records and health summary.
pub mod monitor;
/// Strategy selection and plan construction.
pub mod planner;
/// Quality scoring for competitive results.
pub mod quality;
/// Recovery strategies and the recovery engine.
pub mod recovery;
/// Pluggable relevance scorers.
pub mod relevance;
/// Ordered keyword rule tables.
pub mod rules;
/// Agent score cards.
pub mod scorer;
/// Candidate ranking and conflict detection.
pub mod selection;
/// Suspended and finished tasks.
pub mod task_store;
/// Shared task, plan, and outcome types.
pub mod types;

pub use analyzer::{Analysis, AmbiguityFamily, ComplexityAnalyzer, ComplexityLevel, TaskType};
pub use classify::{ClassifiedError, ErrorCategory, ErrorClassifier, Severity};
pub use coordinator::ExecutionCoordinator;
pub use engine::{Orchestrator, PlanPreview};
pub use monitor::{HealthStatus, HealthSummary, PerformanceMonitor};
pub use planner::{Decision, StrategyPlanner, Subtask};
pub use quality::{selection_confidence, HeuristicQuality, QualityScorer};
pub use recovery::{
    strategies_for, Adjustment, RecoveryEngine, RecoveryPolicy, RecoveryReport, RecoveryStrategy,
    RecoveryTarget,
};
pub use relevance::{KeywordOverlapScorer, RelevanceScorer, TfIdfScorer};
pub use rules::{Rule, RuleTable, TermPattern};
pub use scorer::{AgentScorer, ScoreCard};
pub use selection::{Selection, SelectionResolver};
pub use task_store::{TaskStore, TaskSummary};
pub use types::{
    CompetitionReport, CycleMetrics, ExecutionOutcome, ExecutionPlan, ExecutionReport,
    ExecutionUnit, PlannedUnit, Strategy, Task, TaskResult, TaskStatus, TerminalFailure,
    UnitStatus,
};
