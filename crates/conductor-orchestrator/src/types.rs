use crate::analyzer::ComplexityLevel;
use crate::classify::ClassifiedError;
use crate::recovery::{RecoveryReport, RecoveryStrategy};
use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, Target};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a task inside one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Received,
    Analyzed,
    ClarificationRequested,
    Planned,
    Executing,
    Succeeded,
    Recovering,
    Failed,
    Completed,
}

impl TaskStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Received, Analyzed)
                | (Analyzed, ClarificationRequested)
                | (Analyzed, Planned)
                | (ClarificationRequested, Analyzed)
                | (Planned, Executing)
                | (Executing, Succeeded)
                | (Executing, Recovering)
                | (Executing, Failed)
                | (Recovering, Executing)
                | (Recovering, Failed)
                | (Succeeded, Completed)
                | (Failed, Completed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Received => "received",
            TaskStatus::Analyzed => "analyzed",
            TaskStatus::ClarificationRequested => "clarification_requested",
            TaskStatus::Planned => "planned",
            TaskStatus::Executing => "executing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Recovering => "recovering",
            TaskStatus::Failed => "failed",
            TaskStatus::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

/// A unit of work described in natural language plus free-form context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: Uuid,
    /// Natural-language description.
    pub description: String,
    /// Free-form context, including clarification answers.
    pub context: Map<String, Value>,
    /// Set once the task has been analyzed.
    pub complexity: Option<ComplexityLevel>,
    /// Set once the task has been analyzed.
    pub ambiguity: Option<f64>,
    /// Current status.
    pub status: TaskStatus,
    /// Every status the task has passed through, oldest first.
    pub history: Vec<TaskStatus>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task.
    pub fn new(description: impl Into<String>, context: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            context,
            complexity: None,
            ambiguity: None,
            status: TaskStatus::Received,
            history: vec![TaskStatus::Received],
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: TaskStatus) -> ConductorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ConductorError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.history.push(next);
        Ok(())
    }
}

/// How a task is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ask the caller for more information first.
    Clarification,
    /// Invoke a tool directly, no agent involved.
    DirectTool,
    /// Delegate to the top candidate.
    SingleAgent,
    /// Run stages one after another, feeding results forward.
    SequentialDelegation,
    /// Run independent sub-parts concurrently.
    ParallelDelegation,
    /// Let several agents solve the whole task and keep the best result.
    CompetitiveDelegation,
}

impl Strategy {
    /// Whether units run concurrently under a synchronization deadline.
    pub fn is_concurrent(self) -> bool {
        matches!(
            self,
            Strategy::ParallelDelegation | Strategy::CompetitiveDelegation
        )
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Strategy::Clarification => "clarification",
            Strategy::DirectTool => "direct_tool",
            Strategy::SingleAgent => "single_agent",
            Strategy::SequentialDelegation => "sequential_delegation",
            Strategy::ParallelDelegation => "parallel_delegation",
            Strategy::CompetitiveDelegation => "competitive_delegation",
        };
        write!(f, "{name}")
    }
}

/// One (target, parameters) entry of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedUnit {
    /// Agent or tool to invoke.
    pub target: Target,
    /// Invocation parameters.
    pub parameters: Value,
}

/// What the coordinator should run. Discarded after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan ID.
    pub id: Uuid,
    /// Strategy this plan implements.
    pub strategy: Strategy,
    /// Ordered for sequential delegation, unordered otherwise.
    pub units: Vec<PlannedUnit>,
    /// Whether the coordinator waits at a synchronization barrier.
    pub requires_sync: bool,
    /// Synchronization deadline for concurrent plans, per-unit budget otherwise.
    pub timeout: Duration,
    /// Agents that may stand in for failed units, best first.
    pub alternatives: Vec<String>,
}

impl ExecutionPlan {
    /// Agent ids used by this plan.
    pub fn agents(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter_map(|u| u.target.agent_id())
            .collect()
    }
}

/// Status of one execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// One launched piece of work and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    /// Index within the plan.
    pub id: usize,
    /// Agent or tool invoked.
    pub target: Target,
    /// Parameters of the last invocation.
    pub parameters: Value,
    /// Current status.
    pub status: UnitStatus,
    /// Result value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Classified error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
    /// Latency of the last invocation.
    pub latency_ms: u64,
    /// Recovery trail, when recovery was attempted for this unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoveryReport>,
}

impl ExecutionUnit {
    /// A not-yet-started unit.
    pub fn pending(id: usize, planned: &PlannedUnit) -> Self {
        Self {
            id,
            target: planned.target.clone(),
            parameters: planned.parameters.clone(),
            status: UnitStatus::Pending,
            result: None,
            error: None,
            latency_ms: 0,
            recovery: None,
        }
    }

    /// Whether the unit succeeded.
    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Succeeded
    }
}

/// Which competitive result won and how sure the coordinator is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionReport {
    /// Unit id of the selected result.
    pub winner: usize,
    /// Quality score per successful unit id.
    pub quality: Vec<(usize, f64)>,
    /// Selection confidence in `[0.5, 1]`, 0 with no results.
    pub confidence: f64,
}

/// A failure that exhausted every recovery path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalFailure {
    /// The error that ended execution.
    pub error: ClassifiedError,
    /// Every strategy that was tried.
    pub exhausted: Vec<RecoveryStrategy>,
    /// Units that failed, in unit order.
    pub failed_units: Vec<ExecutionUnit>,
}

/// Result of executing one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Every unit succeeded.
    Success {
        /// Delivered result.
        result: Value,
        /// All units.
        units: Vec<ExecutionUnit>,
        /// Set for competitive plans.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        competition: Option<CompetitionReport>,
    },
    /// Some units failed but successes were not outnumbered.
    PartialSuccess {
        /// Synthesized or selected result.
        result: Value,
        /// Units that succeeded.
        results: Vec<ExecutionUnit>,
        /// Units that failed or timed out.
        failed: Vec<ExecutionUnit>,
        /// Set for competitive plans.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        competition: Option<CompetitionReport>,
    },
    /// Recovery was exhausted.
    Failure(TerminalFailure),
}

impl ExecutionOutcome {
    /// Whether execution ended in a terminal failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failure(_))
    }

    /// The delivered result, if any.
    pub fn result(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Success { result, .. }
            | ExecutionOutcome::PartialSuccess { result, .. } => Some(result),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    /// The classified errors of every failed unit, in unit order.
    pub fn unit_errors(&self) -> Vec<&ClassifiedError> {
        match self {
            ExecutionOutcome::Success { .. } => Vec::new(),
            ExecutionOutcome::PartialSuccess { failed, .. } => {
                failed.iter().filter_map(|u| u.error.as_ref()).collect()
            }
            ExecutionOutcome::Failure(f) => {
                let mut errors: Vec<&ClassifiedError> =
                    f.failed_units.iter().filter_map(|u| u.error.as_ref()).collect();
                if errors.is_empty() {
                    errors.push(&f.error);
                }
                errors
            }
        }
    }
}

/// Summary metrics of one processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Analyzed complexity.
    pub complexity: ComplexityLevel,
    /// Analyzed ambiguity.
    pub ambiguity: f64,
    /// Wall-clock duration of the cycle.
    pub duration_ms: u64,
    /// Units in the final plan.
    pub units: usize,
    /// Fallback plans built after terminal failures.
    pub replans: u32,
    /// Agents considered by the selection resolver, best first.
    pub candidates: Vec<String>,
    /// Whether the resolver flagged a conflict.
    pub conflict: bool,
}

/// The completed-execution report returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Task ID.
    pub task_id: Uuid,
    /// `Completed`, reached through success or failure.
    pub status: TaskStatus,
    /// Whether a result was delivered.
    pub succeeded: bool,
    /// Strategy of the final plan.
    pub strategy: Strategy,
    /// Outcome of the final plan.
    pub outcome: ExecutionOutcome,
    /// Cycle metrics.
    pub metrics: CycleMetrics,
    /// Every status the task passed through.
    pub history: Vec<TaskStatus>,
}

/// What `process_task` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskResult {
    /// The task is suspended until the caller answers these questions.
    Clarification {
        /// Suspended task ID, for resumption.
        task_id: Uuid,
        /// Questions for the caller.
        questions: Vec<String>,
        /// Ambiguity that triggered clarification.
        ambiguity: f64,
    },
    /// The cycle ran to completion.
    Completed(Box<ExecutionReport>),
}

impl TaskResult {
    /// ID of the task this result belongs to.
    pub fn task_id(&self) -> Uuid {
        match self {
            TaskResult::Clarification { task_id, .. } => *task_id,
            TaskResult::Completed(report) => report.task_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::new("Fix bug", Map::new());
        for next in [
            TaskStatus::Analyzed,
            TaskStatus::Planned,
            TaskStatus::Executing,
            TaskStatus::Succeeded,
            TaskStatus::Completed,
        ] {
            task.transition(next).unwrap();
        }
        assert_eq!(task.history.len(), 6);
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_recovery_loop_and_clarification_resume() {
        let mut task = Task::new("Build it", Map::new());
        task.transition(TaskStatus::Analyzed).unwrap();
        task.transition(TaskStatus::ClarificationRequested).unwrap();
        task.transition(TaskStatus::Analyzed).unwrap();
        task.transition(TaskStatus::Planned).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Recovering).unwrap();
        task.transition(TaskStatus::Executing).unwrap();
        task.transition(TaskStatus::Failed).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut task = Task::new("Fix bug", Map::new());
        let err = task.transition(TaskStatus::Executing).unwrap_err();
        assert_eq!(err.to_string(), "Invalid transition: received -> executing");
        assert_eq!(task.status, TaskStatus::Received);
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Executing));
    }

    #[test]
    fn test_task_result_serializes_tagged() {
        let result = TaskResult::Clarification {
            task_id: Uuid::nil(),
            questions: vec!["What?".into()],
            ambiguity: 0.9,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "clarification");
        assert_eq!(json["questions"][0], "What?");
    }
}
