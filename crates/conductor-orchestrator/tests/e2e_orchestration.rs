//! End-to-end orchestration tests.
//!
//! Drives full processing cycles against a scripted invoker. Checks: strategy
//! choice per scenario, clarification and resumption, the synchronization
//! deadline, partial-failure triage, retry backoff, and the feedback loop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use conductor_core::{
    AgentDescriptor, ConductorError, ConductorResult, ConfigSnapshot, FailureKind, Invoker,
    NullSink, SelectionRules, StaticConfig, Target,
};
use conductor_orchestrator::*;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scripted invoker: per-key latency and outcome, consumed one step per call
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
struct Step {
    latency_ms: u64,
    fail: Option<&'static str>,
}

fn ok(latency_ms: u64) -> Step {
    Step {
        latency_ms,
        fail: None,
    }
}

fn fail(message: &'static str) -> Step {
    Step {
        latency_ms: 10,
        fail: Some(message),
    }
}

/// Scripts are keyed by the unit's `domain` parameter when present, else by
/// target id. The last step of a script repeats forever.
#[derive(Default)]
struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    fn new() -> Self {
        Self::default()
    }

    fn script(self, key: &str, steps: Vec<Step>) -> Self {
        self.scripts.lock().insert(key.to_string(), steps);
        self
    }

    fn calls_to(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == key).count()
    }
}

#[async_trait]
impl Invoker for ScriptedInvoker {
    async fn invoke(&self, target: &Target, parameters: &Value) -> ConductorResult<Value> {
        let key = parameters
            .get("domain")
            .and_then(Value::as_str)
            .unwrap_or(target.id())
            .to_string();
        self.calls.lock().push(key.clone());
        let step = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&key) {
                Some(steps) if steps.len() > 1 => steps.remove(0),
                Some(steps) => steps.first().copied().unwrap_or(ok(10)),
                None => ok(10),
            }
        };
        tokio::time::sleep(Duration::from_millis(step.latency_ms)).await;
        match step.fail {
            Some(message) => Err(ConductorError::invocation(message, FailureKind::Other)),
            None => Ok(json!({ "by": target.id(), "key": key })),
        }
    }
}

fn orchestrator(
    agents: Vec<AgentDescriptor>,
    rules: SelectionRules,
    invoker: Arc<ScriptedInvoker>,
) -> Orchestrator {
    let snapshot = ConfigSnapshot {
        agents,
        tools: Vec::new(),
        rules,
    };
    Orchestrator::new(Arc::new(StaticConfig::new(snapshot).unwrap()), invoker)
}

/// Two agents with identical capabilities always tie, forcing a conflict.
fn twin_agents() -> Vec<AgentDescriptor> {
    let capabilities = "backend api frontend ui testing deployment pipeline authentication";
    vec![
        AgentDescriptor::new("alpha", capabilities),
        AgentDescriptor::new("beta", capabilities),
    ]
}

fn completed(result: TaskResult) -> ExecutionReport {
    match result {
        TaskResult::Completed(report) => *report,
        TaskResult::Clarification { questions, .. } => {
            panic!("unexpected clarification: {questions:?}")
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: simple task goes straight to the best agent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn simple_task_runs_on_top_agent() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let orch = orchestrator(
        vec![
            AgentDescriptor::new("auth-backend", "backend api authentication login security"),
            AgentDescriptor::new("ui-designer", "frontend ui css layout design"),
        ],
        SelectionRules::default(),
        invoker.clone(),
    );

    let report = completed(
        orch.process_task("Fix authentication bug in login API", Map::new())
            .await
            .unwrap(),
    );

    assert!(report.succeeded);
    assert_eq!(report.metrics.complexity, ComplexityLevel::LOWEST);
    assert_eq!(report.strategy, Strategy::SingleAgent);
    assert_eq!(report.metrics.candidates[0], "auth-backend");
    assert_eq!(report.outcome.result().unwrap()["by"], "auth-backend");
    assert!(!report.history.contains(&TaskStatus::ClarificationRequested));
    assert_eq!(invoker.calls_to("auth-backend"), 1);
}

// ---------------------------------------------------------------------------
// Scenario 2: complex task with tied candidates is delegated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complex_task_with_conflict_is_delegated() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let orch = orchestrator(twin_agents(), SelectionRules::default(), invoker);

    let report = completed(
        orch.process_task("Design and implement complete authentication system", Map::new())
            .await
            .unwrap(),
    );

    assert!(report.metrics.complexity.value() >= 3);
    assert!(report.metrics.conflict);
    assert!(matches!(
        report.strategy,
        Strategy::SequentialDelegation | Strategy::ParallelDelegation
    ));
    assert!(report.succeeded);
}

// ---------------------------------------------------------------------------
// Scenario 3: ambiguous task asks for clarification, then resumes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ambiguous_task_requests_clarification_and_resumes() {
    let invoker = Arc::new(ScriptedInvoker::new());
    let orch = orchestrator(twin_agents(), SelectionRules::default(), invoker.clone());

    let result = orch
        .process_task("Maybe we could improve the system somehow", Map::new())
        .await
        .unwrap();
    let TaskResult::Clarification {
        task_id,
        questions,
        ambiguity,
    } = result
    else {
        panic!("expected clarification");
    };
    assert!(ambiguity > 0.8);
    assert!(!questions.is_empty());
    assert_eq!(orch.store().read().suspended_count(), 1);
    assert!(invoker.calls.lock().is_empty());

    let mut answers = Map::new();
    answers.insert("scope".into(), json!("the billing service only"));
    answers.insert("goal".into(), json!("halve p99 latency"));
    answers.insert("constraints".into(), json!("no schema changes"));

    let report = completed(orch.resume_task(task_id, answers).await.unwrap());
    assert_eq!(report.task_id, task_id);
    assert!(report.succeeded);
    assert_eq!(orch.store().read().suspended_count(), 0);

    let asked = report
        .history
        .iter()
        .position(|s| *s == TaskStatus::ClarificationRequested)
        .unwrap();
    assert_eq!(report.history[asked + 1], TaskStatus::Analyzed);
    assert_eq!(report.history.last(), Some(&TaskStatus::Completed));

    // A task can only be resumed once.
    assert!(orch.resume_task(task_id, Map::new()).await.is_err());
}

#[tokio::test]
async fn resuming_unknown_task_fails() {
    let orch = orchestrator(
        twin_agents(),
        SelectionRules::default(),
        Arc::new(ScriptedInvoker::new()),
    );
    assert!(orch.resume_task(Uuid::new_v4(), Map::new()).await.is_err());
}

// ---------------------------------------------------------------------------
// Scenario 4: 4 parallel units, 1 misses the deadline -> partial success
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn parallel_plan_with_one_timeout_is_partial_success() {
    let invoker = Arc::new(ScriptedInvoker::new().script("deployment", vec![ok(10_000)]));
    let rules = SelectionRules {
        sync_timeout_secs: 2,
        ..Default::default()
    };
    let orch = orchestrator(twin_agents(), rules, invoker);

    let report = completed(
        orch.process_task(
            "Build the backend API, frontend UI, testing suite and deployment pipeline",
            Map::new(),
        )
        .await
        .unwrap(),
    );

    assert_eq!(report.strategy, Strategy::ParallelDelegation);
    assert!(report.succeeded);
    match &report.outcome {
        ExecutionOutcome::PartialSuccess {
            result,
            results,
            failed,
            ..
        } => {
            assert_eq!(results.len(), 3);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].status, UnitStatus::TimedOut);
            assert_eq!(failed[0].parameters["domain"], "deployment");
            let error = failed[0].error.as_ref().unwrap();
            assert_eq!(error.category, ErrorCategory::TimeoutError);
            assert_eq!(error.unit, Some(failed[0].id));

            // The late unit never contributes to the synthesized result.
            let delivered: Vec<&Value> = result["results"]
                .as_array()
                .unwrap()
                .iter()
                .map(|r| &r["domain"])
                .collect();
            assert_eq!(delivered, vec!["backend", "frontend", "testing"]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(orch.monitor().health().errors_by_category["timeout_error"], 1);
}

// ---------------------------------------------------------------------------
// Triage: failures outnumber successes -> re-run exactly the failed units
// ---------------------------------------------------------------------------

fn parallel_plan(agents: &[&str], timeout: Duration) -> ExecutionPlan {
    ExecutionPlan {
        id: Uuid::new_v4(),
        strategy: Strategy::ParallelDelegation,
        units: agents
            .iter()
            .map(|a| PlannedUnit {
                target: Target::Agent((*a).to_string()),
                parameters: json!({ "task": "t" }),
            })
            .collect(),
        requires_sync: true,
        timeout,
        alternatives: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn minority_success_reexecutes_only_failed_units() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .script("a", vec![fail("a reported a bad value"), ok(10)])
            .script("b", vec![fail("b reported a bad value"), ok(10)]),
    );
    let coordinator = ExecutionCoordinator::new(invoker.clone(), Arc::new(NullSink));
    let recovery = RecoveryEngine::new(RecoveryPolicy::default());
    let task = Task::new("t", Map::new());

    let outcome = coordinator
        .execute(
            &parallel_plan(&["a", "b", "c"], Duration::from_secs(5)),
            &task,
            &recovery,
        )
        .await;

    assert_eq!(invoker.calls_to("a"), 2);
    assert_eq!(invoker.calls_to("b"), 2);
    assert_eq!(invoker.calls_to("c"), 1);
    match outcome {
        ExecutionOutcome::Success { units, result, .. } => {
            assert!(units.iter().all(|u| u.status == UnitStatus::Succeeded));
            assert_eq!(result["completed"], 3);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn majority_success_does_not_reexecute() {
    let invoker = Arc::new(
        ScriptedInvoker::new().script("a", vec![fail("a reported a bad value"), ok(10)]),
    );
    let coordinator = ExecutionCoordinator::new(invoker.clone(), Arc::new(NullSink));
    let recovery = RecoveryEngine::new(RecoveryPolicy::default());
    let task = Task::new("t", Map::new());

    let outcome = coordinator
        .execute(
            &parallel_plan(&["a", "b", "c"], Duration::from_secs(5)),
            &task,
            &recovery,
        )
        .await;

    assert_eq!(invoker.calls_to("a"), 1);
    match outcome {
        ExecutionOutcome::PartialSuccess { results, failed, .. } => {
            assert_eq!(results.len(), 2);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].id, 0);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn all_units_failing_is_terminal_failure() {
    let invoker = Arc::new(
        ScriptedInvoker::new()
            .script("a", vec![fail("a reported a bad value")])
            .script("b", vec![fail("b reported a bad value")]),
    );
    let coordinator = ExecutionCoordinator::new(invoker, Arc::new(NullSink));
    let recovery = RecoveryEngine::new(RecoveryPolicy::default());
    let task = Task::new("t", Map::new());

    let outcome = coordinator
        .execute(&parallel_plan(&["a", "b"], Duration::from_secs(5)), &task, &recovery)
        .await;

    match outcome {
        ExecutionOutcome::Failure(failure) => {
            assert_eq!(failure.failed_units.len(), 2);
            assert_eq!(failure.error.category, ErrorCategory::UnknownError);
            assert_eq!(
                failure.exhausted,
                vec![
                    RecoveryStrategy::GenericRetry,
                    RecoveryStrategy::GracefulDegradation
                ]
            );
        }
        other => panic!("unexpected outcome {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Retry with backoff: 1s, 2s, 4s, stopping at the first success
// ---------------------------------------------------------------------------

fn single_plan(agent: &str) -> ExecutionPlan {
    ExecutionPlan {
        strategy: Strategy::SingleAgent,
        requires_sync: false,
        ..parallel_plan(&[agent], Duration::from_secs(30))
    }
}

fn backoff_policy() -> RecoveryPolicy {
    RecoveryPolicy {
        max_retries: 3,
        backoff_base_ms: 1000,
        backoff_max_ms: 30_000,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn network_failure_backs_off_exponentially() {
    let refused = "connection refused by upstream";
    let invoker = Arc::new(
        ScriptedInvoker::new().script("net", vec![fail(refused), fail(refused), fail(refused), ok(10)]),
    );
    let coordinator = ExecutionCoordinator::new(invoker.clone(), Arc::new(NullSink));
    let recovery = RecoveryEngine::new(backoff_policy());
    let task = Task::new("t", Map::new());

    let outcome = coordinator.execute(&single_plan("net"), &task, &recovery).await;

    let ExecutionOutcome::Success { units, .. } = outcome else {
        panic!("expected recovery");
    };
    let report = units[0].recovery.as_ref().unwrap();
    assert_eq!(report.strategy, Some(RecoveryStrategy::RetryWithBackoff));
    assert_eq!(report.delays_ms, vec![1000, 2000, 4000]);
    assert_eq!(invoker.calls_to("net"), 4);
}

#[tokio::test(start_paused = true)]
async fn backoff_stops_at_first_success() {
    let invoker = Arc::new(
        ScriptedInvoker::new().script("net", vec![fail("network unreachable"), ok(10)]),
    );
    let coordinator = ExecutionCoordinator::new(invoker.clone(), Arc::new(NullSink));
    let recovery = RecoveryEngine::new(backoff_policy());
    let task = Task::new("t", Map::new());

    let outcome = coordinator.execute(&single_plan("net"), &task, &recovery).await;

    let ExecutionOutcome::Success { units, .. } = outcome else {
        panic!("expected recovery");
    };
    assert_eq!(units[0].recovery.as_ref().unwrap().delays_ms, vec![1000]);
    assert_eq!(invoker.calls_to("net"), 2);
}

// ---------------------------------------------------------------------------
// Feedback loop: outcomes change later scoring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outcomes_feed_performance_records() {
    let invoker = Arc::new(ScriptedInvoker::new().script("alpha", vec![ok(40)]));
    let orch = orchestrator(twin_agents(), SelectionRules::default(), invoker);

    for _ in 0..3 {
        completed(
            orch.process_task("Fix the login API", Map::new())
                .await
                .unwrap(),
        );
    }

    let alpha = orch.monitor().get("alpha").unwrap();
    assert_eq!(alpha.invocations, 3);
    assert_eq!(alpha.success_rate(), Some(1.0));

    let health = orch.monitor().health();
    assert_eq!(health.tasks, 3);
    assert_eq!(health.succeeded, 3);
    assert_eq!(health.agents, 2);

    // Alpha now has a track record; beta is still neutral, so alpha stays on top.
    let preview = orch.preview("Fix the login API", Map::new()).unwrap();
    assert_eq!(preview.selection.top().unwrap().agent_id, "alpha");
    assert!(preview.scores["alpha"].performance > preview.scores["beta"].performance);
}
