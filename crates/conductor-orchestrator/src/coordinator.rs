use crate::classify::ErrorClassifier;
use crate::quality::{selection_confidence, HeuristicQuality, QualityScorer};
use crate::recovery::{Adjustment, RecoveryEngine, RecoveryStrategy, RecoveryTarget};
use crate::types::{
    CompetitionReport, ExecutionOutcome, ExecutionPlan, ExecutionUnit, Strategy, Task,
    TerminalFailure, UnitStatus,
};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, FailureKind, Invoker, OutcomeSink, Target};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id as TaskId, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};

type Slot = Option<(ConductorResult<Value>, Duration)>;

/// Executes plans against the invoker, enforcing deadlines and triaging failures.
pub struct ExecutionCoordinator {
    invoker: Arc<dyn Invoker>,
    sink: Arc<dyn OutcomeSink>,
    classifier: Arc<ErrorClassifier>,
    quality: Arc<dyn QualityScorer>,
}

impl ExecutionCoordinator {
    /// Create a coordinator reporting agent outcomes to `sink`.
    pub fn new(invoker: Arc<dyn Invoker>, sink: Arc<dyn OutcomeSink>) -> Self {
        Self {
            invoker,
            sink,
            classifier: Arc::new(ErrorClassifier::new()),
            quality: Arc::new(HeuristicQuality),
        }
    }

    /// Replace the competitive quality function.
    pub fn with_quality(mut self, quality: Arc<dyn QualityScorer>) -> Self {
        self.quality = quality;
        self
    }

    /// Execute one plan to completion.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        task: &Task,
        recovery: &RecoveryEngine,
    ) -> ExecutionOutcome {
        info!(
            task_id = %task.id,
            plan_id = %plan.id,
            strategy = %plan.strategy,
            units = plan.units.len(),
            timeout_ms = plan.timeout.as_millis() as u64,
            "Executing plan"
        );

        if plan.units.is_empty() {
            return self.unexecutable(plan, task, "plan has no units");
        }

        match plan.strategy {
            Strategy::Clarification => self.unexecutable(plan, task, "clarification is not executable"),
            Strategy::DirectTool | Strategy::SingleAgent => self.run_single(plan, task, recovery).await,
            Strategy::SequentialDelegation => self.run_sequential(plan, task, recovery).await,
            Strategy::ParallelDelegation | Strategy::CompetitiveDelegation => {
                self.run_concurrent(plan, task, recovery).await
            }
        }
    }

    async fn run_single(
        &self,
        plan: &ExecutionPlan,
        task: &Task,
        recovery: &RecoveryEngine,
    ) -> ExecutionOutcome {
        let mut unit = ExecutionUnit::pending(0, &plan.units[0]);
        self.run_unit(&mut unit, plan, task, recovery).await;
        if unit.is_success() {
            ExecutionOutcome::Success {
                result: unit.result.clone().unwrap_or(Value::Null),
                units: vec![unit],
                competition: None,
            }
        } else {
            terminal(vec![unit])
        }
    }

    /// Units run strictly in order; each result is passed to the next unit
    /// as `previous`. A unit that fails even after recovery aborts the plan.
    async fn run_sequential(
        &self,
        plan: &ExecutionPlan,
        task: &Task,
        recovery: &RecoveryEngine,
    ) -> ExecutionOutcome {
        let mut units = Vec::with_capacity(plan.units.len());
        let mut previous: Option<Value> = None;

        for (idx, planned) in plan.units.iter().enumerate() {
            let mut unit = ExecutionUnit::pending(idx, planned);
            if let (Some(prev), Value::Object(params)) = (&previous, &mut unit.parameters) {
                params.insert("previous".into(), prev.clone());
            }
            self.run_unit(&mut unit, plan, task, recovery).await;

            if !unit.is_success() {
                error!(
                    task_id = %task.id,
                    unit = idx,
                    target = %unit.target,
                    "Sequential stage failed, aborting plan"
                );
                return terminal(vec![unit]);
            }
            info!(task_id = %task.id, unit = idx, target = %unit.target, "Stage complete");
            previous = unit.result.clone();
            units.push(unit);
        }

        ExecutionOutcome::Success {
            result: previous.unwrap_or(Value::Null),
            units,
            competition: None,
        }
    }

    /// Launch every unit at once under a shared deadline, then triage:
    /// successes >= failures delivers what succeeded, otherwise the failed
    /// units are re-executed one by one.
    async fn run_concurrent(
        &self,
        plan: &ExecutionPlan,
        task: &Task,
        recovery: &RecoveryEngine,
    ) -> ExecutionOutcome {
        let mut units = self.launch(plan, task).await;

        let succeeded = units.iter().filter(|u| u.is_success()).count();
        let failed = units.len() - succeeded;
        info!(task_id = %task.id, succeeded, failed, "Synchronization barrier reached");

        if succeeded < failed {
            warn!(
                task_id = %task.id,
                failed,
                "Failures outnumber successes, re-executing failed units sequentially"
            );
            for unit in units.iter_mut().filter(|u| !u.is_success()) {
                self.run_unit(unit, plan, task, recovery).await;
            }
        }

        let (successes, failures): (Vec<ExecutionUnit>, Vec<ExecutionUnit>) =
            units.iter().cloned().partition(ExecutionUnit::is_success);

        if successes.is_empty() || successes.len() < failures.len() {
            error!(
                task_id = %task.id,
                succeeded = successes.len(),
                failed = failures.len(),
                "Concurrent plan failed"
            );
            return terminal(failures);
        }

        let (result, competition) = if plan.strategy == Strategy::CompetitiveDelegation {
            let (value, report) = self.select_best(&successes, task);
            info!(
                task_id = %task.id,
                winner = report.winner,
                confidence = report.confidence,
                "Competitive result selected"
            );
            (value, Some(report))
        } else {
            (synthesize(&successes, failures.len()), None)
        };

        if failures.is_empty() {
            ExecutionOutcome::Success {
                result,
                units,
                competition,
            }
        } else {
            ExecutionOutcome::PartialSuccess {
                result,
                results: successes,
                failed: failures,
                competition,
            }
        }
    }

    /// Spawn one worker per unit and collect what finishes before the deadline.
    /// Workers still running at the deadline are aborted and their units marked
    /// timed-out; their results are never read.
    async fn launch(&self, plan: &ExecutionPlan, task: &Task) -> Vec<ExecutionUnit> {
        let started = Instant::now();
        let deadline = started + plan.timeout;
        let mut workers = JoinSet::new();
        let mut owners: HashMap<TaskId, usize> = HashMap::with_capacity(plan.units.len());
        for (idx, planned) in plan.units.iter().enumerate() {
            let invoker = Arc::clone(&self.invoker);
            let target = planned.target.clone();
            let parameters = planned.parameters.clone();
            let handle = workers.spawn(async move {
                let start = Instant::now();
                let result = invoker.invoke(&target, &parameters).await;
                (idx, result, start.elapsed())
            });
            owners.insert(handle.id(), idx);
        }

        let mut slots: Vec<Slot> = (0..plan.units.len()).map(|_| None).collect();
        let mut deadline_passed = false;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next_with_id()).await {
                Ok(Some(Ok((_, (idx, result, latency))))) => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = Some((result, latency));
                    }
                }
                Ok(Some(Err(e))) => {
                    let idx = owners.get(&e.id()).copied();
                    error!(task_id = %task.id, unit = ?idx, error = %e, "Execution worker panicked");
                    // The message stays free of category keywords so the
                    // failure classifies by its System kind.
                    let failure = ConductorError::invocation(
                        "execution worker panicked",
                        FailureKind::System,
                    );
                    if let Some(slot) = idx.and_then(|i| slots.get_mut(i)) {
                        *slot = Some((Err(failure), started.elapsed()));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    deadline_passed = true;
                    workers.abort_all();
                    break;
                }
            }
        }

        plan.units
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(idx, (planned, slot))| {
                let mut unit = ExecutionUnit::pending(idx, planned);
                match slot {
                    Some((Ok(value), latency)) => {
                        self.report(&unit.target, true, latency);
                        unit.status = UnitStatus::Succeeded;
                        unit.result = Some(value);
                        unit.latency_ms = millis(latency);
                    }
                    Some((Err(e), latency)) => {
                        self.report(&unit.target, false, latency);
                        warn!(task_id = %task.id, unit = idx, target = %unit.target, error = %e, "Unit failed");
                        unit.status = UnitStatus::Failed;
                        unit.error = Some(self.classifier.classify(&e, &task.context).at_unit(idx, &unit.target));
                        unit.latency_ms = millis(latency);
                    }
                    None if deadline_passed => {
                        self.report(&unit.target, false, plan.timeout);
                        warn!(task_id = %task.id, unit = idx, target = %unit.target, "Unit missed the synchronization deadline");
                        let e = ConductorError::Timeout(format!(
                            "unit {idx} ({}) missed the {}ms synchronization deadline",
                            unit.target,
                            plan.timeout.as_millis()
                        ));
                        unit.status = UnitStatus::TimedOut;
                        unit.error = Some(self.classifier.classify(&e, &task.context).at_unit(idx, &unit.target));
                        unit.latency_ms = millis(plan.timeout);
                    }
                    None => {
                        self.report(&unit.target, false, started.elapsed());
                        let e = ConductorError::invocation("execution worker terminated abnormally", FailureKind::System);
                        unit.status = UnitStatus::Failed;
                        unit.error = Some(self.classifier.classify(&e, &task.context).at_unit(idx, &unit.target));
                    }
                }
                unit
            })
            .collect()
    }

    /// Invoke a unit once and, on failure, hand it to the recovery engine.
    async fn run_unit(
        &self,
        unit: &mut ExecutionUnit,
        plan: &ExecutionPlan,
        task: &Task,
        recovery: &RecoveryEngine,
    ) {
        unit.status = UnitStatus::Running;
        let (result, latency) = self
            .invoke_once(&unit.target, &unit.parameters, plan.timeout)
            .await;
        unit.latency_ms = millis(latency);

        let e = match result {
            Ok(value) => {
                unit.status = UnitStatus::Succeeded;
                unit.result = Some(value);
                unit.error = None;
                return;
            }
            Err(e) => e,
        };

        let timed_out = matches!(e, ConductorError::Timeout(_));
        let classified = self
            .classifier
            .classify(&e, &task.context)
            .at_unit(unit.id, &unit.target);
        warn!(
            task_id = %task.id,
            unit = unit.id,
            target = %unit.target,
            category = %classified.category,
            severity = ?classified.severity,
            "Unit failed, attempting recovery"
        );

        let retry = UnitRetry {
            coordinator: self,
            target: unit.target.clone(),
            parameters: unit.parameters.clone(),
            timeout: plan.timeout,
            alternatives: match unit.target {
                Target::Agent(_) => plan.alternatives.clone(),
                Target::Tool(_) => Vec::new(),
            },
        };
        let report = recovery.recover(&classified, &retry).await;

        if report.recovered {
            unit.status = UnitStatus::Succeeded;
            unit.result = report.value.clone();
            unit.error = None;
        } else {
            unit.status = if timed_out {
                UnitStatus::TimedOut
            } else {
                UnitStatus::Failed
            };
            unit.error = Some(classified);
        }
        unit.recovery = Some(report);
    }

    /// One bounded invocation. Agent outcomes go to the feedback sink.
    async fn invoke_once(
        &self,
        target: &Target,
        parameters: &Value,
        timeout: Duration,
    ) -> (ConductorResult<Value>, Duration) {
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.invoker.invoke(target, parameters)).await {
            Ok(result) => result,
            Err(_) => Err(ConductorError::Timeout(format!(
                "{target} exceeded {}ms",
                timeout.as_millis()
            ))),
        };
        let latency = start.elapsed();
        self.report(target, result.is_ok(), latency);
        (result, latency)
    }

    fn report(&self, target: &Target, success: bool, latency: Duration) {
        if let Some(agent) = target.agent_id() {
            self.sink.record_outcome(agent, success, latency);
        }
    }

    /// Highest quality wins; ties go to the lowest unit id.
    fn select_best(&self, successes: &[ExecutionUnit], task: &Task) -> (Value, CompetitionReport) {
        let quality: Vec<(usize, f64)> = successes
            .iter()
            .map(|u| {
                let score = u
                    .result
                    .as_ref()
                    .map_or(0.0, |r| self.quality.score(&task.description, r));
                (u.id, score)
            })
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for &(id, score) in &quality {
            if best.map_or(true, |(best_id, b)| score > b || (score == b && id < best_id)) {
                best = Some((id, score));
            }
        }
        let winner = best.map_or(0, |(id, _)| id);
        let value = successes
            .iter()
            .find(|u| u.id == winner)
            .and_then(|u| u.result.clone())
            .unwrap_or(Value::Null);
        let scores: Vec<f64> = quality.iter().map(|(_, s)| *s).collect();

        (
            value,
            CompetitionReport {
                winner,
                confidence: selection_confidence(&scores),
                quality,
            },
        )
    }

    fn unexecutable(&self, plan: &ExecutionPlan, task: &Task, reason: &str) -> ExecutionOutcome {
        let e = ConductorError::Orchestrator(format!("{} plan: {reason}", plan.strategy));
        ExecutionOutcome::Failure(TerminalFailure {
            error: self.classifier.classify(&e, &task.context),
            exhausted: Vec::new(),
            failed_units: Vec::new(),
        })
    }
}

/// Combine successful parallel results, in unit order.
fn synthesize(successes: &[ExecutionUnit], failed: usize) -> Value {
    let results: Vec<Value> = successes
        .iter()
        .map(|u| {
            json!({
                "unit": u.id,
                "target": u.target.to_string(),
                "domain": u.parameters.get("domain"),
                "result": u.result,
            })
        })
        .collect();
    json!({
        "results": results,
        "completed": successes.len(),
        "failed": failed,
    })
}

fn terminal(failed_units: Vec<ExecutionUnit>) -> ExecutionOutcome {
    let mut exhausted: Vec<RecoveryStrategy> = Vec::new();
    for strategy in failed_units
        .iter()
        .filter_map(|u| u.recovery.as_ref())
        .flat_map(|r| r.exhausted())
    {
        if !exhausted.contains(&strategy) {
            exhausted.push(strategy);
        }
    }
    let error = failed_units
        .iter()
        .find_map(|u| u.error.clone())
        .unwrap_or_else(|| {
            ErrorClassifier::new().classify_message(
                "execution failed without an error record",
                FailureKind::Other,
                &serde_json::Map::new(),
            )
        });
    ExecutionOutcome::Failure(TerminalFailure {
        error,
        exhausted,
        failed_units,
    })
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// The failed unit as a recovery target.
struct UnitRetry<'a> {
    coordinator: &'a ExecutionCoordinator,
    target: Target,
    parameters: Value,
    timeout: Duration,
    alternatives: Vec<String>,
}

#[async_trait]
impl RecoveryTarget for UnitRetry<'_> {
    fn current_timeout(&self) -> Duration {
        self.timeout
    }

    fn alternatives(&self) -> Vec<String> {
        self.alternatives.clone()
    }

    fn has_parameter(&self, key: &str) -> bool {
        self.parameters.get(key).is_some()
    }

    async fn retry(&self, adjustment: Adjustment) -> ConductorResult<Value> {
        let mut target = self.target.clone();
        let mut parameters = self.parameters.clone();
        let mut timeout = self.timeout;
        match adjustment {
            Adjustment::Same => {}
            Adjustment::Timeout(t) => timeout = t,
            Adjustment::Agent(id) => target = Target::Agent(id),
            Adjustment::WithoutParameter(key) => {
                if let Value::Object(map) = &mut parameters {
                    map.remove(&key);
                }
            }
            Adjustment::ReducedScope => {
                if let Value::Object(map) = &mut parameters {
                    map.insert("reduced_scope".into(), Value::Bool(true));
                }
            }
        }
        info!(target = %target, "Retrying unit");
        self.coordinator
            .invoke_once(&target, &parameters, timeout)
            .await
            .0
    }
}
