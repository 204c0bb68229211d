use crate::classify::ErrorCategory;
use conductor_core::{AgentDescriptor, OutcomeSink, PerformanceRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Coarse health rating derived from the health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            HealthStatus::Excellent
        } else if score >= 75.0 {
            HealthStatus::Good
        } else if score >= 60.0 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }
}

/// Aggregate view over every recorded task and error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Tasks recorded.
    pub tasks: u64,
    /// Tasks that succeeded.
    pub succeeded: u64,
    /// Tasks that failed.
    pub failed: u64,
    /// `succeeded / tasks`, 1.0 with no tasks.
    pub success_rate: f64,
    /// Mean task duration in milliseconds.
    pub average_task_ms: f64,
    /// Classified errors recorded.
    pub errors: u64,
    /// Error counts keyed by category name.
    pub errors_by_category: BTreeMap<String, u64>,
    /// 0–100.
    pub score: f64,
    /// Status band derived from `score`.
    pub status: HealthStatus,
    /// Agents with a performance record.
    pub agents: usize,
}

#[derive(Debug, Default)]
struct TaskCounters {
    succeeded: u64,
    failed: u64,
    total_ms: u64,
}

/// The feedback loop: owns every agent's performance record.
///
/// Completions may arrive concurrently from several execution units; each
/// update happens under one write guard so no update is lost.
pub struct PerformanceMonitor {
    records: RwLock<HashMap<String, PerformanceRecord>>,
    errors: RwLock<HashMap<ErrorCategory, u64>>,
    tasks: RwLock<TaskCounters>,
}

impl PerformanceMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
            tasks: RwLock::new(TaskCounters::default()),
        }
    }

    /// Make sure every registered agent has a (possibly empty) record.
    pub fn register_agents(&self, agents: &[AgentDescriptor]) {
        let mut records = self.records.write();
        for agent in agents {
            records.entry(agent.id.clone()).or_default();
        }
    }

    /// Fold one completion into the agent's record.
    pub fn record(&self, agent_id: &str, success: bool, latency: Duration) {
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut records = self.records.write();
        let record = records.entry(agent_id.to_string()).or_default();
        record.record(success, latency_ms);
        debug!(agent = agent_id, success, latency_ms, "Recorded agent outcome");
    }

    /// Count one classified error.
    pub fn record_error(&self, category: ErrorCategory) {
        *self.errors.write().entry(category).or_insert(0) += 1;
    }

    /// Count one finished task.
    pub fn record_task(&self, success: bool, duration: Duration) {
        let mut tasks = self.tasks.write();
        if success {
            tasks.succeeded += 1;
        } else {
            tasks.failed += 1;
        }
        tasks.total_ms = tasks
            .total_ms
            .saturating_add(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Copy of every performance record.
    pub fn snapshot(&self) -> HashMap<String, PerformanceRecord> {
        self.records.read().clone()
    }

    /// Copy of one agent's record.
    pub fn get(&self, agent_id: &str) -> Option<PerformanceRecord> {
        self.records.read().get(agent_id).cloned()
    }

    /// Health score and counters.
    ///
    /// The score starts at 100 and loses `(0.95 - success_rate) × 200` below a
    /// 95% success rate, up to 30 points for tasks averaging over five
    /// seconds, and 20 points when errors exceed a tenth of all tasks.
    pub fn health(&self) -> HealthSummary {
        let tasks = self.tasks.read();
        let errors = self.errors.read();
        let total = tasks.succeeded + tasks.failed;
        let success_rate = if total == 0 {
            1.0
        } else {
            tasks.succeeded as f64 / total as f64
        };
        let average_task_ms = if total == 0 {
            0.0
        } else {
            tasks.total_ms as f64 / total as f64
        };
        let error_total: u64 = errors.values().sum();

        let mut score = 100.0;
        if success_rate < 0.95 {
            score -= (0.95 - success_rate) * 200.0;
        }
        let average_secs = average_task_ms / 1000.0;
        if average_secs > 5.0 {
            score -= ((average_secs - 5.0) * 10.0).min(30.0);
        }
        if error_total as f64 > total.max(1) as f64 * 0.1 {
            score -= 20.0;
        }
        let score: f64 = score.clamp(0.0, 100.0);

        HealthSummary {
            tasks: total,
            succeeded: tasks.succeeded,
            failed: tasks.failed,
            success_rate,
            average_task_ms,
            errors: error_total,
            errors_by_category: errors
                .iter()
                .map(|(category, count)| (category.to_string(), *count))
                .collect(),
            score,
            status: HealthStatus::from_score(score),
            agents: self.records.read().len(),
        }
    }

    /// Serialize records and health as JSON.
    pub fn to_json(&self) -> serde_json::Value {
        let records: BTreeMap<String, PerformanceRecord> = self.snapshot().into_iter().collect();
        serde_json::json!({
            "agents": records,
            "health": self.health(),
        })
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSink for PerformanceMonitor {
    fn record_outcome(&self, agent_id: &str, success: bool, latency: Duration) {
        self.record(agent_id, success, latency);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_record() {
        let monitor = PerformanceMonitor::new();
        monitor.register_agents(&[AgentDescriptor::new("a", "x"), AgentDescriptor::new("b", "y")]);
        assert_eq!(monitor.snapshot().len(), 2);
        assert_eq!(monitor.get("a").unwrap().invocations, 0);

        monitor.record_outcome("a", true, Duration::from_millis(200));
        monitor.record_outcome("a", false, Duration::from_millis(400));
        let a = monitor.get("a").unwrap();
        assert_eq!(a.invocations, 2);
        assert_eq!(a.successes, 1);
        assert_eq!(a.total_latency_ms, 600);
    }

    #[test]
    fn test_concurrent_updates_not_lost() {
        let monitor = Arc::new(PerformanceMonitor::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let monitor = Arc::clone(&monitor);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        monitor.record_outcome("shared", i % 2 == 0, Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let record = monitor.get("shared").unwrap();
        assert_eq!(record.invocations, 2000);
        assert_eq!(record.successes, 1000);
        assert_eq!(record.failures, 1000);
    }

    #[test]
    fn test_health_empty_is_excellent() {
        let health = PerformanceMonitor::new().health();
        assert_eq!(health.score, 100.0);
        assert_eq!(health.status, HealthStatus::Excellent);
    }

    #[test]
    fn test_health_deductions() {
        let monitor = PerformanceMonitor::new();
        for _ in 0..8 {
            monitor.record_task(true, Duration::from_secs(1));
        }
        for _ in 0..2 {
            monitor.record_task(false, Duration::from_secs(1));
        }
        monitor.record_error(ErrorCategory::NetworkError);
        monitor.record_error(ErrorCategory::TimeoutError);

        let health = monitor.health();
        // 100 - (0.95 - 0.8) * 200 - 20 (2 errors > 10% of 10 tasks)
        assert!((health.score - 50.0).abs() < 1e-9);
        assert_eq!(health.status, HealthStatus::Poor);
        assert_eq!(health.errors_by_category["network_error"], 1);
    }

    #[test]
    fn test_slow_tasks_cost_at_most_thirty() {
        let monitor = PerformanceMonitor::new();
        monitor.record_task(true, Duration::from_secs(60));
        let health = monitor.health();
        assert!((health.score - 70.0).abs() < 1e-9);
        assert_eq!(health.status, HealthStatus::Fair);
    }
}
