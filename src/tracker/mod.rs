//! In-memory execution tracker.
//!
//! Owns the live executions of this process and the per-agent rolling
//! metrics. Every operation takes the single state lock for its whole
//! duration, so a [`PerformanceSummary`] never observes a half-applied update.
//!
//! Terminal signals for ids the tracker does not know (a duplicate completion,
//! or one that arrives after a restart) are ignored here. The persisted event
//! written by the caller remains the source of truth.

pub mod execution;
pub mod metrics;

pub use execution::{elapsed_seconds, Execution, ExecutionStatus};
pub use metrics::{AgentMetrics, PerformanceSummary, SelfReport};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;

/// Default number of finalized executions kept in memory.
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;
/// Default number of trailing history entries scanned for recent failures.
pub const DEFAULT_RECENT_FAILURE_WINDOW: usize = 10;

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<String, Execution>,
    history: VecDeque<Execution>,
    agents: HashMap<String, AgentMetrics>,
    reports: HashMap<String, SelfReport>,
}

/// Thread-safe registry of executions and agent metrics.
///
/// Construct one per process and share it by `Arc`.
#[derive(Debug)]
pub struct ExecutionTracker {
    state: Mutex<TrackerState>,
    history_limit: usize,
    recent_failure_window: usize,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_HISTORY_LIMIT, DEFAULT_RECENT_FAILURE_WINDOW)
    }

    /// Create with custom history size and recent-failure window.
    pub fn with_limits(history_limit: usize, recent_failure_window: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            history_limit: history_limit.max(1),
            recent_failure_window,
        }
    }

    /// Create with the limits from the `[tracker]` config section.
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::with_limits(config.history_limit, config.recent_failure_window)
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new execution in the `executing` state and return its id.
    pub fn start(&self, task_id: &str, agent_id: &str, description: &str) -> String {
        let execution = Execution::begin(task_id, agent_id, description, Utc::now());
        let execution_id = execution.execution_id.clone();

        let mut state = self.lock();
        state.active.insert(execution_id.clone(), execution);

        info!(execution_id = %execution_id, task_id, agent_id, "execution started");
        execution_id
    }

    /// Finalize an execution as completed or failed.
    ///
    /// Returns `None` without touching any state when `execution_id` is not
    /// active.
    pub fn complete(
        &self,
        execution_id: &str,
        result: serde_json::Value,
        success: bool,
    ) -> Option<Execution> {
        let mut state = self.lock();
        let finalized = self.finalize_locked(
            &mut state,
            execution_id,
            ExecutionStatus::from_success(success),
            Some(result),
            None,
            Utc::now(),
        );
        if finalized.is_none() {
            debug!(execution_id, "completion for unknown or finished execution ignored");
        }
        finalized
    }

    /// Finalize an execution as abandoned.
    pub fn abandon(&self, execution_id: &str, reason: &str) -> Option<Execution> {
        let mut state = self.lock();
        let finalized = self.finalize_locked(
            &mut state,
            execution_id,
            ExecutionStatus::Abandoned,
            Some(serde_json::json!({ "error": format!("Task abandoned: {reason}") })),
            Some(reason.to_string()),
            Utc::now(),
        );
        if finalized.is_none() {
            debug!(execution_id, "abandon for unknown or finished execution ignored");
        }
        finalized
    }

    /// Upsert an agent's advisory status. Execution counts are untouched.
    pub fn record_self_report(&self, agent_id: &str, status: &str, details: serde_json::Value) {
        let now = Utc::now();
        let mut state = self.lock();

        let metrics = state.agents.entry(agent_id.to_string()).or_default();
        metrics.last_seen = Some(now);
        metrics.last_status = Some(status.to_string());

        state.reports.insert(
            agent_id.to_string(),
            SelfReport {
                agent_id: agent_id.to_string(),
                status: status.to_string(),
                reported_at: now,
                details,
            },
        );
        debug!(agent_id, status, "self report recorded");
    }

    /// Abandon every execution that has been active longer than `timeout`.
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<Execution> {
        self.sweep_stale_at(Utc::now(), timeout)
    }

    /// [`sweep_stale`](Self::sweep_stale) evaluated against an explicit instant.
    pub fn sweep_stale_at(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<Execution> {
        let timeout_secs = timeout.as_secs_f64();
        let mut state = self.lock();

        let mut stale: Vec<String> = state
            .active
            .values()
            .filter(|e| elapsed_seconds(e.start_time, now) > timeout_secs)
            .map(|e| e.execution_id.clone())
            .collect();
        stale.sort();

        let swept: Vec<Execution> = stale
            .iter()
            .filter_map(|id| {
                self.finalize_locked(
                    &mut state,
                    id,
                    ExecutionStatus::Abandoned,
                    Some(serde_json::json!({ "error": "Task abandoned: timeout" })),
                    Some("timeout".to_string()),
                    now,
                )
            })
            .collect();

        if !swept.is_empty() {
            warn!(count = swept.len(), timeout_secs, "stale executions abandoned");
        }
        swept
    }

    /// Consistent snapshot of counts, agent metrics and recent failures.
    pub fn performance_summary(&self) -> PerformanceSummary {
        let state = self.lock();
        let window_start = state.history.len().saturating_sub(self.recent_failure_window);

        PerformanceSummary {
            generated_at: Utc::now(),
            active_executions: state.active.len(),
            completed_executions: state.history.len(),
            agent_performance: state
                .agents
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            self_reports: state
                .reports
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            recent_failures: state
                .history
                .iter()
                .skip(window_start)
                .filter(|e| {
                    matches!(e.status, ExecutionStatus::Failed | ExecutionStatus::Abandoned)
                })
                .cloned()
                .collect(),
        }
    }

    /// Look up an execution, active ones first.
    pub fn get(&self, execution_id: &str) -> Option<Execution> {
        let state = self.lock();
        state
            .active
            .get(execution_id)
            .or_else(|| state.history.iter().rev().find(|e| e.execution_id == execution_id))
            .cloned()
    }

    /// Active executions ordered by start time.
    pub fn active(&self) -> Vec<Execution> {
        let state = self.lock();
        let mut active: Vec<Execution> = state.active.values().cloned().collect();
        active.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        active
    }

    pub fn agent_metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.lock().agents.get(agent_id).cloned()
    }

    fn finalize_locked(
        &self,
        state: &mut TrackerState,
        execution_id: &str,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        abandon_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<Execution> {
        let mut execution = state.active.remove(execution_id)?;
        let duration = execution.finalize(status, now);
        execution.result = result;
        execution.abandon_reason = abandon_reason;

        state
            .agents
            .entry(execution.agent_id.clone())
            .or_default()
            .record(status, duration);

        state.history.push_back(execution.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }

        info!(
            execution_id,
            agent_id = %execution.agent_id,
            status = %status,
            duration_seconds = duration,
            "execution finalized"
        );
        Some(execution)
    }
}
