use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Started and not yet finalized
    Executing,
    /// Finished with `success = true`
    Completed,
    /// Finished with `success = false`
    Failed,
    /// Closed without a result (explicitly or by the stale sweep)
    Abandoned,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Abandoned => "abandoned",
        }
    }

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Executing)
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt by one agent to run one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Execution {
    pub execution_id: String,
    pub task_id: String,
    pub agent_id: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<String>,
}

impl Execution {
    pub(crate) fn begin(task_id: &str, agent_id: &str, description: &str, now: DateTime<Utc>) -> Self {
        Self {
            execution_id: new_execution_id(task_id, now),
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            description: description.to_string(),
            start_time: now,
            end_time: None,
            duration_seconds: None,
            status: ExecutionStatus::Executing,
            result: None,
            abandon_reason: None,
        }
    }

    /// Move into a terminal state. Returns the recorded duration.
    pub(crate) fn finalize(&mut self, status: ExecutionStatus, now: DateTime<Utc>) -> f64 {
        let duration = elapsed_seconds(self.start_time, now);
        self.end_time = Some(now.max(self.start_time));
        self.duration_seconds = Some(duration);
        self.status = status;
        duration
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// `exec-<unix millis>-<task id>-<8 hex>`: sortable by start time, and unique
/// even when the same task is started twice in the same millisecond.
pub fn new_execution_id(task_id: &str, now: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("exec-{}-{}-{}", now.timestamp_millis(), task_id, &nonce[..8])
}

/// Seconds from `start` to `end`, clamped at zero when the clock went backwards.
pub fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let micros = (end - start).num_microseconds().unwrap_or(i64::MAX);
    if micros < 0 {
        warn!(%start, %end, "negative duration clamped to zero (clock skew)");
        return 0.0;
    }
    micros as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_execution_ids_are_unique_per_task() {
        let now = Utc::now();
        let a = new_execution_id("T1", now);
        let b = new_execution_id("T1", now);
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("exec-{}-T1-", now.timestamp_millis())));
    }

    #[test]
    fn test_elapsed_clamps_negative() {
        let now = Utc::now();
        assert_eq!(elapsed_seconds(now, now - Duration::seconds(5)), 0.0);
        assert!((elapsed_seconds(now, now + Duration::milliseconds(1500)) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_finalize_with_backwards_clock() {
        let start = Utc::now();
        let mut exec = Execution::begin("T1", "A1", "desc", start);
        let d = exec.finalize(ExecutionStatus::Completed, start - Duration::seconds(3));
        assert_eq!(d, 0.0);
        assert_eq!(exec.end_time, Some(start));
        assert!(!exec.is_active());
    }
}
