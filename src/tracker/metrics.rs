//! Per-agent rolling metrics and the tracker snapshot type.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::{Execution, ExecutionStatus};

/// Rolling performance figures for one agent.
///
/// Counts only move on finalization. Self-reports update `last_seen` and
/// `last_status` and nothing else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub abandoned_executions: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}

impl AgentMetrics {
    /// Fold one finalized execution into the totals.
    pub fn record(&mut self, status: ExecutionStatus, duration: f64) {
        self.total_executions += 1;
        self.total_duration += duration.max(0.0);
        match status {
            ExecutionStatus::Completed => self.successful_executions += 1,
            ExecutionStatus::Failed => self.failed_executions += 1,
            ExecutionStatus::Abandoned => self.abandoned_executions += 1,
            ExecutionStatus::Executing => {}
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        if self.total_executions == 0 {
            self.avg_duration = 0.0;
            self.success_rate = 0.0;
            return;
        }
        let total = self.total_executions as f64;
        self.avg_duration = self.total_duration / total;
        self.success_rate = self.successful_executions as f64 / total;
    }
}

/// Last advisory status an agent reported about itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfReport {
    pub agent_id: String,
    pub status: String,
    pub reported_at: DateTime<Utc>,
    pub details: serde_json::Value,
}

/// Point-in-time view of the tracker taken under its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub active_executions: usize,
    pub completed_executions: usize,
    pub agent_performance: BTreeMap<String, AgentMetrics>,
    pub self_reports: BTreeMap<String, SelfReport>,
    pub recent_failures: Vec<Execution>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_order_independent() {
        let outcomes = [
            (ExecutionStatus::Completed, 1.0),
            (ExecutionStatus::Failed, 3.0),
            (ExecutionStatus::Completed, 2.0),
            (ExecutionStatus::Completed, 6.0),
        ];

        let mut forward = AgentMetrics::default();
        for (status, d) in outcomes {
            forward.record(status, d);
        }
        let mut reverse = AgentMetrics::default();
        for (status, d) in outcomes.iter().rev() {
            reverse.record(*status, *d);
        }

        assert_eq!(forward, reverse);
        assert_eq!(forward.total_executions, 4);
        assert_eq!(forward.success_rate, 3.0 / 4.0);
        assert_eq!(forward.avg_duration, 12.0 / 4.0);
    }

    #[test]
    fn test_abandoned_counts_against_success_rate() {
        let mut m = AgentMetrics::default();
        m.record(ExecutionStatus::Completed, 1.0);
        m.record(ExecutionStatus::Abandoned, 1.0);
        assert_eq!(m.failed_executions, 0);
        assert_eq!(m.abandoned_executions, 1);
        assert_eq!(m.success_rate, 0.5);
    }
}
