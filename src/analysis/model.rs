use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::issues::Issue;
use super::stats::DurationStats;
use super::tasks::TaskEventSummary;
use crate::stream::EventRecord;
use crate::tracker::ExecutionStatus;

/// Full offline report over one logs directory.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub report_generated_at: DateTime<Utc>,
    pub logs_dir: PathBuf,
    pub data_summary: DataSummary,
    pub execution_patterns: ExecutionPatterns,
    pub agent_performance: BTreeMap<String, AgentPerformance>,
    pub result_patterns: ResultPatterns,
    pub task_events: TaskEventSummary,
    pub performance_issues: Vec<Issue>,
    pub recent_activity: Vec<EventRecord>,
}

/// Records loaded per stream, and lines that failed to parse.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DataSummary {
    pub events_loaded: usize,
    pub results_loaded: usize,
    pub performance_metrics_loaded: usize,
    pub audit_entries_loaded: usize,
    pub self_reports_loaded: usize,
    pub malformed_lines_skipped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPatterns {
    pub total_executions_started: usize,
    pub total_executions_completed: usize,
    pub total_executions_abandoned: usize,
    /// Terminal records whose start was never seen.
    pub unmatched_terminals: usize,
    pub stuck_executions: usize,
    pub completion_rate: f64,
    pub abandonment_rate: f64,
    pub duration_stats: Option<DurationStats>,
    /// First executions to finish, in terminal order.
    pub execution_details: Vec<ExecutionDuration>,
    pub longest_executions: Vec<ExecutionDuration>,
}

/// One finalized execution with a measurable duration.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionDuration {
    pub execution_id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub status: ExecutionStatus,
    pub duration_seconds: f64,
}

/// Per-agent aggregate recomputed from the event stream.
///
/// Counting matches [`AgentMetrics`](crate::tracker::AgentMetrics): every
/// terminal record counts toward `total_executions`, abandoned executions are
/// neither successful nor failed.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AgentPerformance {
    pub executions_started: u64,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub abandoned_executions: u64,
    pub total_duration: f64,
    pub avg_duration: f64,
    pub success_rate: f64,
    pub self_reports: u64,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) timed_executions: u64,
}

impl AgentPerformance {
    pub(crate) fn record(&mut self, status: ExecutionStatus, duration: Option<f64>) {
        self.total_executions += 1;
        match status {
            ExecutionStatus::Completed => self.successful_executions += 1,
            ExecutionStatus::Failed => self.failed_executions += 1,
            ExecutionStatus::Abandoned => self.abandoned_executions += 1,
            ExecutionStatus::Executing => {}
        }
        if let Some(d) = duration {
            self.total_duration += d;
            self.timed_executions += 1;
        }
        self.avg_duration = if self.timed_executions > 0 {
            self.total_duration / self.timed_executions as f64
        } else {
            0.0
        };
        self.success_rate = self.successful_executions as f64 / self.total_executions as f64;
    }

    pub(crate) fn seen(&mut self, at: DateTime<Utc>) {
        if self.last_seen.map_or(true, |prev| at > prev) {
            self.last_seen = Some(at);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ResultPatterns {
    /// Category counts from `task.result.validated` records.
    pub result_categories: BTreeMap<String, usize>,
    pub success_by_category: BTreeMap<String, usize>,
    pub errors_by_category: BTreeMap<String, usize>,
    /// `task.result` outcomes.
    pub successful_results: usize,
    pub failed_results: usize,
    pub total_validated_results: usize,
    /// Validated records over all records in the results stream.
    pub validation_rate: f64,
}
