//! Anomaly rules over an analyzed logs directory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::{AgentPerformance, ExecutionPatterns};
use crate::config::AnalyzerConfig;

/// Severity levels for detected issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighAbandonmentRate,
    PoorAgentPerformance,
    StuckExecutions,
}

/// A detected anomaly with a suggested remedy.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub execution_ids: Vec<String>,
}

/// Apply every rule. `stuck` holds all stuck ids, oldest start first.
pub fn detect_issues(
    config: &AnalyzerConfig,
    patterns: &ExecutionPatterns,
    agents: &BTreeMap<String, AgentPerformance>,
    stuck: &[String],
) -> Vec<Issue> {
    let mut issues = Vec::new();

    if patterns.abandonment_rate > config.abandonment_warning_rate {
        issues.push(Issue {
            kind: IssueKind::HighAbandonmentRate,
            severity: Severity::Warning,
            description: format!(
                "High task abandonment rate: {:.1}%",
                patterns.abandonment_rate * 100.0
            ),
            recommendation: "Investigate why droids are abandoning tasks".to_string(),
            agent_id: None,
            count: Some(patterns.total_executions_abandoned),
            execution_ids: Vec::new(),
        });
    }

    for (agent_id, perf) in agents {
        if perf.total_executions > config.min_agent_executions
            && perf.success_rate < config.poor_success_rate
        {
            issues.push(Issue {
                kind: IssueKind::PoorAgentPerformance,
                severity: Severity::Error,
                description: format!(
                    "Droid {} has low success rate: {:.1}%",
                    agent_id,
                    perf.success_rate * 100.0
                ),
                recommendation: format!("Review and improve {} droid implementation", agent_id),
                agent_id: Some(agent_id.clone()),
                count: Some(perf.total_executions as usize),
                execution_ids: Vec::new(),
            });
        }
    }

    if !stuck.is_empty() {
        issues.push(Issue {
            kind: IssueKind::StuckExecutions,
            severity: Severity::Warning,
            description: format!("{} executions started but never completed", stuck.len()),
            recommendation: "Check for droid crashes or timeouts".to_string(),
            agent_id: None,
            count: Some(stuck.len()),
            execution_ids: stuck.iter().take(config.stuck_sample_size).cloned().collect(),
        });
    }

    issues
}
