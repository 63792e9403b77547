//! Summary of the untracked task and droid events.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::stats::DurationStats;
use crate::stream::{EventRecord, EventType};
use crate::tracker::elapsed_seconds;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskEventSummary {
    pub total_events: usize,
    pub event_types: BTreeMap<String, usize>,
    /// Event count per `run_id`; records without one are grouped under `unknown`.
    pub events_by_run: BTreeMap<String, usize>,
    pub tasks_started: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub task_completion_rate: f64,
    /// `task.started` to `task.completed`, keyed by task id.
    pub task_durations: BTreeMap<String, f64>,
    pub duration_stats: Option<DurationStats>,
    /// Error message per failed task id.
    pub failed_tasks: BTreeMap<String, String>,
    /// `droid.started` count per agent.
    pub droid_usage: BTreeMap<String, usize>,
    pub audit_actions: BTreeMap<String, usize>,
}

/// Walk `events` in timestamp order and pair task starts with completions.
/// A task restarted before completing keeps its latest start.
pub fn summarize(events: &[EventRecord], audit: &[EventRecord]) -> TaskEventSummary {
    let mut summary = TaskEventSummary {
        total_events: events.len(),
        ..Default::default()
    };

    let mut ordered: Vec<&EventRecord> = events.iter().collect();
    ordered.sort_by_key(|r| r.timestamp);

    let mut started: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for record in ordered {
        *summary
            .event_types
            .entry(record.event_type.as_str().to_string())
            .or_default() += 1;
        let run = if record.run_id.is_empty() { "unknown" } else { record.run_id.as_str() };
        *summary.events_by_run.entry(run.to_string()).or_default() += 1;

        match record.event_type {
            EventType::TaskStarted => {
                if let Some(task_id) = record.task_id() {
                    summary.tasks_started += 1;
                    started.insert(task_id, record.timestamp);
                }
            }
            EventType::TaskCompleted => {
                let Some(task_id) = record.task_id() else { continue };
                summary.tasks_completed += 1;
                match started.remove(task_id) {
                    Some(start) => {
                        summary
                            .task_durations
                            .insert(task_id.to_string(), elapsed_seconds(start, record.timestamp));
                    }
                    None => debug!(task_id, "task completed without a recorded start"),
                }
            }
            EventType::TaskFailed => {
                let Some(task_id) = record.task_id() else { continue };
                summary.tasks_failed += 1;
                started.remove(task_id);
                let error = record
                    .field("details")
                    .and_then(|d| d.get("error"))
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error");
                summary.failed_tasks.insert(task_id.to_string(), error.to_string());
            }
            EventType::DroidStarted => {
                if let Some(agent) = record.agent_id() {
                    *summary.droid_usage.entry(agent.to_string()).or_default() += 1;
                }
            }
            _ => {}
        }
    }

    summary.task_completion_rate = if summary.tasks_started > 0 {
        summary.tasks_completed as f64 / summary.tasks_started as f64
    } else {
        0.0
    };
    let durations: Vec<f64> = summary.task_durations.values().copied().collect();
    summary.duration_stats = DurationStats::from_samples(&durations);

    for entry in audit {
        let action = entry.str_field("action").unwrap_or("unknown");
        *summary.audit_actions.entry(action.to_string()).or_default() += 1;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::payload;
    use chrono::Duration;
    use serde_json::json;

    fn at(event_type: EventType, secs: i64, data: serde_json::Value) -> EventRecord {
        let mut record = EventRecord::new(event_type, "r-20260101-0000", payload(data));
        record.timestamp = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs);
        record
    }

    #[test]
    fn test_pairs_starts_with_completions_out_of_file_order() {
        let events = vec![
            at(EventType::TaskCompleted, 40, json!({"task_id": "1.1"})),
            at(EventType::TaskStarted, 10, json!({"task_id": "1.1"})),
            at(EventType::TaskStarted, 20, json!({"task_id": "1.2"})),
            at(EventType::TaskFailed, 25, json!({"task_id": "1.2", "details": {"error": "lint"}})),
            at(EventType::DroidStarted, 11, json!({"agent_id": "builder"})),
            at(EventType::DroidStarted, 21, json!({"agent_id": "builder"})),
        ];
        let audit = vec![
            at(EventType::AuditRecorded, 0, json!({"action": "process_files_sync"})),
            at(EventType::AuditRecorded, 1, json!({"action": "process_files_sync"})),
        ];

        let s = summarize(&events, &audit);
        assert_eq!(s.total_events, 6);
        assert_eq!(s.task_durations.get("1.1"), Some(&30.0));
        assert_eq!(s.tasks_started, 2);
        assert_eq!(s.tasks_completed, 1);
        assert_eq!(s.task_completion_rate, 0.5);
        assert_eq!(s.failed_tasks.get("1.2").map(String::as_str), Some("lint"));
        assert_eq!(s.droid_usage.get("builder"), Some(&2));
        assert_eq!(s.audit_actions.get("process_files_sync"), Some(&2));
        assert_eq!(s.event_types.get("task.started"), Some(&2));
    }

    #[test]
    fn test_events_grouped_by_run() {
        let mut second_run = at(EventType::TaskStarted, 50, json!({"task_id": "2.1"}));
        second_run.run_id = "r-20260102-0900".to_string();
        let mut legacy = at(EventType::GitCommit, 60, json!({}));
        legacy.run_id.clear();
        let events = vec![
            at(EventType::TaskStarted, 10, json!({"task_id": "1.1"})),
            at(EventType::TaskCompleted, 20, json!({"task_id": "1.1"})),
            second_run,
            legacy,
        ];

        let s = summarize(&events, &[]);
        assert_eq!(s.events_by_run.get("r-20260101-0000"), Some(&2));
        assert_eq!(s.events_by_run.get("r-20260102-0900"), Some(&1));
        assert_eq!(s.events_by_run.get("unknown"), Some(&1));
    }

    #[test]
    fn test_completion_without_start_has_no_duration() {
        let events = vec![at(EventType::TaskCompleted, 5, json!({"task_id": "9"}))];
        let s = summarize(&events, &[]);
        assert!(s.task_durations.is_empty());
        assert!(s.duration_stats.is_none());
        assert_eq!(s.task_completion_rate, 0.0);
    }
}
