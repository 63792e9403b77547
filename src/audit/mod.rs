//! Multi-stream audit logger.
//!
//! [`AuditLogger`] binds one [`EventStream`] per channel (audit, events,
//! results, performance) and drives the shared [`ExecutionTracker`]. Each
//! `log_*` call first applies the tracker transition, when there is one, and
//! then appends a freshly timestamped record tagged with the logger's run id.
//!
//! Write failures are reported through `tracing` and otherwise swallowed: the
//! logger must never fail the work it is observing.

pub mod result;

pub use result::ResultCategory;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::stream::{payload, EventRecord, EventStream, EventType, LogPaths};
use crate::tracker::{Execution, ExecutionTracker, PerformanceSummary};

/// Run id for a logging session: `r-YYYYMMDD-HHMM` in UTC.
pub fn generate_run_id() -> String {
    format!("r-{}", Utc::now().format("%Y%m%d-%H%M"))
}

/// Snapshot returned by [`AuditLogger::execution_summary`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub execution_summary: PerformanceSummary,
    pub log_files: LogPaths,
}

pub struct AuditLogger {
    run_id: String,
    paths: LogPaths,
    audit: EventStream,
    events: EventStream,
    results: EventStream,
    performance: EventStream,
    tracker: Arc<ExecutionTracker>,
}

impl AuditLogger {
    /// Bind the logger to `logs_dir`, creating the directory if needed.
    pub fn new(logs_dir: impl Into<PathBuf>, tracker: Arc<ExecutionTracker>) -> Result<Self> {
        let logs_dir = logs_dir.into();
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("failed to create logs directory: {}", logs_dir.display()))?;

        let paths = LogPaths::in_dir(&logs_dir);
        let run_id = generate_run_id();
        info!(run_id = %run_id, logs_dir = %logs_dir.display(), "audit logger ready");

        Ok(Self {
            run_id,
            audit: EventStream::new(&paths.audit),
            events: EventStream::new(&paths.events),
            results: EventStream::new(&paths.results),
            performance: EventStream::new(&paths.performance),
            paths,
            tracker,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    fn write(&self, stream: &EventStream, event_type: EventType, data: Value) -> Option<EventRecord> {
        match stream.append_event(event_type, &self.run_id, payload(data)) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(path = %stream.path().display(), error = %e, "failed to append event");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Plain events
    // -----------------------------------------------------------------------

    pub fn log_audit(&self, action: &str, details: Option<Value>) {
        let mut data = json!({ "action": action });
        if let Some(details) = details {
            data["details"] = details;
        }
        self.write(&self.audit, EventType::AuditRecorded, data);
    }

    pub fn log_task_scheduled(&self, task_id: &str, description: &str) {
        self.write(
            &self.events,
            EventType::TaskScheduled,
            json!({
                "task_id": task_id,
                "status": "scheduled",
                "details": { "description": description },
            }),
        );
    }

    pub fn log_task_started(&self, task_id: &str, agent_id: Option<&str>) {
        let mut data = json!({ "task_id": task_id, "status": "started" });
        with_optional(&mut data, "agent_id", agent_id);
        self.write(&self.events, EventType::TaskStarted, data);
    }

    pub fn log_task_completed(&self, task_id: &str, agent_id: Option<&str>) {
        let mut data = json!({ "task_id": task_id, "status": "completed" });
        with_optional(&mut data, "agent_id", agent_id);
        self.write(&self.events, EventType::TaskCompleted, data);
    }

    pub fn log_task_failed(&self, task_id: &str, error: &str, agent_id: Option<&str>) {
        let mut data = json!({
            "task_id": task_id,
            "status": "failed",
            "details": { "error": error },
        });
        with_optional(&mut data, "agent_id", agent_id);
        self.write(&self.events, EventType::TaskFailed, data);
    }

    pub fn log_droid_started(&self, agent_id: &str, task_id: Option<&str>) {
        let mut data = json!({ "agent_id": agent_id, "status": "started" });
        with_optional(&mut data, "task_id", task_id);
        self.write(&self.events, EventType::DroidStarted, data);
    }

    pub fn log_droid_completed(&self, agent_id: &str, task_id: Option<&str>) {
        let mut data = json!({ "agent_id": agent_id, "status": "completed" });
        with_optional(&mut data, "task_id", task_id);
        self.write(&self.events, EventType::DroidCompleted, data);
    }

    pub fn log_git_commit(&self, sha: &str, branch: &str, message: &str) {
        self.write(
            &self.events,
            EventType::GitCommit,
            json!({ "git": { "sha": sha, "branch": branch, "message": message } }),
        );
    }

    /// Record a synchronization of shared process files from `source` at `reference`.
    pub fn log_process_files_sync(&self, source: &str, reference: &str) {
        self.log_audit(
            "process_files_sync",
            Some(json!({ "source": source, "ref": reference })),
        );
    }

    // -----------------------------------------------------------------------
    // Tracked executions
    // -----------------------------------------------------------------------

    /// Start tracking an execution and persist `task.execution.started`.
    pub fn log_execution_started(&self, task_id: &str, agent_id: &str, description: &str) -> String {
        let execution_id = self.tracker.start(task_id, agent_id, description);
        self.write(
            &self.events,
            EventType::ExecutionStarted,
            json!({
                "execution_id": execution_id,
                "task_id": task_id,
                "agent_id": agent_id,
                "status": "executing",
                "details": { "description": description },
            }),
        );
        execution_id
    }

    /// Finalize an execution and persist both the lifecycle event and a
    /// denormalized `task.result` record.
    ///
    /// The records are written even when the tracker has no live execution
    /// for `execution_id`; they then carry `"tracked": false`.
    pub fn log_execution_completed(&self, execution_id: &str, result: Value, success: bool) {
        let finalized = self.tracker.complete(execution_id, result.clone(), success);
        if finalized.is_none() {
            warn!(execution_id, "completion logged for execution unknown to this tracker");
        }

        let mut data = json!({
            "execution_id": execution_id,
            "status": if success { "completed" } else { "failed" },
            "result": result,
        });
        attach_execution(&mut data, finalized.as_ref());
        self.write(&self.events, EventType::ExecutionCompleted, data);

        let mut row = json!({
            "execution_id": execution_id,
            "success": success,
            "result_data": result,
        });
        if let Some(exec) = &finalized {
            row["agent_id"] = json!(exec.agent_id);
            row["task_id"] = json!(exec.task_id);
        }
        self.write(&self.results, EventType::TaskResult, row);
    }

    pub fn log_execution_abandoned(&self, execution_id: &str, reason: &str) {
        let finalized = self.tracker.abandon(execution_id, reason);
        if finalized.is_none() {
            warn!(execution_id, reason, "abandonment logged for execution unknown to this tracker");
        }
        self.write_abandoned(execution_id, reason, finalized.as_ref());
    }

    fn write_abandoned(&self, execution_id: &str, reason: &str, finalized: Option<&Execution>) {
        let mut data = json!({
            "execution_id": execution_id,
            "status": "abandoned",
            "reason": reason,
        });
        attach_execution(&mut data, finalized);
        self.write(&self.events, EventType::ExecutionAbandoned, data);
    }

    pub fn log_self_report(&self, agent_id: &str, status: &str, details: Value) {
        self.tracker.record_self_report(agent_id, status, details.clone());
        self.write(
            &self.events,
            EventType::DroidSelfReport,
            json!({ "agent_id": agent_id, "status": status, "details": details }),
        );
    }

    /// Persist the current tracker snapshot to the performance stream.
    pub fn log_performance_metrics(&self) {
        let summary = self.tracker.performance_summary();
        match serde_json::to_value(&summary) {
            Ok(data) => {
                self.write(&self.performance, EventType::PerformanceMetrics, data);
            }
            Err(e) => error!(error = %e, "failed to encode performance summary"),
        }

        self.log_audit(
            "performance_metrics_generated",
            Some(json!({
                "total_tasks": summary.completed_executions,
                "active_tasks": summary.active_executions,
                "droids_tracked": summary.agent_performance.len(),
            })),
        );
    }

    /// Classify and store a result payload.
    ///
    /// Returns `false` without writing anything if `result` is not a JSON
    /// object. Any object is accepted; unrecognized shapes are tagged
    /// `unknown`.
    pub fn validate_and_store_result(&self, execution_id: &str, result: &Value) -> bool {
        let Some(fields) = result.as_object() else {
            debug!(execution_id, "rejected non-object result payload");
            return false;
        };

        let category = ResultCategory::classify(fields);
        self.write(
            &self.results,
            EventType::TaskResultValidated,
            json!({
                "execution_id": execution_id,
                "category": category,
                "validated_at": Utc::now(),
                "original_result": result,
            }),
        );
        true
    }

    /// Abandon executions older than `timeout` and persist one
    /// `task.execution.abandoned` record per swept execution.
    pub fn sweep_stale_executions(&self, timeout: Duration) -> Vec<Execution> {
        let swept = self.tracker.sweep_stale(timeout);
        for exec in &swept {
            self.write_abandoned(&exec.execution_id, "timeout", Some(exec));
        }

        self.log_audit(
            "stale_executions_cleanup",
            Some(json!({
                "timeout_seconds": timeout.as_secs(),
                "abandoned": swept.len(),
            })),
        );
        swept
    }

    pub fn execution_summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            run_id: self.run_id.clone(),
            generated_at: Utc::now(),
            execution_summary: self.tracker.performance_summary(),
            log_files: self.paths.clone(),
        }
    }

    /// Directory holding the streams.
    pub fn logs_dir(&self) -> &Path {
        self.paths
            .events
            .parent()
            .unwrap_or_else(|| Path::new("."))
    }
}

fn with_optional(data: &mut Value, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        data[key] = json!(v);
    }
}

fn attach_execution(data: &mut Value, finalized: Option<&Execution>) {
    data["tracked"] = json!(finalized.is_some());
    if let Some(exec) = finalized {
        data["agent_id"] = json!(exec.agent_id);
        data["task_id"] = json!(exec.task_id);
        if let Some(d) = exec.duration_seconds {
            data["duration_seconds"] = json!(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> (tempfile::TempDir, AuditLogger) {
        let dir = tempfile::TempDir::new().unwrap();
        let logger = AuditLogger::new(dir.path().join("logs"), Arc::new(ExecutionTracker::new())).unwrap();
        (dir, logger)
    }

    #[test]
    fn test_run_id_shape() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), "r-20260101-1200".len());
    }

    #[test]
    fn test_every_record_carries_run_id() {
        let (_dir, logger) = logger();
        logger.log_task_scheduled("T1", "write docs");
        logger.log_task_started("T1", Some("A1"));
        logger.log_git_commit("abc123", "main", "docs");
        logger.log_audit("manual_check", None);

        let events = EventStream::new(&logger.paths().events).load();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.run_id == logger.run_id()));
        assert_eq!(events[1].agent_id(), Some("A1"));
        assert_eq!(events[2].field("git").unwrap()["sha"], "abc123");

        let audit = EventStream::new(&logger.paths().audit).load();
        assert_eq!(audit[0].str_field("action"), Some("manual_check"));
        assert!(audit[0].field("details").is_none());
    }

    #[test]
    fn test_optional_ids_are_omitted() {
        let (_dir, logger) = logger();
        logger.log_task_completed("T1", None);
        logger.log_droid_started("A1", None);

        let events = EventStream::new(&logger.paths().events).load();
        assert!(events[0].agent_id().is_none());
        assert!(events[1].task_id().is_none());
    }

    #[test]
    fn test_completion_writes_event_and_result() {
        let (_dir, logger) = logger();
        let id = logger.log_execution_started("T1", "A1", "desc");
        logger.log_execution_completed(&id, json!({"ok": true}), true);

        let events = EventStream::new(&logger.paths().events).load();
        let completed = events
            .iter()
            .find(|e| e.event_type == EventType::ExecutionCompleted)
            .unwrap();
        assert_eq!(completed.execution_id(), Some(id.as_str()));
        assert_eq!(completed.status(), Some("completed"));
        assert_eq!(completed.agent_id(), Some("A1"));
        assert_eq!(completed.field("tracked"), Some(&json!(true)));

        let results = EventStream::new(&logger.paths().results).load();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, EventType::TaskResult);
        assert_eq!(results[0].field("success"), Some(&json!(true)));
        assert_eq!(results[0].field("result_data").unwrap()["ok"], true);
    }

    #[test]
    fn test_untracked_completion_is_still_persisted() {
        let (_dir, logger) = logger();
        logger.log_execution_completed("exec-1-T9-deadbeef", json!({}), false);
        logger.log_execution_abandoned("exec-2-T9-deadbeef", "restart");

        let events = EventStream::new(&logger.paths().events).load();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.field("tracked") == Some(&json!(false))));
        assert_eq!(events[0].status(), Some("failed"));
        assert_eq!(events[1].str_field("reason"), Some("restart"));
        assert_eq!(logger.tracker().performance_summary().completed_executions, 0);
    }

    #[test]
    fn test_write_failures_do_not_reach_the_caller() {
        let (_dir, logger) = logger();
        for path in [&logger.paths().events, &logger.paths().results, &logger.paths().audit] {
            std::fs::create_dir(path).unwrap();
        }

        let id = logger.log_execution_started("T1", "A1", "unwritable logs");
        logger.log_execution_completed(&id, json!({"ok": true}), true);
        logger.log_audit("after_failure", None);
        assert!(logger.validate_and_store_result(&id, &json!({"commits": ["abc"]})));

        let m = logger.tracker().agent_metrics("A1").unwrap();
        assert_eq!(m.total_executions, 1);
        assert_eq!(m.successful_executions, 1);
        assert!(logger.tracker().active().is_empty());
        assert!(logger.paths().events.is_dir());
    }

    #[test]
    fn test_validate_and_store_result() {
        let (_dir, logger) = logger();
        assert!(!logger.validate_and_store_result("e1", &json!(["not", "an", "object"])));
        assert!(!logger.validate_and_store_result("e1", &json!("text")));
        assert!(logger.validate_and_store_result("e1", &json!({"tests_run": 4})));
        assert!(logger.validate_and_store_result("e2", &json!({"whatever": 1})));

        let results = EventStream::new(&logger.paths().results).load();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].str_field("category"), Some("testing"));
        assert_eq!(results[1].str_field("category"), Some("unknown"));
        assert_eq!(results[1].field("original_result").unwrap()["whatever"], 1);
    }

    #[test]
    fn test_self_report_reaches_tracker_and_stream() {
        let (_dir, logger) = logger();
        logger.log_self_report("A1", "executing", json!({"progress": 0.25}));

        let m = logger.tracker().agent_metrics("A1").unwrap();
        assert_eq!(m.last_status.as_deref(), Some("executing"));
        assert_eq!(m.total_executions, 0);

        let events = EventStream::new(&logger.paths().events).load();
        assert_eq!(events[0].event_type, EventType::DroidSelfReport);
    }

    #[test]
    fn test_performance_metrics_logged() {
        let (_dir, logger) = logger();
        let id = logger.log_execution_started("T1", "A1", "desc");
        logger.log_execution_completed(&id, json!({}), true);
        logger.log_performance_metrics();

        let perf = EventStream::new(&logger.paths().performance).load();
        assert_eq!(perf.len(), 1);
        assert_eq!(perf[0].field("completed_executions"), Some(&json!(1)));
        assert!(perf[0].field("agent_performance").unwrap().get("A1").is_some());

        let audit = EventStream::new(&logger.paths().audit).load();
        assert_eq!(audit[0].str_field("action"), Some("performance_metrics_generated"));
        assert_eq!(audit[0].field("details").unwrap()["droids_tracked"], 1);
    }

    #[test]
    fn test_sweep_with_zero_timeout_abandons_and_persists() {
        let (_dir, logger) = logger();
        let id = logger.log_execution_started("T1", "A1", "desc");
        std::thread::sleep(Duration::from_millis(5));

        let swept = logger.sweep_stale_executions(Duration::ZERO);
        assert_eq!(swept.len(), 1);

        let events = EventStream::new(&logger.paths().events).load();
        let abandoned: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::ExecutionAbandoned)
            .collect();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].execution_id(), Some(id.as_str()));
        assert_eq!(abandoned[0].str_field("reason"), Some("timeout"));

        let audit = EventStream::new(&logger.paths().audit).load();
        assert_eq!(audit[0].str_field("action"), Some("stale_executions_cleanup"));
    }

    #[test]
    fn test_execution_summary_lists_log_files() {
        let (dir, logger) = logger();
        let summary = logger.execution_summary();
        assert_eq!(summary.run_id, logger.run_id());
        assert_eq!(summary.log_files.events, dir.path().join("logs").join("events.ndjson"));
        assert_eq!(logger.logs_dir(), dir.path().join("logs"));
    }
}
