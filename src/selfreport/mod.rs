//! Self-reporting for executing droids.
//!
//! A droid process does not need the tracker that started its execution to
//! say what it is doing. It writes advisory `droid.self_report` records to the
//! self-report stream, attributed through an [`IdentityResolver`].

pub mod identity;
pub mod scope;

pub use identity::{EnvIdentity, Identity, IdentityResolver, StaticIdentity};
pub use scope::TaskScope;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::audit::generate_run_id;
use crate::stream::{payload, EventRecord, EventStream, EventType};

/// Status vocabulary droids report with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DroidStatus {
    Initializing,
    Ready,
    Executing,
    Waiting,
    Completed,
    Failed,
    Abandoned,
    Timeout,
}

impl DroidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroidStatus::Initializing => "initializing",
            DroidStatus::Ready => "ready",
            DroidStatus::Executing => "executing",
            DroidStatus::Waiting => "waiting",
            DroidStatus::Completed => "completed",
            DroidStatus::Failed => "failed",
            DroidStatus::Abandoned => "abandoned",
            DroidStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DroidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SelfReportChannel {
    stream: EventStream,
    identity: Identity,
    run_id: String,
}

impl SelfReportChannel {
    /// Bind to the self-report stream at `path`, resolving identity once.
    pub fn new(path: impl Into<PathBuf>, resolver: &dyn IdentityResolver) -> Self {
        Self {
            stream: EventStream::new(path),
            identity: resolver.resolve(),
            run_id: generate_run_id(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Write one status record. The record is returned even if the append
    /// failed; the failure is only logged.
    pub fn report_status(&self, status: &str, details: Value) -> EventRecord {
        let details = if details.is_null() { json!({}) } else { details };
        let record = EventRecord::new(
            EventType::DroidSelfReport,
            self.run_id.clone(),
            payload(json!({
                "agent_id": self.identity.agent_id,
                "execution_id": self.identity.execution_id,
                "status": status,
                "details": details,
            })),
        );
        if let Err(e) = self.stream.append(&record) {
            warn!(agent_id = %self.identity.agent_id, error = %e, "self report not persisted");
        }
        record
    }

    pub fn report(&self, status: DroidStatus, details: Value) -> EventRecord {
        self.report_status(status.as_str(), details)
    }

    pub fn report_task_start(&self, task_id: &str, description: &str, context: Option<Value>) -> EventRecord {
        self.report(
            DroidStatus::Executing,
            json!({
                "task_id": task_id,
                "task_description": description,
                "context": context.unwrap_or_else(|| json!({})),
                "report_type": "task_start",
            }),
        )
    }

    /// `progress` is clamped to `[0.0, 1.0]`.
    pub fn report_task_progress(&self, task_id: &str, progress: f64, message: Option<&str>) -> EventRecord {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Progress: {}%", (progress * 100.0) as u32));
        self.report(
            DroidStatus::Executing,
            json!({
                "task_id": task_id,
                "progress": progress,
                "message": message,
                "report_type": "progress",
            }),
        )
    }

    pub fn report_task_completion(&self, task_id: &str, result: Value, success: bool) -> EventRecord {
        let status = if success { DroidStatus::Completed } else { DroidStatus::Failed };
        self.report(
            status,
            json!({
                "task_id": task_id,
                "result": result,
                "success": success,
                "report_type": "task_completion",
            }),
        )
    }

    pub fn report_error(&self, task_id: &str, error: &str, context: Option<Value>) -> EventRecord {
        self.report(
            DroidStatus::Failed,
            json!({
                "task_id": task_id,
                "error": error,
                "context": context.unwrap_or_else(|| json!({})),
                "report_type": "error",
            }),
        )
    }

    pub fn report_resource_usage(
        &self,
        cpu_percent: Option<f64>,
        memory_mb: Option<f64>,
        disk_io_mb: Option<f64>,
    ) -> EventRecord {
        let mut details = json!({ "report_type": "resource_usage" });
        for (key, value) in [
            ("cpu_percent", cpu_percent),
            ("memory_mb", memory_mb),
            ("disk_io_mb", disk_io_mb),
        ] {
            if let Some(v) = value {
                details[key] = json!(v);
            }
        }
        self.report(DroidStatus::Executing, details)
    }

    /// Emit a start report and return a guard that reports completion when
    /// it goes out of scope.
    pub fn begin_task(&self, task_id: &str, description: &str) -> TaskScope<'_> {
        TaskScope::begin(self, task_id, description)
    }

    /// Run `work` inside a [`TaskScope`]. `Ok` values become the completion
    /// result; `Err` is reported as an error and a failed completion.
    pub fn run_task<T, E, F>(&self, task_id: &str, description: &str, work: F) -> Result<T, E>
    where
        T: Serialize,
        E: fmt::Display,
        F: FnOnce(&mut TaskScope<'_>) -> Result<T, E>,
    {
        let mut scope = self.begin_task(task_id, description);
        match work(&mut scope) {
            Ok(value) => {
                if let Ok(result) = serde_json::to_value(&value) {
                    if !result.is_null() {
                        scope.set_result(result);
                    }
                }
                scope.finish();
                Ok(value)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                Err(e)
            }
        }
    }
}
