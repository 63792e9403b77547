//! The persisted event record and its dotted event-type taxonomy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Dotted event-type namespace written to every stream.
///
/// Types this crate does not know about are kept verbatim in [`EventType::Other`]
/// so that records written by newer producers survive a read/write cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    AuditRecorded,
    TaskScheduled,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    DroidStarted,
    DroidCompleted,
    GitCommit,
    ExecutionStarted,
    ExecutionCompleted,
    ExecutionAbandoned,
    TaskResult,
    TaskResultValidated,
    DroidSelfReport,
    PerformanceMetrics,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::AuditRecorded => "audit.recorded",
            EventType::TaskScheduled => "task.scheduled",
            EventType::TaskStarted => "task.started",
            EventType::TaskCompleted => "task.completed",
            EventType::TaskFailed => "task.failed",
            EventType::DroidStarted => "droid.started",
            EventType::DroidCompleted => "droid.completed",
            EventType::GitCommit => "git.commit",
            EventType::ExecutionStarted => "task.execution.started",
            EventType::ExecutionCompleted => "task.execution.completed",
            EventType::ExecutionAbandoned => "task.execution.abandoned",
            EventType::TaskResult => "task.result",
            EventType::TaskResultValidated => "task.result.validated",
            EventType::DroidSelfReport => "droid.self_report",
            EventType::PerformanceMetrics => "performance.metrics",
            EventType::Other(s) => s,
        }
    }

    /// True for the two record kinds that close an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::ExecutionCompleted | EventType::ExecutionAbandoned
        )
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "audit.recorded" => EventType::AuditRecorded,
            "task.scheduled" => EventType::TaskScheduled,
            "task.started" => EventType::TaskStarted,
            "task.completed" => EventType::TaskCompleted,
            "task.failed" => EventType::TaskFailed,
            "droid.started" => EventType::DroidStarted,
            "droid.completed" => EventType::DroidCompleted,
            "git.commit" => EventType::GitCommit,
            "task.execution.started" => EventType::ExecutionStarted,
            "task.execution.completed" => EventType::ExecutionCompleted,
            "task.execution.abandoned" => EventType::ExecutionAbandoned,
            "task.result" => EventType::TaskResult,
            "task.result.validated" => EventType::TaskResultValidated,
            "droid.self_report" => EventType::DroidSelfReport,
            "performance.metrics" => EventType::PerformanceMetrics,
            other => EventType::Other(other.to_string()),
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|never| match never {}))
    }
}

// ---------------------------------------------------------------------------
// EventRecord
// ---------------------------------------------------------------------------

/// A single line in one of the streams.
///
/// The fixed header (`timestamp`, `event_type`, `run_id`) is followed by an
/// open payload that is flattened into the same JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// Older self-report lines were written without a run id.
    #[serde(default)]
    pub run_id: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(event_type: EventType, run_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            run_id: run_id.into(),
            payload,
        }
    }

    /// Raw payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Payload field as a string slice.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.str_field("execution_id")
    }

    pub fn task_id(&self) -> Option<&str> {
        self.str_field("task_id")
    }

    /// Agent id, accepting the legacy `droid_id` key.
    pub fn agent_id(&self) -> Option<&str> {
        self.str_field("agent_id")
            .or_else(|| self.str_field("droid_id"))
    }

    pub fn status(&self) -> Option<&str> {
        self.str_field("status")
    }
}

/// Build a payload map from a `json!` object literal. Non-objects yield an
/// empty map.
pub fn payload(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
