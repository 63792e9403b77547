//! droidtrack -- execution tracking and audit logging for droid task runners.
//!
//! Droids (automated agents) execute tasks. This crate records every
//! execution's lifecycle to append-only NDJSON streams, keeps live per-agent
//! metrics in memory, lets running droids self-report, and analyzes the
//! persisted streams offline to flag abandoned, stuck, or underperforming work.
//!
//! - [`stream`]: append-only NDJSON channels
//! - [`tracker`]: in-memory execution state machine and agent metrics
//! - [`audit`]: the recording facade over tracker and streams
//! - [`selfreport`]: advisory status reports written by droids
//! - [`analysis`]: offline reports and anomaly detection
//! - [`sweeper`]: periodic abandonment of stale executions

pub mod analysis;
pub mod audit;
pub mod config;
pub mod selfreport;
pub mod stream;
pub mod sweeper;
pub mod tracker;

pub use analysis::{AnalysisReport, ExecutionAnalyzer, Issue, Severity};
pub use audit::{AuditLogger, ResultCategory};
pub use config::DroidtrackConfig;
pub use selfreport::{DroidStatus, EnvIdentity, IdentityResolver, SelfReportChannel, TaskScope};
pub use stream::{EventRecord, EventStream, EventType, LogPaths};
pub use tracker::{Execution, ExecutionStatus, ExecutionTracker};
