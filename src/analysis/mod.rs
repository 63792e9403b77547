//! Offline analysis of a logs directory.
//!
//! The analyzer never writes. It rebuilds execution lifecycles from the
//! persisted streams, joining records by `execution_id` only, so interleaved
//! writes from several processes are handled the same as a single writer.

pub mod issues;
pub mod model;
pub mod stats;
pub mod tasks;

pub use issues::{Issue, IssueKind, Severity};
pub use model::{
    AgentPerformance, AnalysisReport, DataSummary, ExecutionDuration, ExecutionPatterns,
    ResultPatterns,
};
pub use stats::DurationStats;
pub use tasks::TaskEventSummary;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::AnalyzerConfig;
use crate::stream::{EventRecord, EventStream, EventType, LogPaths};
use crate::tracker::{elapsed_seconds, ExecutionStatus};

/// Agent id used when neither the terminal nor the start record names one.
pub const UNKNOWN_AGENT: &str = "unknown";

/// Largest look-back accepted by [`ExecutionAnalyzer::recent_activity`].
const MAX_LOOKBACK_HOURS: u64 = 1_000_000;

// ---------------------------------------------------------------------------
// Loaded data
// ---------------------------------------------------------------------------

/// Every decodable record from the five streams.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub events: Vec<EventRecord>,
    pub results: Vec<EventRecord>,
    pub performance: Vec<EventRecord>,
    pub audit: Vec<EventRecord>,
    pub self_reports: Vec<EventRecord>,
    pub malformed_lines: usize,
}

impl Dataset {
    /// Missing files load as empty streams.
    pub fn load(paths: &LogPaths) -> Self {
        let mut malformed = 0;
        let mut read = |path: &Path| {
            let mut records = EventStream::new(path).iter();
            let loaded: Vec<EventRecord> = records.by_ref().collect();
            malformed += records.skipped();
            loaded
        };

        let events = read(paths.events.as_path());
        let results = read(paths.results.as_path());
        let performance = read(paths.performance.as_path());
        let audit = read(paths.audit.as_path());
        let self_reports = read(paths.self_report.as_path());

        Self {
            events,
            results,
            performance,
            audit,
            self_reports,
            malformed_lines: malformed,
        }
    }

    pub fn summary(&self) -> DataSummary {
        DataSummary {
            events_loaded: self.events.len(),
            results_loaded: self.results.len(),
            performance_metrics_loaded: self.performance.len(),
            audit_entries_loaded: self.audit.len(),
            self_reports_loaded: self.self_reports.len(),
            malformed_lines_skipped: self.malformed_lines,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle index
// ---------------------------------------------------------------------------

/// Start and terminal record per execution id. Duplicates resolve to the
/// earliest timestamp, matching the tracker's first-terminal-wins rule.
struct Lifecycles<'a> {
    started: HashMap<&'a str, &'a EventRecord>,
    terminal: HashMap<&'a str, &'a EventRecord>,
}

impl<'a> Lifecycles<'a> {
    fn index(events: &'a [EventRecord]) -> Self {
        let mut started = HashMap::new();
        let mut terminal = HashMap::new();
        for record in events {
            let target = match record.event_type {
                EventType::ExecutionStarted => &mut started,
                ref t if t.is_terminal() => &mut terminal,
                _ => continue,
            };
            let Some(id) = record.execution_id() else { continue };
            keep_earliest(target, id, record);
        }
        Self { started, terminal }
    }

    fn terminals_in_order(&self) -> Vec<(&'a str, &'a EventRecord)> {
        let mut out: Vec<_> = self.terminal.iter().map(|(id, r)| (*id, *r)).collect();
        out.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(b.0)));
        out
    }

    /// Started ids with no terminal record, oldest start first.
    fn stuck(&self) -> Vec<String> {
        let mut stuck: Vec<(&'a str, &'a EventRecord)> = self
            .started
            .iter()
            .filter(|(id, _)| !self.terminal.contains_key(*id))
            .map(|(id, r)| (*id, *r))
            .collect();
        stuck.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(b.0)));
        stuck.into_iter().map(|(id, _)| id.to_string()).collect()
    }

    fn duration(&self, id: &str, terminal: &EventRecord) -> Option<f64> {
        self.started
            .get(id)
            .map(|start| elapsed_seconds(start.timestamp, terminal.timestamp))
    }

    fn agent_for(&self, id: &str, terminal: &'a EventRecord) -> &'a str {
        terminal
            .agent_id()
            .or_else(|| self.started.get(id).copied().and_then(EventRecord::agent_id))
            .unwrap_or(UNKNOWN_AGENT)
    }
}

fn keep_earliest<'a>(map: &mut HashMap<&'a str, &'a EventRecord>, id: &'a str, record: &'a EventRecord) {
    let keep_existing = map
        .get(id)
        .is_some_and(|existing| existing.timestamp <= record.timestamp);
    if keep_existing {
        debug!(execution_id = id, event_type = %record.event_type, "duplicate lifecycle record ignored");
    } else {
        map.insert(id, record);
    }
}

/// Outcome carried by a terminal record.
fn terminal_status(record: &EventRecord) -> ExecutionStatus {
    if record.event_type == EventType::ExecutionAbandoned {
        return ExecutionStatus::Abandoned;
    }
    match record.status() {
        Some("failed") => ExecutionStatus::Failed,
        Some("completed") => ExecutionStatus::Completed,
        _ => {
            let success = record
                .field("success")
                .or_else(|| record.field("result").and_then(|r| r.get("success")))
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            ExecutionStatus::from_success(success)
        }
    }
}

fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Batch analyzer over the streams of one logs directory.
#[derive(Debug, Clone)]
pub struct ExecutionAnalyzer {
    logs_dir: PathBuf,
    paths: LogPaths,
    config: AnalyzerConfig,
}

impl ExecutionAnalyzer {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        let logs_dir = logs_dir.into();
        Self {
            paths: LogPaths::in_dir(&logs_dir),
            logs_dir,
            config: AnalyzerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn load(&self) -> Dataset {
        Dataset::load(&self.paths)
    }

    /// Load every stream and build the full report.
    pub fn analyze(&self) -> AnalysisReport {
        let dataset = self.load();
        self.analyze_dataset(&dataset, Utc::now())
    }

    /// Build the report from already loaded records. `now` anchors the
    /// recent-activity window.
    pub fn analyze_dataset(&self, data: &Dataset, now: DateTime<Utc>) -> AnalysisReport {
        let lifecycles = Lifecycles::index(&data.events);
        let stuck = lifecycles.stuck();

        let execution_patterns = self.execution_patterns(&lifecycles, stuck.len());
        let agent_performance = self.agent_performance(&lifecycles, data);
        let performance_issues =
            issues::detect_issues(&self.config, &execution_patterns, &agent_performance, &stuck);

        let tail_start = data.events.len().saturating_sub(self.config.recent_window);
        let recent_activity = filter_recent(
            data.events[tail_start..].iter().cloned(),
            self.config.recent_hours,
            now,
        );

        info!(
            logs_dir = %self.logs_dir.display(),
            events = data.events.len(),
            started = execution_patterns.total_executions_started,
            stuck = stuck.len(),
            issues = performance_issues.len(),
            "analysis complete"
        );

        AnalysisReport {
            report_generated_at: now,
            logs_dir: self.logs_dir.clone(),
            data_summary: data.summary(),
            execution_patterns,
            agent_performance,
            result_patterns: result_patterns(&data.results),
            task_events: tasks::summarize(&data.events, &data.audit),
            performance_issues,
            recent_activity,
        }
    }

    /// Events from the trailing `recent_window` records of the events
    /// stream that are newer than `now - hours`.
    pub fn recent_activity(&self, hours: u64) -> Vec<EventRecord> {
        self.recent_activity_at(hours, Utc::now())
    }

    pub fn recent_activity_at(&self, hours: u64, now: DateTime<Utc>) -> Vec<EventRecord> {
        let window = self.config.recent_window;
        let mut tail = VecDeque::with_capacity(window);
        if window > 0 {
            for record in EventStream::new(&self.paths.events).iter() {
                if tail.len() == window {
                    tail.pop_front();
                }
                tail.push_back(record);
            }
        }
        filter_recent(tail.into_iter(), hours, now)
    }

    fn execution_patterns(&self, lifecycles: &Lifecycles<'_>, stuck: usize) -> ExecutionPatterns {
        let mut completed = 0;
        let mut abandoned = 0;
        let mut unmatched = 0;
        let mut timed = Vec::new();

        for (id, terminal) in lifecycles.terminals_in_order() {
            let status = terminal_status(terminal);
            if status == ExecutionStatus::Abandoned {
                abandoned += 1;
            } else {
                completed += 1;
            }
            match lifecycles.duration(id, terminal) {
                Some(duration_seconds) => timed.push(ExecutionDuration {
                    execution_id: id.to_string(),
                    agent_id: lifecycles.agent_for(id, terminal).to_string(),
                    task_id: terminal
                        .task_id()
                        .or_else(|| lifecycles.started.get(id).and_then(|s| s.task_id()))
                        .map(str::to_string),
                    status,
                    duration_seconds,
                }),
                None => unmatched += 1,
            }
        }

        let started = lifecycles.started.len();
        let durations: Vec<f64> = timed.iter().map(|e| e.duration_seconds).collect();

        let mut longest = timed.clone();
        longest.sort_by(|a, b| b.duration_seconds.total_cmp(&a.duration_seconds));
        longest.truncate(self.config.longest_execution_limit);
        timed.truncate(self.config.execution_detail_limit);

        ExecutionPatterns {
            total_executions_started: started,
            total_executions_completed: completed,
            total_executions_abandoned: abandoned,
            unmatched_terminals: unmatched,
            stuck_executions: stuck,
            completion_rate: rate(completed, started),
            abandonment_rate: rate(abandoned, started),
            duration_stats: DurationStats::from_samples(&durations),
            execution_details: timed,
            longest_executions: longest,
        }
    }

    fn agent_performance(
        &self,
        lifecycles: &Lifecycles<'_>,
        data: &Dataset,
    ) -> BTreeMap<String, AgentPerformance> {
        let mut agents: BTreeMap<String, AgentPerformance> = BTreeMap::new();

        for start in lifecycles.started.values() {
            let agent = start.agent_id().unwrap_or(UNKNOWN_AGENT);
            let perf = agents.entry(agent.to_string()).or_default();
            perf.executions_started += 1;
            perf.seen(start.timestamp);
        }

        for (id, terminal) in lifecycles.terminals_in_order() {
            let agent = lifecycles.agent_for(id, terminal);
            let perf = agents.entry(agent.to_string()).or_default();
            perf.record(terminal_status(terminal), lifecycles.duration(id, terminal));
            perf.seen(terminal.timestamp);
        }

        let reports = data
            .self_reports
            .iter()
            .chain(data.events.iter())
            .filter(|r| r.event_type == EventType::DroidSelfReport);
        for report in reports {
            let agent = report.agent_id().unwrap_or(UNKNOWN_AGENT);
            let perf = agents.entry(agent.to_string()).or_default();
            perf.self_reports += 1;
            perf.seen(report.timestamp);
        }

        agents
    }
}

fn filter_recent(
    records: impl Iterator<Item = EventRecord>,
    hours: u64,
    now: DateTime<Utc>,
) -> Vec<EventRecord> {
    let cutoff = now - Duration::hours(hours.min(MAX_LOOKBACK_HOURS) as i64);
    records.filter(|r| r.timestamp > cutoff).collect()
}

fn result_patterns(results: &[EventRecord]) -> ResultPatterns {
    let mut patterns = ResultPatterns::default();

    let mut outcome: HashMap<&str, bool> = HashMap::new();
    for record in results.iter().filter(|r| r.event_type == EventType::TaskResult) {
        let success = record.field("success").and_then(|v| v.as_bool()).unwrap_or(true);
        if success {
            patterns.successful_results += 1;
        } else {
            patterns.failed_results += 1;
        }
        if let Some(id) = record.execution_id() {
            outcome.entry(id).or_insert(success);
        }
    }

    for record in results.iter().filter(|r| r.event_type == EventType::TaskResultValidated) {
        patterns.total_validated_results += 1;
        let category = record.str_field("category").unwrap_or("unknown");
        *patterns.result_categories.entry(category.to_string()).or_default() += 1;

        let success = record
            .execution_id()
            .and_then(|id| outcome.get(id).copied())
            .unwrap_or(category != "error");
        let bucket = if success {
            &mut patterns.success_by_category
        } else {
            &mut patterns.errors_by_category
        };
        *bucket.entry(category.to_string()).or_default() += 1;
    }

    patterns.validation_rate = rate(patterns.total_validated_results, results.len());
    patterns
}
