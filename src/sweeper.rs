//! Background abandonment of stale executions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::AuditLogger;
use crate::config::TrackerConfig;

/// Shortest accepted sweep period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Sweep `logger`'s tracker every `every`, abandoning executions that have
/// been active longer than `timeout`. Runs until the task is aborted.
/// `every` is raised to [`MIN_SWEEP_INTERVAL`] when shorter.
pub async fn run_sweep_loop(logger: Arc<AuditLogger>, every: Duration, timeout: Duration) {
    let every = every.max(MIN_SWEEP_INTERVAL);
    info!(
        every_secs = every.as_secs(),
        timeout_secs = timeout.as_secs(),
        "stale execution sweeper started"
    );

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let swept = logger.sweep_stale_executions(timeout);
        if swept.is_empty() {
            debug!("no stale executions");
        } else {
            info!(abandoned = swept.len(), "stale executions abandoned");
        }
    }
}

/// Spawn [`run_sweep_loop`] on the current runtime. Abort the returned
/// handle to stop it.
pub fn spawn_sweeper(logger: Arc<AuditLogger>, every: Duration, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(run_sweep_loop(logger, every, timeout))
}

/// [`spawn_sweeper`] with the interval and stale timeout from `config`.
pub fn spawn_configured(logger: Arc<AuditLogger>, config: &TrackerConfig) -> JoinHandle<()> {
    spawn_sweeper(logger, config.sweep_interval(), config.stale_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{EventStream, EventType};
    use crate::tracker::ExecutionTracker;

    async fn wait_until_idle(tracker: &ExecutionTracker) -> bool {
        for _ in 0..300 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if tracker.active().is_empty() {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_sweeper_abandons_stale_execution() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracker = Arc::new(ExecutionTracker::new());
        let logger = Arc::new(AuditLogger::new(dir.path(), tracker.clone()).unwrap());

        let id = logger.log_execution_started("T1", "A1", "long task");
        let handle = spawn_sweeper(logger.clone(), Duration::from_millis(10), Duration::ZERO);

        let swept = wait_until_idle(&tracker).await;
        handle.abort();
        assert!(swept, "sweeper never abandoned the execution");

        let abandoned: Vec<_> = EventStream::new(&logger.paths().events)
            .load()
            .into_iter()
            .filter(|r| r.event_type == EventType::ExecutionAbandoned)
            .collect();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].execution_id(), Some(id.as_str()));
        assert_eq!(abandoned[0].str_field("reason"), Some("timeout"));
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let dir = tempfile::TempDir::new().unwrap();
        let tracker = Arc::new(ExecutionTracker::new());
        let logger = Arc::new(AuditLogger::new(dir.path(), tracker.clone()).unwrap());

        logger.log_execution_started("T1", "A1", "stale");
        let handle = spawn_sweeper(logger, Duration::ZERO, Duration::ZERO);

        let swept = wait_until_idle(&tracker).await;
        assert!(!handle.is_finished(), "sweeper task exited");
        handle.abort();
        assert!(swept);
    }

    #[tokio::test]
    async fn test_spawn_configured_uses_tracker_section() {
        let dir = tempfile::TempDir::new().unwrap();
        let config: TrackerConfig =
            toml::from_str("sweep_interval_secs = 0\nstale_timeout_secs = 0\n").unwrap();
        let tracker = Arc::new(ExecutionTracker::from_config(&config));
        let logger = Arc::new(AuditLogger::new(dir.path(), tracker.clone()).unwrap());

        logger.log_execution_started("T1", "A1", "stale");
        let handle = spawn_configured(logger, &config);
        let swept = wait_until_idle(&tracker).await;
        handle.abort();
        assert!(swept);
    }
}
