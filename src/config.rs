//! TOML configuration for droidtrack.
//!
//! Every section has compiled-in defaults, so an empty file (or no file at
//! all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "DROIDTRACK_CONFIG";
/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "droidtrack.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DroidtrackConfig {
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DroidtrackConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded droidtrack configuration");
        Ok(config)
    }

    /// Try, in order: `$DROIDTRACK_CONFIG`, `./droidtrack.toml`, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "DROIDTRACK_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(path = %local.display(), error = %e, "local config could not be loaded, using defaults");
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Logs directory resolved against `project_root` when relative.
    pub fn logs_dir(&self, project_root: &Path) -> PathBuf {
        if self.logs.dir.is_absolute() {
            self.logs.dir.clone()
        } else {
            project_root.join(&self.logs.dir)
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the streams live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Directory holding the `.ndjson` streams, relative to the project root.
    pub dir: PathBuf,
    /// Directory holding `current_execution.json` for self-report identity.
    pub state_dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".factory/logs"),
            state_dir: PathBuf::from(".factory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Finalized executions kept in memory.
    pub history_limit: usize,
    /// Trailing history entries scanned for `recent_failures`.
    pub recent_failure_window: usize,
    /// Active executions older than this are abandoned by the sweeper.
    pub stale_timeout_secs: u64,
    /// How often the sweeper runs.
    pub sweep_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_limit: crate::tracker::DEFAULT_HISTORY_LIMIT,
            recent_failure_window: crate::tracker::DEFAULT_RECENT_FAILURE_WINDOW,
            stale_timeout_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl TrackerConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Thresholds and window sizes for offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Abandonment rate above which a warning is raised.
    pub abandonment_warning_rate: f64,
    /// Agents need more than this many executions to be judged.
    pub min_agent_executions: u64,
    /// Success rate below which an agent is flagged.
    pub poor_success_rate: f64,
    /// Stuck execution ids listed in a report.
    pub stuck_sample_size: usize,
    /// Trailing events considered by `recent_activity`.
    pub recent_window: usize,
    /// Default look-back for `recent_activity`.
    pub recent_hours: u64,
    pub execution_detail_limit: usize,
    pub longest_execution_limit: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            abandonment_warning_rate: 0.1,
            min_agent_executions: 2,
            poor_success_rate: 0.5,
            stuck_sample_size: 5,
            recent_window: 100,
            recent_hours: 24,
            execution_detail_limit: 20,
            longest_execution_limit: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
