use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use droidtrack::analysis::ExecutionAnalyzer;
use droidtrack::config::{DroidtrackConfig, LoggingConfig};
use droidtrack::selfreport::{EnvIdentity, SelfReportChannel};
use droidtrack::stream::LogPaths;

#[derive(Parser)]
#[command(
    name = "droidtrack",
    about = "Execution tracking and audit analysis for droid task runners",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $DROIDTRACK_CONFIG, then ./droidtrack.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root the logs directory is resolved against
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the logs directory and print a JSON report
    Analyze {
        /// Print only one section of the report
        #[arg(long, value_enum, default_value = "all")]
        section: Section,
    },

    /// Print events from the last N hours
    Recent {
        #[arg(long)]
        hours: Option<u64>,
    },

    /// Write a self-report for the droid running in this environment
    Report {
        /// Status to report (executing, completed, failed, ...)
        #[arg(long)]
        status: String,

        #[arg(long)]
        task_id: Option<String>,

        /// Progress between 0.0 and 1.0; writes an `executing` progress report
        #[arg(long, requires = "task_id")]
        progress: Option<f64>,

        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Section {
    All,
    Executions,
    Agents,
    Results,
    Issues,
    Tasks,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DroidtrackConfig::load(path)
            .with_context(|| format!("could not load --config {}", path.display()))?,
        None => DroidtrackConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    let logs_dir = config.logs_dir(&cli.project_dir);
    tracing::debug!(logs_dir = %logs_dir.display(), "resolved logs directory");

    match cli.command {
        Commands::Analyze { section } => {
            let analyzer = ExecutionAnalyzer::new(&logs_dir).with_config(config.analyzer.clone());
            let report = analyzer.analyze();
            match section {
                Section::All => print_json(&report)?,
                Section::Executions => print_json(&report.execution_patterns)?,
                Section::Agents => print_json(&report.agent_performance)?,
                Section::Results => print_json(&report.result_patterns)?,
                Section::Issues => print_json(&report.performance_issues)?,
                Section::Tasks => print_json(&report.task_events)?,
            }
        }
        Commands::Recent { hours } => {
            let hours = hours.unwrap_or(config.analyzer.recent_hours);
            let analyzer = ExecutionAnalyzer::new(&logs_dir).with_config(config.analyzer.clone());
            print_json(&analyzer.recent_activity(hours))?;
        }
        Commands::Report {
            status,
            task_id,
            progress,
            message,
        } => {
            let identity = EnvIdentity::new(&resolve(&cli.project_dir, &config.logs.state_dir));
            let channel = SelfReportChannel::new(LogPaths::in_dir(&logs_dir).self_report, &identity);
            tracing::info!(agent_id = %channel.identity().agent_id, %status, "writing self report");

            let record = match (task_id.as_deref(), progress) {
                (Some(task_id), Some(progress)) => {
                    channel.report_task_progress(task_id, progress, message.as_deref())
                }
                _ => {
                    let mut details = json!({});
                    if let Some(task_id) = &task_id {
                        details["task_id"] = json!(task_id);
                    }
                    if let Some(message) = &message {
                        details["message"] = json!(message);
                    }
                    channel.report_status(&status, details)
                }
            };
            print_json(&record)?;
        }
    }

    Ok(())
}
