//! Resolving which execution and agent a self-report belongs to.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

pub const EXECUTION_ID_VAR: &str = "DROID_EXECUTION_ID";
pub const AGENT_ID_VAR: &str = "DROID_ID";
pub const SCRIPT_NAME_VAR: &str = "SCRIPT_NAME";
pub const SIDECAR_FILE: &str = "current_execution.json";
pub const UNKNOWN_AGENT: &str = "unknown-droid";

/// Attribution attached to every self-report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub execution_id: Option<String>,
    pub agent_id: String,
}

impl Identity {
    pub fn new(agent_id: impl Into<String>, execution_id: Option<String>) -> Self {
        Self {
            execution_id,
            agent_id: agent_id.into(),
        }
    }
}

/// Strategy for discovering an [`Identity`].
pub trait IdentityResolver {
    fn resolve(&self) -> Identity;
}

/// Identity supplied explicitly by the caller.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Identity);

impl IdentityResolver for StaticIdentity {
    fn resolve(&self) -> Identity {
        self.0.clone()
    }
}

/// Identity taken from the process environment, falling back to a sidecar
/// tracking file for the execution id.
///
/// Lookup order:
/// - execution id: `DROID_EXECUTION_ID`, then `execution_id` in the sidecar file
/// - agent id: `DROID_ID`, then the stem of `SCRIPT_NAME`, then `unknown-droid`
#[derive(Debug, Clone)]
pub struct EnvIdentity {
    sidecar: PathBuf,
}

#[derive(Deserialize)]
struct Sidecar {
    execution_id: Option<String>,
}

impl EnvIdentity {
    /// `state_dir` is the directory holding `current_execution.json`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            sidecar: state_dir.join(SIDECAR_FILE),
        }
    }

    /// Resolve with a custom variable lookup.
    pub fn resolve_with<F>(&self, lookup: F) -> Identity
    where
        F: Fn(&str) -> Option<String>,
    {
        let execution_id = lookup(EXECUTION_ID_VAR)
            .filter(|v| !v.is_empty())
            .or_else(|| self.read_sidecar());

        let agent_id = lookup(AGENT_ID_VAR)
            .filter(|v| !v.is_empty())
            .or_else(|| lookup(SCRIPT_NAME_VAR).and_then(|s| script_stem(&s)))
            .unwrap_or_else(|| UNKNOWN_AGENT.to_string());

        Identity {
            execution_id,
            agent_id,
        }
    }

    fn read_sidecar(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.sidecar).ok()?;
        match serde_json::from_str::<Sidecar>(&content) {
            Ok(sidecar) => sidecar.execution_id,
            Err(e) => {
                debug!(path = %self.sidecar.display(), error = %e, "ignoring unreadable sidecar");
                None
            }
        }
    }
}

impl IdentityResolver for EnvIdentity {
    fn resolve(&self) -> Identity {
        self.resolve_with(|key| std::env::var(key).ok())
    }
}

/// `/opt/droids/reviewer.md` -> `reviewer`
fn script_stem(script: &str) -> Option<String> {
    let name = Path::new(script).file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".md")
        .or_else(|| name.strip_suffix(".py"))
        .unwrap_or(name);
    (!stem.is_empty()).then(|| stem.to_string())
}
