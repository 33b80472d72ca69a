//! `handoff.toml` loading.
//!
//! Every key is optional. Relative paths are resolved against the directory
//! holding the config file, and `workspace_root` anchors the default state and
//! registry locations.

use handoff_core::{HandoffError, HandoffResult};
use handoff_orchestrator::PatternDef;
use handoff_session::{STATE_DIR, STATE_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "handoff.toml";
pub const REGISTRY_FILE: &str = "agents.toml";

#[derive(Debug, Deserialize)]
pub struct HandoffConfig {
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Defaults to `<workspace_root>/.handoff/state.json`.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
    /// Defaults to `<workspace_root>/.handoff/agents.toml`.
    #[serde(default)]
    pub registry_path: Option<PathBuf>,
    #[serde(default)]
    pub fallback_executor: Option<String>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Custom decomposition patterns, tried before the built-ins.
    #[serde(default)]
    pub patterns: Vec<PatternDef>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_depth")]
    pub depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            depth: default_history_depth(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Program and arguments; run from the workspace root.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            command: vec![],
            timeout_secs: default_health_timeout(),
        }
    }
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            state_path: None,
            registry_path: None,
            fallback_executor: None,
            history: HistoryConfig::default(),
            health: HealthConfig::default(),
            patterns: vec![],
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_history_depth() -> usize {
    50
}
fn default_health_timeout() -> u64 {
    120
}

impl HandoffConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> HandoffResult<Self> {
        toml::from_str(text)
            .map_err(|e| HandoffError::Config(format!("Invalid config {}: {e}", path.display())))
    }

    /// Read `path`. A missing file is only an error when `required` is set.
    pub async fn load(path: &Path, required: bool) -> HandoffResult<Self> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text, path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(HandoffError::Config(format!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                )))
            }
        };
        config.rebase(base);
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        self.workspace_root = base.join(&self.workspace_root);
        if let Some(p) = self.state_path.take() {
            self.state_path = Some(base.join(p));
        }
        if let Some(p) = self.registry_path.take() {
            self.registry_path = Some(base.join(p));
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(STATE_DIR).join(STATE_FILE))
    }

    pub fn registry_file(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join(STATE_DIR).join(REGISTRY_FILE))
    }
}
