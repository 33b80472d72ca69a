use crate::state::OrchestrationState;
use async_trait::async_trait;
use chrono::Utc;
use handoff_core::{write_atomic, HandoffError, HandoffResult};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory under the workspace root that holds router state.
pub const STATE_DIR: &str = ".handoff";
/// File name of the persisted state inside [`STATE_DIR`].
pub const STATE_FILE: &str = "state.json";

/// What `reset` did with the existing state file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// There was no state file.
    Absent,
    /// A readable state file was removed.
    Removed,
    /// An unreadable state file was kept under this path.
    MovedAside(PathBuf),
}

/// Persistence for [`OrchestrationState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state; an absent file yields a fresh state.
    async fn load(&self) -> HandoffResult<OrchestrationState>;
    /// Persist `state`. `last_updated` is stamped only once the write succeeds.
    async fn save(&self, state: &mut OrchestrationState) -> HandoffResult<()>;
    /// Discard the current state so the next load starts fresh.
    async fn reset(&self) -> HandoffResult<ResetOutcome>;
}

/// Single JSON state file, replaced atomically on every save.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location inside a workspace: `<root>/.handoff/state.json`.
    pub fn in_workspace(root: &Path) -> Self {
        Self::new(root.join(STATE_DIR).join(STATE_FILE))
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".corrupt");
        self.path.with_file_name(name)
    }

    async fn read_existing(&self) -> HandoffResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HandoffError::Io(e)),
        }
    }

    fn parse(&self, data: &str) -> HandoffResult<OrchestrationState> {
        serde_json::from_str(data).map_err(|e| HandoffError::StateCorruption {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> HandoffResult<OrchestrationState> {
        match self.read_existing().await? {
            Some(data) => self.parse(&data),
            None => {
                info!(path = %self.path.display(), "No state file, starting fresh");
                Ok(OrchestrationState::new())
            }
        }
    }

    async fn save(&self, state: &mut OrchestrationState) -> HandoffResult<()> {
        if let Some(data) = self.read_existing().await? {
            match self.parse(&data) {
                Ok(on_disk) if on_disk.last_updated != state.last_updated => warn!(
                    path = %self.path.display(),
                    expected = ?state.last_updated,
                    found = ?on_disk.last_updated,
                    "State changed on disk since it was loaded (concurrent invocation?); overwriting"
                ),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Overwriting unreadable state file"),
            }
        }

        let mut stamped = state.clone();
        stamped.last_updated = Some(Utc::now());
        let json = serde_json::to_string_pretty(&stamped)?;
        write_atomic(&self.path, &json).await?;
        state.last_updated = stamped.last_updated;
        Ok(())
    }

    async fn reset(&self) -> HandoffResult<ResetOutcome> {
        let Some(data) = self.read_existing().await? else {
            return Ok(ResetOutcome::Absent);
        };
        if self.parse(&data).is_ok() {
            tokio::fs::remove_file(&self.path).await?;
            info!(path = %self.path.display(), "State cleared");
            return Ok(ResetOutcome::Removed);
        }
        let aside = self.corrupt_path();
        tokio::fs::rename(&self.path, &aside).await?;
        warn!(path = %aside.display(), "Corrupt state moved aside");
        Ok(ResetOutcome::MovedAside(aside))
    }
}
