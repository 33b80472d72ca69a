use async_trait::async_trait;
use handoff_core::HandoffResult;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

/// Prefix of the line an executor echoes into history when it finishes a subtask.
pub const COMPLETION_MARKER: &str = "Subtask-Complete:";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Subtask-Complete:\s*([A-Za-z0-9_]+)").expect("valid regex")
});

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// The exact line that marks `subtask_id` complete.
pub fn completion_marker(subtask_id: &str) -> String {
    format!("{COMPLETION_MARKER} {subtask_id}")
}

/// One history record, most recent first when returned by a [`HistorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Source-specific identifier (a commit hash for git).
    pub id: String,
    /// Full message, subject and body.
    pub text: String,
}

impl HistoryEntry {
    /// Entry with the given id and text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Subtask ids named by completion marker lines, in order of appearance.
    pub fn tags(&self) -> Vec<&str> {
        MARKER
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect()
    }

    /// The text contains `id` as a whole token (not as part of a longer id).
    pub fn mentions(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        let is_id_char = |c: char| c.is_ascii_alphanumeric() || c == '_';
        self.text.match_indices(id).any(|(start, _)| {
            let before = self.text[..start].chars().next_back();
            let after = self.text[start + id.len()..].chars().next();
            !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
        })
    }
}

/// A read-only, reverse-chronological log of completed work.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn recent(&self) -> HandoffResult<Vec<HistoryEntry>>;
}

/// Commit messages of the workspace repository.
pub struct GitHistory {
    repo: PathBuf,
    depth: usize,
}

impl GitHistory {
    /// Read up to `depth` commits from the repository at `repo`.
    pub fn new(repo: impl Into<PathBuf>, depth: usize) -> Self {
        Self {
            repo: repo.into(),
            depth,
        }
    }
}

#[async_trait]
impl HistorySource for GitHistory {
    /// Never fails: a missing repository or git binary yields an empty history.
    async fn recent(&self) -> HandoffResult<Vec<HistoryEntry>> {
        let depth = format!("--max-count={}", self.depth);
        let format = format!("--format=%H{FIELD_SEP}%B{RECORD_SEP}");
        let args = ["log", depth.as_str(), format.as_str()];
        debug!(args = ?args, dir = %self.repo.display(), "Running git command");

        let output = match Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Could not run git; continuing without history");
                return Ok(Vec::new());
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                dir = %self.repo.display(),
                stderr = %stderr.trim(),
                "No readable git history; continuing without it"
            );
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_log(&stdout))
    }
}

fn parse_log(stdout: &str) -> Vec<HistoryEntry> {
    stdout
        .split(RECORD_SEP)
        .filter_map(|record| {
            let (hash, body) = record.trim_start().split_once(FIELD_SEP)?;
            Some(HistoryEntry::new(hash.trim(), body.trim()))
        })
        .collect()
}

/// Fixed history, for tests and for running without a repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    entries: Vec<HistoryEntry>,
}

impl MemoryHistory {
    /// `entries` must already be most recent first.
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    async fn recent(&self) -> HandoffResult<Vec<HistoryEntry>> {
        Ok(self.entries.clone())
    }
}
