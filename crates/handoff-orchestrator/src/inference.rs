use handoff_core::{HandoffError, HandoffResult, Subtask, SubtaskGraph};
use handoff_session::{HistoryEntry, OrchestrationState};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static START_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:start(?:s|ed|ing)?|begin(?:s|ning)?|wip|work in progress)\b")
        .expect("valid regex")
});

/// What a scan of the history log concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    /// `subtask_id` was marked complete on the evidence of history entry `entry_id`.
    Matched { subtask_id: String, entry_id: String },
    /// No entry referred to an incomplete subtask.
    NoMatch,
}

/// Result of one inference pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceReport {
    /// Whether a completion was inferred, and from which entry.
    pub outcome: InferenceOutcome,
    /// Entries skipped because they mention several incomplete subtasks.
    pub ambiguous: Vec<AmbiguousEntry>,
}

/// An untagged history entry naming more than one incomplete subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousEntry {
    /// Id of the history entry (a commit hash for git).
    pub entry_id: String,
    /// Incomplete subtask ids it mentions, in graph order.
    pub candidates: Vec<String>,
}

impl InferenceReport {
    /// The subtask id marked complete, if any.
    pub fn inferred(&self) -> Option<&str> {
        match &self.outcome {
            InferenceOutcome::Matched { subtask_id, .. } => Some(subtask_id),
            InferenceOutcome::NoMatch => None,
        }
    }
}

impl fmt::Display for InferenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            InferenceOutcome::Matched {
                subtask_id,
                entry_id,
            } => write!(f, "inferred '{subtask_id}' complete from history entry {entry_id}")?,
            InferenceOutcome::NoMatch => write!(f, "could not infer, resuming from state")?,
        }
        if !self.ambiguous.is_empty() {
            write!(f, " ({} ambiguous entries skipped)", self.ambiguous.len())?;
        }
        Ok(())
    }
}

fn active_graph(state: &OrchestrationState) -> HandoffResult<&SubtaskGraph> {
    state.graph.as_ref().ok_or_else(|| {
        HandoffError::Session("No decomposed work item is active; run `handoff select` first".into())
    })
}

/// Find the most recent history evidence of an incomplete subtask finishing.
///
/// `history` must be most recent first. Tagged entries (completion marker
/// lines) are trusted at any depth. Untagged text is only read from the most
/// recent entry, which counts when it mentions exactly one incomplete subtask
/// id and does not announce starting it.
pub fn scan_history(
    graph: &SubtaskGraph,
    completed: &BTreeSet<String>,
    history: &[HistoryEntry],
) -> InferenceReport {
    let incomplete: Vec<&str> = graph
        .subtasks()
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| !completed.contains(*id))
        .collect();
    let mut ambiguous = Vec::new();

    for (depth, entry) in history.iter().enumerate() {
        let tags = entry.tags();
        if !tags.is_empty() {
            if let Some(hit) = tags.into_iter().find(|t| incomplete.contains(t)) {
                return InferenceReport {
                    outcome: InferenceOutcome::Matched {
                        subtask_id: hit.to_string(),
                        entry_id: entry.id.clone(),
                    },
                    ambiguous,
                };
            }
            continue;
        }
        if depth > 0 {
            continue;
        }

        let mentioned: Vec<&str> = incomplete
            .iter()
            .copied()
            .filter(|id| entry.mentions(id))
            .collect();
        match mentioned.as_slice() {
            [] => {}
            [only] if START_WORDING.is_match(&entry.text) => {
                debug!(entry = %entry.id, subtask = %only, "Entry announces work starting, not finishing");
            }
            [only] => {
                return InferenceReport {
                    outcome: InferenceOutcome::Matched {
                        subtask_id: (*only).to_string(),
                        entry_id: entry.id.clone(),
                    },
                    ambiguous,
                };
            }
            several => {
                warn!(entry = %entry.id, candidates = ?several, "Ambiguous history entry skipped");
                ambiguous.push(AmbiguousEntry {
                    entry_id: entry.id.clone(),
                    candidates: several.iter().map(|s| (*s).to_string()).collect(),
                });
            }
        }
    }

    InferenceReport {
        outcome: InferenceOutcome::NoMatch,
        ambiguous,
    }
}

/// Scan `history`, record at most one inferred completion in `state`.
pub fn infer_completion(
    state: &mut OrchestrationState,
    history: &[HistoryEntry],
) -> HandoffResult<InferenceReport> {
    let report = scan_history(active_graph(state)?, &state.completed_subtask_ids, history);
    match report.inferred() {
        Some(id) => {
            state.mark_complete(id)?;
            info!(subtask = %id, "{report}");
        }
        None => info!("{report}"),
    }
    Ok(report)
}

/// First subtask in declaration order that is not complete and whose
/// dependencies all are. `None` means every subtask is done.
pub fn next_actionable(state: &OrchestrationState) -> Option<&Subtask> {
    state
        .graph
        .as_ref()?
        .next_ready(&state.completed_subtask_ids)
}

/// Infer a completion from history, then return the next actionable subtask.
pub fn infer_next<'s>(
    state: &'s mut OrchestrationState,
    history: &[HistoryEntry],
) -> HandoffResult<(Option<&'s Subtask>, InferenceReport)> {
    let report = infer_completion(state, history)?;
    let state: &'s OrchestrationState = state;
    Ok((next_actionable(state), report))
}

/// Explicitly mark `subtask_id` complete.
pub fn complete_subtask(state: &mut OrchestrationState, subtask_id: &str) -> HandoffResult<bool> {
    let newly = state.mark_complete(subtask_id)?;
    if newly {
        info!(subtask = %subtask_id, "Subtask marked complete");
    } else {
        debug!(subtask = %subtask_id, "Subtask was already complete");
    }
    Ok(newly)
}
