use chrono::{DateTime, Utc};
use handoff_core::{HandoffError, HandoffResult, SubtaskGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// Schema version written into new state files.
pub const STATE_VERSION: u32 = 1;

/// Lifecycle of the active work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkPhase {
    /// Nothing selected yet.
    #[default]
    Idle,
    /// A work item was chosen but not decomposed yet.
    Selected,
    /// The subtask graph is attached.
    Decomposed,
    /// At least one subtask has been handed to an executor.
    InProgress,
    /// Every subtask is done; the ledger update is pending.
    AllSubtasksComplete,
    /// The parent work item was marked complete in its ledger.
    Closed,
}

impl WorkPhase {
    /// Phases reachable from this one.
    pub fn allowed_transitions(&self) -> &'static [WorkPhase] {
        use WorkPhase::*;
        match self {
            Idle => &[Selected],
            Selected => &[Decomposed, Selected],
            Decomposed => &[InProgress, AllSubtasksComplete, Selected],
            InProgress => &[InProgress, AllSubtasksComplete, Selected],
            AllSubtasksComplete => &[Closed, Selected],
            Closed => &[Selected],
        }
    }

    /// Whether `target` is reachable from this phase.
    pub fn can_transition_to(&self, target: WorkPhase) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// A graph exists and subtasks may be completed.
    pub fn has_graph(&self) -> bool {
        matches!(
            self,
            WorkPhase::Decomposed | WorkPhase::InProgress | WorkPhase::AllSubtasksComplete
        )
    }
}

impl fmt::Display for WorkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Selected => "Selected",
            Self::Decomposed => "Decomposed",
            Self::InProgress => "In Progress",
            Self::AllSubtasksComplete => "All Subtasks Complete",
            Self::Closed => "Closed",
        };
        write!(f, "{s}")
    }
}

/// The single persisted orchestration record.
///
/// `completed_subtask_ids` only grows while a graph is active and is cleared
/// when a new work item is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationState {
    /// Schema version of the state file.
    pub version: u32,
    /// Work item being worked on; cleared on close.
    pub active_work_item_id: Option<String>,
    /// Subtask most recently handed out.
    pub active_subtask_id: Option<String>,
    /// Executor that received it.
    pub last_assigned_executor: Option<String>,
    /// Set by the store on every save.
    pub last_updated: Option<DateTime<Utc>>,
    /// Completed subtask ids, recorded or inferred.
    pub completed_subtask_ids: BTreeSet<String>,
    /// Decomposition of the active item.
    pub graph: Option<SubtaskGraph>,
    /// Where the active item is in its lifecycle.
    pub phase: WorkPhase,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            active_work_item_id: None,
            active_subtask_id: None,
            last_assigned_executor: None,
            last_updated: None,
            completed_subtask_ids: BTreeSet::new(),
            graph: None,
            phase: WorkPhase::Idle,
        }
    }
}

impl OrchestrationState {
    /// Idle state with nothing selected.
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&mut self, to: WorkPhase) -> HandoffResult<()> {
        if !self.phase.can_transition_to(to) {
            return Err(HandoffError::Session(format!(
                "Cannot move from '{}' to '{}'",
                self.phase, to
            )));
        }
        debug!(from = %self.phase, to = %to, "Phase transition");
        self.phase = to;
        Ok(())
    }

    /// Make `work_item_id` the active item, discarding any previous graph and progress.
    pub fn select(&mut self, work_item_id: impl Into<String>) -> HandoffResult<()> {
        self.transition(WorkPhase::Selected)?;
        self.active_work_item_id = Some(work_item_id.into());
        self.active_subtask_id = None;
        self.last_assigned_executor = None;
        self.completed_subtask_ids.clear();
        self.graph = None;
        Ok(())
    }

    /// Freeze the decomposition of the selected item.
    pub fn attach_graph(&mut self, graph: SubtaskGraph) -> HandoffResult<()> {
        if self.active_work_item_id.as_deref() != Some(graph.work_item_id()) {
            return Err(HandoffError::Session(format!(
                "Graph for '{}' does not belong to the selected item",
                graph.work_item_id()
            )));
        }
        self.transition(WorkPhase::Decomposed)?;
        self.graph = Some(graph);
        Ok(())
    }

    /// Record the subtask handed out in this invocation and who it went to.
    pub fn begin_subtask(
        &mut self,
        subtask_id: &str,
        executor_id: impl Into<String>,
    ) -> HandoffResult<()> {
        self.require_in_graph(subtask_id)?;
        self.transition(WorkPhase::InProgress)?;
        self.active_subtask_id = Some(subtask_id.to_string());
        self.last_assigned_executor = Some(executor_id.into());
        Ok(())
    }

    /// Mark a subtask of the frozen graph complete.
    ///
    /// Returns `false` when it was already complete. Completing the last
    /// outstanding subtask moves the phase to [`WorkPhase::AllSubtasksComplete`].
    pub fn mark_complete(&mut self, subtask_id: &str) -> HandoffResult<bool> {
        self.require_in_graph(subtask_id)?;
        let inserted = self.completed_subtask_ids.insert(subtask_id.to_string());
        if self.all_complete() && self.phase != WorkPhase::AllSubtasksComplete {
            self.transition(WorkPhase::AllSubtasksComplete)?;
        }
        Ok(inserted)
    }

    /// The parent item was marked complete; nothing remains active.
    pub fn close(&mut self) -> HandoffResult<()> {
        self.transition(WorkPhase::Closed)?;
        self.active_work_item_id = None;
        self.active_subtask_id = None;
        Ok(())
    }

    /// True when a graph exists and every subtask in it is done.
    pub fn all_complete(&self) -> bool {
        self.graph
            .as_ref()
            .is_some_and(|g| g.is_complete(&self.completed_subtask_ids))
    }

    fn require_in_graph(&self, subtask_id: &str) -> HandoffResult<()> {
        let Some(graph) = self.graph.as_ref().filter(|_| self.phase.has_graph()) else {
            return Err(HandoffError::Session(
                "No decomposed work item is active; run `handoff select` first".into(),
            ));
        };
        if !graph.contains(subtask_id) {
            return Err(HandoffError::Session(format!(
                "Subtask '{subtask_id}' is not part of '{}'; see `handoff status` for valid ids",
                graph.work_item_id()
            )));
        }
        Ok(())
    }
}
