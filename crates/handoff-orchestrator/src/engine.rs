use crate::decompose::Decomposer;
use crate::inference::{complete_subtask, infer_completion, next_actionable, InferenceReport};
use crate::instructions::{render, InstructionDocument};
use crate::registry::{assign, assign_with_fallback, Executor, ExecutorRegistry};
use handoff_backlog::{check_links, rank, LedgerStore, LinkWarning, LoadReport, RankedBacklog};
use handoff_core::{HandoffError, HandoffResult, Status, Subtask, WorkItem};
use handoff_session::{HistorySource, OrchestrationState, ResetOutcome, StateStore, WorkPhase};
use std::fmt;
use tracing::{info, warn};

/// The loaded backlog of every project, plus what the state says is active.
#[derive(Debug, Clone)]
pub struct Backlog {
    /// Items and exclusion warnings across projects.
    pub report: LoadReport,
    /// Inconsistent blocks/blocked-by links.
    pub links: Vec<LinkWarning>,
    /// Id of the item in progress, if any.
    pub active_work_item_id: Option<String>,
}

impl Backlog {
    /// Rank the loaded items with the active one as the continue entry.
    pub fn ranked(&self) -> RankedBacklog<'_> {
        rank(&self.report.items, self.active_work_item_id.as_deref())
    }
}

/// What an invocation hands back to the user.
#[derive(Debug, Clone)]
pub enum HandoffStep {
    /// Instructions for the next subtask.
    Dispatch(Box<InstructionDocument>),
    /// Every subtask was done; the work item was marked complete.
    Closed(WorkItem),
}

/// Result of `select`, `next`, or `done`.
#[derive(Debug, Clone)]
pub struct Handoff {
    /// Present when history was scanned in this invocation.
    pub inference: Option<InferenceReport>,
    /// What to do next.
    pub step: HandoffStep,
}

/// Snapshot of the persisted state for display.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// The persisted state as loaded.
    pub state: OrchestrationState,
    /// The active item as currently written in its ledger, if it still exists.
    pub item: Option<WorkItem>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = &self.state;
        let Some(active) = state.active_work_item_id.as_deref() else {
            return writeln!(f, "No active work item. Run `handoff select` to choose one.");
        };
        match &self.item {
            Some(item) => writeln!(f, "Active: {} ({active}) [{}]", item.title, item.status)?,
            None => writeln!(f, "Active: {active} (no longer in any ledger)")?,
        }
        writeln!(f, "Phase: {}", state.phase)?;
        if let Some(executor) = &state.last_assigned_executor {
            writeln!(f, "Last executor: {executor}")?;
        }
        if let Some(at) = state.last_updated {
            writeln!(f, "Last updated: {}", at.to_rfc3339())?;
        }
        if let Some(graph) = &state.graph {
            let done = &state.completed_subtask_ids;
            writeln!(f, "Progress: {}/{} subtasks", done.len(), graph.len())?;
            for task in graph.subtasks() {
                let mark = if done.contains(&task.id) {
                    "x"
                } else if state.active_subtask_id.as_deref() == Some(task.id.as_str()) {
                    ">"
                } else {
                    " "
                };
                writeln!(
                    f,
                    "  [{mark}] {} ({}, {} min)",
                    task.id, task.required_capability, task.estimated_minutes
                )?;
            }
        }
        Ok(())
    }
}

/// Ties the backlog, state, history, and registry together for one invocation.
pub struct Orchestrator {
    ledgers: LedgerStore,
    state: Box<dyn StateStore>,
    history: Box<dyn HistorySource>,
    registry: ExecutorRegistry,
    decomposer: Decomposer,
    fallback_executor: Option<String>,
}

impl Orchestrator {
    /// Orchestrator with the built-in patterns and no fallback executor.
    pub fn new(
        ledgers: LedgerStore,
        state: Box<dyn StateStore>,
        history: Box<dyn HistorySource>,
        registry: ExecutorRegistry,
    ) -> Self {
        Self {
            ledgers,
            state,
            history,
            registry,
            decomposer: Decomposer::default(),
            fallback_executor: None,
        }
    }

    /// Use a decomposer with custom patterns.
    pub fn with_decomposer(mut self, decomposer: Decomposer) -> Self {
        self.decomposer = decomposer;
        self
    }

    /// Executor to use when no enabled executor has a subtask's capability.
    pub fn with_fallback(mut self, executor_id: Option<String>) -> Self {
        self.fallback_executor = executor_id;
        self
    }

    /// Registry in use for this invocation.
    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Load and check every project ledger.
    pub async fn backlog(&self) -> HandoffResult<Backlog> {
        let state = self.state.load().await?;
        let report = self.ledgers.load_all().await?;
        let links = check_links(&report.items);
        for link in &links {
            warn!(%link, "Inconsistent backlog link");
        }
        Ok(Backlog {
            report,
            links,
            active_work_item_id: state.active_work_item_id,
        })
    }

    /// Act on entry `index` of the ranked backlog.
    ///
    /// Index 0 resumes the active item; any other index selects and decomposes
    /// a new one, discarding the previous item's progress.
    pub async fn select(&self, index: usize) -> HandoffResult<Handoff> {
        let backlog = self.backlog().await?;
        let ranked = backlog.ranked();
        let item = ranked.select(index).cloned().ok_or_else(|| {
            HandoffError::Session(format!(
                "No backlog entry at index {index}; run `handoff select` without --index to see the list"
            ))
        })?;

        let mut state = self.state.load().await?;
        if index == 0 && state.phase.has_graph() {
            info!(item = %item.id, "Continuing active work item");
            return self.resume(state, item).await;
        }

        state.select(item.id.clone())?;
        state.attach_graph(self.decomposer.decompose(&item))?;
        info!(item = %item.id, priority = %item.priority, "Work item selected");
        self.dispatch(state, item, None).await
    }

    /// Infer progress from history and hand out the next subtask.
    pub async fn next(&self) -> HandoffResult<Handoff> {
        let state = self.state.load().await?;
        let item = self.active_item(&state).await?;
        self.resume(state, item).await
    }

    /// Explicitly mark `subtask_id` complete, then hand out the next subtask.
    pub async fn done(&self, subtask_id: &str) -> HandoffResult<Handoff> {
        let mut state = self.state.load().await?;
        let item = self.active_item(&state).await?;
        complete_subtask(&mut state, subtask_id)?;
        self.dispatch(state, item, None).await
    }

    /// The state and active item, without scanning history.
    pub async fn status(&self) -> HandoffResult<StatusReport> {
        let state = self.state.load().await?;
        let item = match state.active_work_item_id.as_deref() {
            Some(id) => self.find_item(id).await?,
            None => None,
        };
        Ok(StatusReport { state, item })
    }

    /// Discard the state file.
    pub async fn reset(&self) -> HandoffResult<ResetOutcome> {
        self.state.reset().await
    }

    async fn resume(&self, mut state: OrchestrationState, item: WorkItem) -> HandoffResult<Handoff> {
        let history = match self.history.recent().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "History unavailable; resuming from state");
                Vec::new()
            }
        };
        let report = infer_completion(&mut state, &history)?;
        self.dispatch(state, item, Some(report)).await
    }

    async fn dispatch(
        &self,
        mut state: OrchestrationState,
        item: WorkItem,
        inference: Option<InferenceReport>,
    ) -> HandoffResult<Handoff> {
        let Some(subtask) = next_actionable(&state).cloned() else {
            return self.close(state, item, inference).await;
        };
        let executor = self.resolve(&subtask)?;
        let graph = state
            .graph
            .as_ref()
            .ok_or_else(|| HandoffError::Session("Active work item has no subtask graph".into()))?;
        let instructions = render(&subtask, executor, &item, graph, &state.completed_subtask_ids);

        state.begin_subtask(&subtask.id, executor.id.clone())?;
        self.state.save(&mut state).await?;
        info!(subtask = %subtask.id, executor = %executor.id, "Subtask dispatched");

        Ok(Handoff {
            inference,
            step: HandoffStep::Dispatch(Box::new(instructions)),
        })
    }

    async fn close(
        &self,
        mut state: OrchestrationState,
        mut item: WorkItem,
        inference: Option<InferenceReport>,
    ) -> HandoffResult<Handoff> {
        // Persist the completions before touching the ledger. A failure at any
        // later step leaves the item active, and the next run closes it again.
        if state.phase != WorkPhase::Closed {
            self.state.save(&mut state).await?;
        }
        if !item.is_complete() {
            self.ledgers.set_status(&item, Status::Complete).await?;
            item.status = Status::Complete;
        }
        if state.phase != WorkPhase::Closed {
            state.close()?;
        }
        self.state.save(&mut state).await?;
        info!(item = %item.id, "Work item closed");
        Ok(Handoff {
            inference,
            step: HandoffStep::Closed(item),
        })
    }

    fn resolve(&self, subtask: &Subtask) -> HandoffResult<&Executor> {
        let executor = match self.fallback_executor.as_deref() {
            Some(fallback) => assign_with_fallback(subtask, &self.registry, fallback)?,
            None => assign(subtask, &self.registry)?,
        };
        Ok(executor)
    }

    async fn active_item(&self, state: &OrchestrationState) -> HandoffResult<WorkItem> {
        let Some(id) = state.active_work_item_id.as_deref() else {
            return Err(HandoffError::Session(
                "No active work item; run `handoff select` first".into(),
            ));
        };
        if !state.phase.has_graph() {
            return Err(HandoffError::Session(format!(
                "'{id}' is {}; run `handoff select` to pick the next work item",
                state.phase
            )));
        }
        self.find_item(id).await?.ok_or_else(|| {
            HandoffError::Backlog(format!(
                "Active item '{id}' is no longer in any ledger; run `handoff select` to choose \
                 another, or `handoff reset`"
            ))
        })
    }

    async fn find_item(&self, id: &str) -> HandoffResult<Option<WorkItem>> {
        let report = self.ledgers.load_all().await?;
        Ok(report.items.into_iter().find(|i| i.id == id))
    }
}
