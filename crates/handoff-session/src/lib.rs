//! Persisted orchestration state and the external work history.
//!
//! The state file records which work item is active, its frozen subtask graph,
//! and which subtasks are known to be complete. The history log is read-only:
//! it is scanned for evidence of completed subtasks at the start of each
//! invocation.
//!
//! # Main types
//!
//! - [`OrchestrationState`] — The single persisted record, with its [`WorkPhase`].
//! - [`FileStateStore`] — Atomic JSON persistence behind the [`StateStore`] trait.
//! - [`GitHistory`] — Reads recent commit messages behind the [`HistorySource`] trait.

/// Read-only history log sources.
pub mod history;
/// The orchestration state record and its lifecycle.
pub mod state;
/// State persistence.
pub mod store;

pub use history::{completion_marker, GitHistory, HistoryEntry, HistorySource, MemoryHistory};
pub use state::{OrchestrationState, WorkPhase, STATE_VERSION};
pub use store::{FileStateStore, ResetOutcome, StateStore, STATE_DIR, STATE_FILE};
