//! Core types and error definitions for the Handoff task router.
//!
//! This crate provides the foundational types shared across all Handoff crates:
//! the backlog [`WorkItem`], the decomposed [`SubtaskGraph`], deterministic id
//! derivation, and the unified error type.
//!
//! # Main types
//!
//! - [`HandoffError`] — Unified error enum for all Handoff subsystems.
//! - [`HandoffResult`] — Convenience alias for `Result<T, HandoffError>`.
//! - [`WorkItem`] — A validated backlog entry.
//! - [`Subtask`] / [`SubtaskGraph`] — A decomposition step and its frozen, acyclic graph.

/// Atomic file replacement.
pub mod fs;
/// Subtasks and the acyclic subtask graph.
pub mod graph;
/// Deterministic id and slug derivation.
pub mod id;
/// Backlog work items and their enums.
pub mod work_item;

pub use fs::write_atomic;
pub use graph::{GraphError, Subtask, SubtaskGraph};
pub use id::{normalize_capability, slugify, subtask_id, work_item_id};
pub use work_item::{Priority, Status, WorkItem};

use std::path::PathBuf;

// --- Error types ---

/// Top-level error type for the Handoff router.
///
/// Each variant corresponds to a subsystem that can produce errors. Messages
/// name the offending file or id and, where one exists, the corrective action.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    /// A backlog ledger could not be read or rewritten.
    #[error("Backlog error: {0}")]
    Backlog(String),

    /// A decomposition pattern produced an invalid graph.
    #[error("Decomposition error: {0}")]
    Decomposition(String),

    /// No executor could be assigned to a subtask.
    #[error("Assignment error: {0}")]
    Assignment(String),

    /// The persisted orchestration state exists but cannot be parsed.
    #[error(
        "State file {} is corrupt: {reason}. Run `handoff reset` to move it aside and start fresh",
        path.display()
    )]
    StateCorruption {
        /// Location of the unreadable state file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// An invalid orchestration state transition or session lookup.
    #[error("Session error: {0}")]
    Session(String),

    /// The external history log could not be read.
    #[error("History error: {0}")]
    History(String),

    /// An error in configuration or registry parsing/validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The external health-check collaborator failed to run.
    #[error("Health check error: {0}")]
    Health(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`HandoffError`].
pub type HandoffResult<T> = Result<T, HandoffError>;

impl From<GraphError> for HandoffError {
    fn from(err: GraphError) -> Self {
        HandoffError::Decomposition(err.to_string())
    }
}
