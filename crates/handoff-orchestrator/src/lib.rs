//! Routes backlog work to capability-tagged executors.
//!
//! A selected work item is split into an acyclic graph of subtasks by an
//! ordered pattern table, each subtask is assigned to the cheapest capable
//! executor, and progress is inferred from the workspace history on every
//! invocation.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Runs `select`, `next`, `done`, and `status` against the workspace.
//! - [`Decomposer`] — Ordered table of decomposition patterns.
//! - [`ExecutorRegistry`] — Validated executor configuration.
//! - [`InstructionDocument`] — Executor-ready instructions for one subtask.

/// Work item decomposition.
pub mod decompose;
/// The invocation-level facade.
pub mod engine;
/// Completion inference from history.
pub mod inference;
/// Instruction rendering.
pub mod instructions;
/// Built-in decomposition patterns.
pub mod patterns;
/// Executor registry and assignment.
pub mod registry;

pub use decompose::{
    decompose, instantiate, Decomposer, DecompositionError, DEFAULT_ESTIMATE_MINUTES,
};
pub use engine::{Backlog, Handoff, HandoffStep, Orchestrator, StatusReport};
pub use inference::{
    complete_subtask, infer_completion, infer_next, next_actionable, scan_history, AmbiguousEntry,
    InferenceOutcome, InferenceReport,
};
pub use instructions::{default_context, render, InstructionDocument, NextStep};
pub use patterns::{atomic_pattern, builtin_patterns, PatternDef, StepDef, ATOMIC_PATTERN};
pub use registry::{
    assign, assign_with_fallback, default_registry, AssignmentError, CostTier, Executor,
    ExecutorRegistry,
};
