//! Backlog ledgers: parsing, validation, cross-item link checks, and ranking.
//!
//! Each project directory in the workspace carries a `TASKS.md` ledger. Every
//! `### <title>` header opens a block; blocks carrying a status, a priority,
//! and a capability become [`WorkItem`](handoff_core::WorkItem)s, everything
//! else is reported as a [`ValidationWarning`] and dropped.
//!
//! # Main types
//!
//! - [`LedgerStore`] — Reads project ledgers and rewrites item status lines.
//! - [`LoadReport`] — Valid items plus the warnings collected while loading.
//! - [`RankedBacklog`] — The presentable, partitioned backlog.

/// Ledger discovery, parsing, and status rewriting.
pub mod ledger;
/// Backlog ordering and blocked partitioning.
pub mod ranking;
/// Validation warnings and link consistency checks.
pub mod validation;

pub use ledger::{parse_ledger, LedgerStore, LoadReport, LEDGER_FILE};
pub use ranking::{rank, RankedBacklog};
pub use validation::{check_links, FieldProblem, LinkWarning, ValidationWarning, WarningKind};
