use handoff_core::WorkItem;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// One required field of a ledger block that is absent or unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    /// A required field is absent.
    Missing(&'static str),
    /// A field is present but does not parse.
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing(field) => write!(f, "missing {field}"),
            FieldProblem::Invalid { field, reason } => write!(f, "invalid {field} ({reason})"),
        }
    }
}

/// Why a ledger block was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// Looks like an entry but carries none of the required fields.
    HeaderOnly,
    /// Some required fields are present, others missing or unparseable.
    Incomplete(Vec<FieldProblem>),
    /// Another block in the same ledger already derived this id.
    DuplicateId(String),
}

/// A ledger block that was dropped from the backlog. Exactly one per dropped block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// Ledger file the block came from.
    pub path: PathBuf,
    /// 1-based line of the block header.
    pub line: usize,
    /// Header text of the block.
    pub title: String,
    /// Why it was excluded.
    pub kind: WarningKind,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} '{}': ", self.path.display(), self.line, self.title)?;
        match &self.kind {
            WarningKind::HeaderOnly => {
                write!(f, "section header without status, priority, or capability; skipped")
            }
            WarningKind::Incomplete(problems) => {
                let list: Vec<String> = problems.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "{}; skipped until the block carries **Status:**, **Priority:**, and **Capability:**",
                    list.join(", ")
                )
            }
            WarningKind::DuplicateId(id) => {
                write!(f, "duplicate of an earlier entry with id '{id}'; rename one of them")
            }
        }
    }
}

/// Inconsistency between `blocks` and `blocked_by` across items. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkWarning {
    /// `from` lists `to` in `field`, but `to` does not list `from` back.
    Asymmetric {
        from: String,
        to: String,
        field: &'static str,
    },
    /// `item` references an id no loaded item carries.
    Dangling { item: String, reference: String },
}

impl fmt::Display for LinkWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkWarning::Asymmetric { from, to, field } => {
                let mirror = if *field == "blocks" {
                    "blocked_by"
                } else {
                    "blocks"
                };
                write!(f, "'{from}' lists '{to}' in {field}, but '{to}' has no matching {mirror}")
            }
            LinkWarning::Dangling { item, reference } => {
                write!(f, "'{item}' references unknown item '{reference}'")
            }
        }
    }
}

/// Check that `blocks` / `blocked_by` pairs mirror each other.
///
/// Both sides are authored independently, so asymmetry is expected in practice;
/// it is reported, never repaired.
pub fn check_links(items: &[WorkItem]) -> Vec<LinkWarning> {
    let by_id: HashMap<&str, &WorkItem> = items.iter().map(|i| (i.id.as_str(), i)).collect();
    let mut warnings = Vec::new();

    for item in items {
        for target in &item.blocks {
            match by_id.get(target.as_str()) {
                Some(other) if !other.blocked_by.contains(&item.id) => {
                    warnings.push(LinkWarning::Asymmetric {
                        from: item.id.clone(),
                        to: target.clone(),
                        field: "blocks",
                    });
                }
                Some(_) => {}
                None => warnings.push(LinkWarning::Dangling {
                    item: item.id.clone(),
                    reference: target.clone(),
                }),
            }
        }
        for source in &item.blocked_by {
            match by_id.get(source.as_str()) {
                Some(other) if !other.blocks.contains(&item.id) => {
                    warnings.push(LinkWarning::Asymmetric {
                        from: item.id.clone(),
                        to: source.clone(),
                        field: "blocked_by",
                    });
                }
                Some(_) => {}
                None => warnings.push(LinkWarning::Dangling {
                    item: item.id.clone(),
                    reference: source.clone(),
                }),
            }
        }
    }

    warnings
}
