use crate::id::{slugify, work_item_id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a backlog entry as written in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Nothing done yet.
    NotStarted,
    /// Someone is working on it.
    InProgress,
    /// Waiting on something outside the item.
    Blocked,
    /// Done, awaiting review.
    ReadyForReview,
    /// Finished; excluded from the backlog.
    Complete,
}

impl Status {
    /// Label used in ledger files.
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotStarted => "Not Started",
            Status::InProgress => "In Progress",
            Status::Blocked => "Blocked",
            Status::ReadyForReview => "Ready for Review",
            Status::Complete => "Complete",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Status {
    type Err = String;

    /// Accepts the ledger label followed by free text, e.g. `Complete ✅ (2024-05-01)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slug = slugify(s);
        let table: &[(&str, Status)] = &[
            ("not_started", Status::NotStarted),
            ("todo", Status::NotStarted),
            ("in_progress", Status::InProgress),
            ("blocked", Status::Blocked),
            ("ready_for_review", Status::ReadyForReview),
            // Deployment readiness is a review state from the router's point of view.
            ("ready_for_deployment", Status::ReadyForReview),
            ("complete", Status::Complete),
            ("done", Status::Complete),
        ];
        table
            .iter()
            .find(|(key, _)| slug == *key || slug.starts_with(&format!("{key}_")))
            .map(|(_, status)| *status)
            .ok_or_else(|| format!("unknown status '{}'", s.trim()))
    }
}

/// Priority of a backlog entry. Declaration order is rank order: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Drop everything.
    Critical,
    /// Next in line.
    High,
    /// Normal work.
    Medium,
    /// When there is time.
    Low,
    /// Parked; ranked last.
    Deferred,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "Critical"),
            Priority::High => write!(f, "High"),
            Priority::Medium => write!(f, "Medium"),
            Priority::Low => write!(f, "Low"),
            Priority::Deferred => write!(f, "Deferred"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    /// Reads the first word only, so `HIGH (security)` parses as [`Priority::High`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match word.as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            "deferred" => Ok(Priority::Deferred),
            _ => Err(format!("unknown priority '{}'", s.trim())),
        }
    }
}

/// A validated backlog entry.
///
/// Only constructed for records carrying a status, a priority, and a required
/// capability; partially specified records never become a `WorkItem`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// `<project>_<title>`, slugified.
    pub id: String,
    /// Directory name of the owning project.
    pub project: String,
    /// Header text as written in the ledger.
    pub title: String,
    /// Current ledger status.
    pub status: Status,
    /// Ranking priority.
    pub priority: Priority,
    /// Normalized capability tag.
    pub required_capability: String,
    /// Parsed estimate, if the block gave one.
    pub estimated_minutes: Option<u32>,
    /// External documents to read before starting, in authoring order.
    pub context_refs: Vec<String>,
    /// Ids of work items this one blocks.
    pub blocks: BTreeSet<String>,
    /// Ids of work items that must be complete before this one.
    pub blocked_by: BTreeSet<String>,
    /// Free text under the fields.
    pub description: String,
}

impl WorkItem {
    /// Build a work item with its id derived from project and title.
    pub fn new(
        project: impl Into<String>,
        title: impl Into<String>,
        status: Status,
        priority: Priority,
        required_capability: impl Into<String>,
    ) -> Self {
        let project = project.into();
        let title = title.into();
        Self {
            id: work_item_id(&project, &title),
            project,
            title,
            status,
            priority,
            required_capability: required_capability.into(),
            estimated_minutes: None,
            context_refs: Vec::new(),
            blocks: BTreeSet::new(),
            blocked_by: BTreeSet::new(),
            description: String::new(),
        }
    }

    /// Set the estimate in minutes.
    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_minutes = Some(minutes);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Ids this item waits on.
    pub fn with_blocked_by(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.blocked_by = ids.into_iter().collect();
        self
    }

    /// Ids waiting on this item.
    pub fn with_blocks(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.blocks = ids.into_iter().collect();
        self
    }

    /// Files to read before starting.
    pub fn with_context(mut self, refs: impl IntoIterator<Item = String>) -> Self {
        self.context_refs = refs.into_iter().collect();
        self
    }

    /// True once the ledger says Complete.
    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_labels_with_trailing_text() {
        assert_eq!("Not Started".parse::<Status>().unwrap(), Status::NotStarted);
        assert_eq!("In Progress (50%)".parse::<Status>().unwrap(), Status::InProgress);
        assert_eq!("complete ✅".parse::<Status>().unwrap(), Status::Complete);
        assert_eq!(
            "Ready for Deployment".parse::<Status>().unwrap(),
            Status::ReadyForReview
        );
    }

    #[test]
    fn test_status_rejects_unknown() {
        assert!("someday".parse::<Status>().is_err());
        assert!("".parse::<Status>().is_err());
        // Prefix must end on a word boundary.
        assert!("completely unclear".parse::<Status>().is_err());
    }

    #[test]
    fn test_priority_parses_first_word() {
        assert_eq!("HIGH (security)".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("deferred".parse::<Priority>().unwrap(), Priority::Deferred);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_priority_order_critical_first() {
        let mut all = vec![
            Priority::Low,
            Priority::Critical,
            Priority::Deferred,
            Priority::High,
            Priority::Medium,
        ];
        all.sort();
        assert_eq!(
            all,
            vec![
                Priority::Critical,
                Priority::High,
                Priority::Medium,
                Priority::Low,
                Priority::Deferred
            ]
        );
    }

    #[test]
    fn test_work_item_id_derivation() {
        let item = WorkItem::new(
            "web",
            "Implement user auth",
            Status::NotStarted,
            Priority::High,
            "debugging",
        );
        assert_eq!(item.id, "web_implement_user_auth");
        assert!(!item.is_complete());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::ReadyForReview).unwrap();
        assert_eq!(json, "\"ready_for_review\"");
        let parsed: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Status::ReadyForReview);
    }
}
