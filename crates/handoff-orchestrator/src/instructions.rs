use crate::registry::Executor;
use handoff_core::{Priority, Subtask, SubtaskGraph, WorkItem};
use handoff_session::completion_marker;
use std::collections::BTreeSet;
use std::fmt;

/// The subtask that follows the one being handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextStep {
    /// Id of the following subtask.
    pub subtask_id: String,
    /// What it asks for.
    pub description: String,
    /// Capability it needs.
    pub capability: String,
}

/// Executor-ready instructions for one subtask. Rendered as Markdown by `Display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionDocument {
    /// Subtask being handed out.
    pub subtask_id: String,
    /// What the subtask asks for.
    pub description: String,
    /// Parent work item.
    pub work_item_id: String,
    /// Parent title, as written in the ledger.
    pub work_item_title: String,
    /// Project owning the parent.
    pub project: String,
    /// Parent priority.
    pub priority: Priority,
    /// Subtask estimate.
    pub estimated_minutes: u32,
    /// Assigned executor.
    pub executor_id: String,
    /// Its display name.
    pub executor_name: String,
    /// What the executor is expected to bring to the subtask.
    pub framing: String,
    /// Files to read first, from the parent item.
    pub context_refs: Vec<String>,
    /// Numbered work steps.
    pub steps: Vec<String>,
    /// Checks that must hold before marking it done.
    pub success_criteria: Vec<String>,
    /// Line to echo into the history log when done.
    pub completion_marker: String,
    /// Preview of what comes after.
    pub next: Option<NextStep>,
    /// This is the last outstanding subtask; finishing it closes the work item.
    pub closes_work_item: bool,
}

const REVIEW_STEPS: &[&str] = &[
    "Read the work of the previous subtask in the history log.",
    "Check it against the conventions in {project}/LOCAL_CONTEXT.md.",
    "Document any issues with concrete fixes, or fix minor ones directly.",
    "Record what was validated.",
];

const WORK_STEPS: &[&str] = &[
    "Read the context files listed above.",
    "{description}",
    "Follow the conventions in {project}/LOCAL_CONTEXT.md.",
    "Commit your work with a clear message.",
];

const REVIEW_CRITERIA: &[&str] = &[
    "Previous work reviewed against project conventions",
    "Logic errors and edge cases checked",
    "Findings documented: approved, or issues listed with fixes",
    "Changes committed",
];

const WORK_CRITERIA: &[&str] = &[
    "Task completed: {description}",
    "Code follows project conventions",
    "Changes committed",
];

fn is_review(subtask: &Subtask) -> bool {
    subtask.id.ends_with("_review") || subtask.id.ends_with("_verify")
}

fn fill(template: &[&str], project: &str, description: &str) -> Vec<String> {
    template
        .iter()
        .map(|line| {
            line.replace("{project}", project)
                .replace("{description}", description)
        })
        .collect()
}

/// Default context files when a work item lists none.
pub fn default_context(project: &str) -> Vec<String> {
    vec![
        format!("{project}/LOCAL_CONTEXT.md"),
        format!("{project}/TASKS.md"),
    ]
}

/// Build the instructions for handing `subtask` to `executor`.
///
/// `completed` is the set of subtasks already done; it decides which subtask
/// comes next and whether this one closes the work item.
pub fn render(
    subtask: &Subtask,
    executor: &Executor,
    item: &WorkItem,
    graph: &SubtaskGraph,
    completed: &BTreeSet<String>,
) -> InstructionDocument {
    let mut after = completed.clone();
    after.insert(subtask.id.clone());
    let next = graph.next_ready(&after).map(|t| NextStep {
        subtask_id: t.id.clone(),
        description: t.description.clone(),
        capability: t.required_capability.clone(),
    });

    let framing = executor.description.clone().unwrap_or_else(|| {
        format!("Capabilities: {}", executor.capabilities.join(", "))
    });
    let (steps, criteria) = if is_review(subtask) {
        (REVIEW_STEPS, REVIEW_CRITERIA)
    } else {
        (WORK_STEPS, WORK_CRITERIA)
    };

    InstructionDocument {
        subtask_id: subtask.id.clone(),
        description: subtask.description.clone(),
        work_item_id: item.id.clone(),
        work_item_title: item.title.clone(),
        project: item.project.clone(),
        priority: item.priority,
        estimated_minutes: subtask.estimated_minutes,
        executor_id: executor.id.clone(),
        executor_name: executor.display_name.clone(),
        framing,
        context_refs: if item.context_refs.is_empty() {
            default_context(&item.project)
        } else {
            item.context_refs.clone()
        },
        steps: fill(steps, &item.project, &subtask.description),
        success_criteria: fill(criteria, &item.project, &subtask.description),
        completion_marker: completion_marker(&subtask.id),
        next,
        closes_work_item: graph.is_last_remaining(&subtask.id, completed),
    }
}

impl fmt::Display for InstructionDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}", self.description)?;
        writeln!(f)?;
        writeln!(f, "**Subtask:** {}", self.subtask_id)?;
        writeln!(f, "**Work item:** {} ({})", self.work_item_title, self.work_item_id)?;
        writeln!(f, "**Project:** {}", self.project)?;
        writeln!(f, "**Priority:** {}", self.priority)?;
        writeln!(f, "**Estimated Time:** {} minutes", self.estimated_minutes)?;
        writeln!(f, "**Executor:** {} ({})", self.executor_name, self.executor_id)?;
        writeln!(f)?;

        writeln!(f, "## Context to Read First")?;
        writeln!(f)?;
        for (i, path) in self.context_refs.iter().enumerate() {
            writeln!(f, "{}. {path}", i + 1)?;
        }
        writeln!(f)?;

        writeln!(f, "## What You Need to Do")?;
        writeln!(f)?;
        writeln!(f, "As {}: {}", self.executor_name, self.framing)?;
        writeln!(f)?;
        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "{}. {step}", i + 1)?;
        }
        writeln!(f)?;

        writeln!(f, "## Success Criteria")?;
        writeln!(f)?;
        for line in &self.success_criteria {
            writeln!(f, "- [ ] {line}")?;
        }
        writeln!(f)?;

        writeln!(f, "## When You Finish")?;
        writeln!(f)?;
        writeln!(f, "Include this line in your commit message:")?;
        writeln!(f)?;
        writeln!(f, "    {}", self.completion_marker)?;
        writeln!(f)?;
        if let Some(next) = &self.next {
            writeln!(
                f,
                "Then run `handoff next` to hand off: {} (`{}`, needs {}).",
                next.description, next.subtask_id, next.capability
            )?;
        }
        if self.closes_work_item {
            writeln!(
                f,
                "This is the final subtask of \"{}\". Run `handoff next` afterwards to mark it \
                 Complete in {}/TASKS.md and pick the next work item.",
                self.work_item_title, self.project
            )?;
        }
        Ok(())
    }
}
