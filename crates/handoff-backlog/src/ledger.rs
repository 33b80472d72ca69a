use crate::validation::{FieldProblem, ValidationWarning, WarningKind};
use handoff_core::{
    normalize_capability, slugify, work_item_id, write_atomic, HandoffError, HandoffResult,
    Priority, Status, WorkItem,
};
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// File name of a project ledger inside its project directory.
pub const LEDGER_FILE: &str = "TASKS.md";

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,3})\s+(.*?)\s*#*\s*$").expect("valid regex"));
static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*(?:[-*+]\s+)?\*\*([^*]+?):\*\*\s*)(.*?)\s*$").expect("valid regex")
});
static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.*?)\s*$").expect("valid regex"));
static PATH_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w./-]+\.[A-Za-z0-9]+").expect("valid regex"));
static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?)(?:\s*(?:-|–|to)\s*(\d+(?:\.\d+)?))?\s*(hours?|hrs?|h|minutes?|mins?|m)?\b",
    )
    .expect("valid regex")
});

/// Valid items and exclusion warnings from one or more ledgers.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Blocks that passed validation, in file order.
    pub items: Vec<WorkItem>,
    /// One entry per excluded block.
    pub warnings: Vec<ValidationWarning>,
}

impl LoadReport {
    /// Append another report's items and warnings.
    pub fn merge(&mut self, other: LoadReport) {
        self.items.extend(other.items);
        self.warnings.extend(other.warnings);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Status,
    Priority,
    Capability,
    Estimate,
    Context,
    Blocks,
    BlockedBy,
}

impl Label {
    fn from_text(text: &str) -> Option<Self> {
        match slugify(text).as_str() {
            "status" => Some(Label::Status),
            "priority" => Some(Label::Priority),
            "capability" | "required_capability" => Some(Label::Capability),
            "estimated_time" | "estimate" | "time_estimate" => Some(Label::Estimate),
            "context_to_read_first" | "context" => Some(Label::Context),
            "blocks" => Some(Label::Blocks),
            "blocked_by" | "depends_on" => Some(Label::BlockedBy),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct RawBlock {
    title: String,
    line: usize,
    status: Option<String>,
    priority: Option<String>,
    capability: Option<String>,
    estimate: Option<String>,
    blocks: Option<String>,
    blocked_by: Option<String>,
    context: Vec<String>,
    description: Vec<String>,
}

impl RawBlock {
    fn set(&mut self, label: Label, value: &str) {
        // First occurrence wins.
        let slot = match label {
            Label::Status => &mut self.status,
            Label::Priority => &mut self.priority,
            Label::Capability => &mut self.capability,
            Label::Estimate => &mut self.estimate,
            Label::Blocks => &mut self.blocks,
            Label::BlockedBy => &mut self.blocked_by,
            Label::Context => {
                self.context.extend(
                    value
                        .split(',')
                        .filter_map(context_ref)
                        .collect::<Vec<_>>(),
                );
                return;
            }
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    fn into_item(self, project: &str) -> Result<WorkItem, WarningKind> {
        if self.status.is_none() && self.priority.is_none() && self.capability.is_none() {
            return Err(WarningKind::HeaderOnly);
        }

        let mut problems = Vec::new();
        if slugify(&self.title).is_empty() {
            problems.push(FieldProblem::Invalid {
                field: "title",
                reason: "no letters or digits".into(),
            });
        }
        let status = required(&mut problems, "status", self.status.as_deref(), |v| {
            v.parse::<Status>()
        });
        let priority = required(&mut problems, "priority", self.priority.as_deref(), |v| {
            v.parse::<Priority>()
        });
        let capability = required(&mut problems, "capability", self.capability.as_deref(), |v| {
            let tag = normalize_capability(v);
            if tag.is_empty() {
                Err("empty tag".to_string())
            } else {
                Ok(tag)
            }
        });

        let (Some(status), Some(priority), Some(capability)) = (status, priority, capability)
        else {
            return Err(WarningKind::Incomplete(problems));
        };
        if !problems.is_empty() {
            return Err(WarningKind::Incomplete(problems));
        }

        let mut item = WorkItem::new(project, self.title, status, priority, capability)
            .with_context(self.context)
            .with_description(self.description.join("\n").trim());
        item.estimated_minutes = self.estimate.as_deref().and_then(parse_minutes);
        item.blocks = self
            .blocks
            .as_deref()
            .map(|v| parse_refs(project, v))
            .unwrap_or_default();
        item.blocked_by = self
            .blocked_by
            .as_deref()
            .map(|v| parse_refs(project, v))
            .unwrap_or_default();
        Ok(item)
    }
}

fn required<T>(
    problems: &mut Vec<FieldProblem>,
    field: &'static str,
    raw: Option<&str>,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> Option<T> {
    match raw {
        None => {
            problems.push(FieldProblem::Missing(field));
            None
        }
        Some(value) => match parse(value) {
            Ok(v) => Some(v),
            Err(reason) => {
                problems.push(FieldProblem::Invalid { field, reason });
                None
            }
        },
    }
}

/// Estimate in minutes. A range counts as its upper bound, hour and minute
/// parts add up, and a bare number is minutes. Zero counts as absent.
fn parse_minutes(text: &str) -> Option<u32> {
    let mut bare: Option<f64> = None;
    let mut total: Option<f64> = None;

    for caps in DURATION.captures_iter(text) {
        let Some(value) = caps
            .get(2)
            .or_else(|| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        else {
            continue;
        };
        match caps.get(3).map(|u| u.as_str().to_lowercase()) {
            Some(unit) if unit.starts_with('h') => *total.get_or_insert(0.0) += value * 60.0,
            Some(_) => *total.get_or_insert(0.0) += value,
            None => {
                bare.get_or_insert(value);
            }
        }
    }

    let minutes = total.or(bare)?.round();
    if minutes < 1.0 {
        debug!(text, "Ignoring zero estimate");
        return None;
    }
    Some(minutes.min(f64::from(u32::MAX)) as u32)
}

/// References are bare titles within `project`, or `other-project/Title`.
fn parse_refs(project: &str, text: &str) -> BTreeSet<String> {
    text.split([',', ';'])
        .map(|r| r.trim().trim_matches('`').trim())
        .filter(|r| !r.is_empty() && !matches!(slugify(r).as_str(), "" | "none" | "n_a"))
        .map(|r| match r.split_once('/') {
            Some((other, title)) => work_item_id(other.trim(), title),
            None => work_item_id(project, r),
        })
        .collect()
}

fn context_ref(text: &str) -> Option<String> {
    let text = text.trim().trim_matches('`').trim();
    if text.is_empty() {
        return None;
    }
    match PATH_TOKEN.find(text) {
        Some(m) => Some(m.as_str().to_string()),
        None => Some(text.to_string()),
    }
}

/// Parse the ledger text of one project.
///
/// Never fails: each block either becomes a [`WorkItem`] or yields exactly one
/// [`ValidationWarning`].
pub fn parse_ledger(project: &str, path: &Path, content: &str) -> LoadReport {
    let mut report = LoadReport::default();
    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut current: Option<RawBlock> = None;
    let mut in_context = false;
    let mut fence: Option<&str> = None;

    for (idx, line) in content.lines().enumerate() {
        // Code fences are opaque: no headers or fields inside them.
        if let Some(open) = fence {
            if fence_marker(line) == Some(open) {
                fence = None;
            }
            if let Some(block) = current.as_mut() {
                block.description.push(line.to_string());
            }
            continue;
        }
        if let Some(marker) = fence_marker(line) {
            fence = Some(marker);
            in_context = false;
            if let Some(block) = current.as_mut() {
                block.description.push(line.to_string());
            }
            continue;
        }

        if let Some(caps) = HEADER.captures(line) {
            blocks.extend(current.take());
            in_context = false;
            if caps[1].len() == 3 {
                current = Some(RawBlock {
                    title: caps[2].trim().to_string(),
                    line: idx + 1,
                    ..RawBlock::default()
                });
            }
            continue;
        }
        let Some(block) = current.as_mut() else {
            continue;
        };

        if let Some(caps) = FIELD.captures(line) {
            if let Some(label) = Label::from_text(&caps[2]) {
                in_context = label == Label::Context;
                block.set(label, &caps[3]);
                continue;
            }
            in_context = false;
        } else if in_context {
            if let Some(caps) = LIST_ITEM.captures(line) {
                block.context.extend(context_ref(&caps[1]));
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }
            in_context = false;
        }
        block.description.push(line.to_string());
    }
    blocks.extend(current);

    let mut seen = HashSet::new();
    for block in blocks {
        let title = block.title.clone();
        let line = block.line;
        let outcome = block.into_item(project).and_then(|item| {
            if seen.insert(item.id.clone()) {
                Ok(item)
            } else {
                Err(WarningKind::DuplicateId(item.id))
            }
        });
        match outcome {
            Ok(item) => report.items.push(item),
            Err(kind) => {
                let warning = ValidationWarning {
                    path: path.to_path_buf(),
                    line,
                    title,
                    kind,
                };
                debug!(%warning, "Excluded ledger block");
                report.warnings.push(warning);
            }
        }
    }

    report
}

/// The fence delimiter a line opens or closes, if any.
fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

/// Replace the status value of the block whose derived id is `item_id`.
///
/// Returns `None` when no such block (or no status line in it) exists.
fn rewrite_status(content: &str, project: &str, item_id: &str, status: Status) -> Option<String> {
    let mut in_target = false;
    let mut replaced = false;
    let mut fence: Option<&str> = None;
    let mut out: Vec<String> = Vec::new();

    for line in content.split('\n') {
        let (body, cr) = match line.strip_suffix('\r') {
            Some(body) => (body, "\r"),
            None => (line, ""),
        };
        if let Some(marker) = fence_marker(body) {
            match fence {
                Some(open) if open == marker => fence = None,
                Some(_) => {}
                None => fence = Some(marker),
            }
            out.push(line.to_string());
            continue;
        }
        if fence.is_some() {
            out.push(line.to_string());
            continue;
        }
        if let Some(caps) = HEADER.captures(body) {
            in_target = caps[1].len() == 3 && work_item_id(project, &caps[2]) == item_id;
        } else if in_target && !replaced {
            if let Some(caps) = FIELD.captures(body) {
                if Label::from_text(&caps[2]) == Some(Label::Status) {
                    let prefix = caps[1].to_string();
                    let sep = if prefix.ends_with(char::is_whitespace) { "" } else { " " };
                    out.push(format!("{prefix}{sep}{}{cr}", status.label()));
                    replaced = true;
                    continue;
                }
            }
        }
        out.push(line.to_string());
    }

    replaced.then(|| out.join("\n"))
}

/// Reads project ledgers under a workspace root and rewrites item status lines.
pub struct LedgerStore {
    root: PathBuf,
}

impl LedgerStore {
    /// Ledgers live at `<root>/<project>/TASKS.md`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ledger file of `project`.
    pub fn ledger_path(&self, project: &str) -> PathBuf {
        self.root.join(project).join(LEDGER_FILE)
    }

    /// Non-hidden project directories that contain a ledger, sorted by name.
    pub async fn discover_projects(&self) -> HandoffResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            HandoffError::Backlog(format!(
                "Failed to read workspace {}: {e}",
                self.root.display()
            ))
        })?;
        let mut projects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(LEDGER_FILE)).await? {
                projects.push(name);
            }
        }
        projects.sort();
        Ok(projects)
    }

    /// Load one project's ledger.
    pub async fn load(&self, project: &str) -> HandoffResult<LoadReport> {
        let path = self.ledger_path(project);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            HandoffError::Backlog(format!("Failed to read ledger {}: {e}", path.display()))
        })?;
        let report = parse_ledger(project, &path, &content);
        debug!(
            project,
            items = report.items.len(),
            excluded = report.warnings.len(),
            "Ledger parsed"
        );
        Ok(report)
    }

    /// Load every project's ledger. An unreadable ledger is skipped with a warning.
    pub async fn load_all(&self) -> HandoffResult<LoadReport> {
        let mut report = LoadReport::default();
        for project in self.discover_projects().await? {
            match self.load(&project).await {
                Ok(part) => report.merge(part),
                Err(e) => warn!(project = %project, error = %e, "Skipping unreadable ledger"),
            }
        }
        info!(
            items = report.items.len(),
            excluded = report.warnings.len(),
            "Backlog loaded"
        );
        Ok(report)
    }

    /// Rewrite the `**Status:**` line of `item` in its project ledger, atomically.
    pub async fn set_status(&self, item: &WorkItem, status: Status) -> HandoffResult<()> {
        let path = self.ledger_path(&item.project);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            HandoffError::Backlog(format!("Failed to read ledger {}: {e}", path.display()))
        })?;
        let updated = rewrite_status(&content, &item.project, &item.id, status).ok_or_else(|| {
            HandoffError::Backlog(format!(
                "Entry '{}' has no status line in {}; was it renamed? Update its **Status:** by hand",
                item.title,
                path.display()
            ))
        })?;
        write_atomic(&path, &updated).await?;
        info!(item = %item.id, status = %status, "Ledger status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEDGER: &str = "\
# Tasks

Preamble text that is not a task.

### For Claude Code (Server/Config)

### Implement user auth
**Status:** Not Started
**Priority:** High
**Capability:** debugging
**Estimated Time:** 1-2 hours
**Context to Read First:**
- docs/AUTH.md (overview)
- `config/users.yaml`

Add login and session handling.

### Write setup guide
**Status:** In Progress
**Priority:** Low
**Capability:** Documentation
**Blocked By:** Implement user auth, ops/Provision server

### Broken entry
**Status:** Someday
**Priority:** Medium
";

    fn parse() -> LoadReport {
        parse_ledger("web", Path::new("web/TASKS.md"), LEDGER)
    }

    #[test]
    fn test_valid_blocks_become_items() {
        let report = parse();
        let ids: Vec<&str> = report.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["web_implement_user_auth", "web_write_setup_guide"]);

        let auth = &report.items[0];
        assert_eq!(auth.status, Status::NotStarted);
        assert_eq!(auth.priority, Priority::High);
        assert_eq!(auth.required_capability, "debugging");
        assert_eq!(auth.estimated_minutes, Some(120));
        assert_eq!(auth.context_refs, vec!["docs/AUTH.md", "config/users.yaml"]);
        assert_eq!(auth.description, "Add login and session handling.");
    }

    #[test]
    fn test_capability_normalized_and_refs_resolved() {
        let report = parse();
        let guide = &report.items[1];
        assert_eq!(guide.required_capability, "documentation");
        let refs: Vec<&str> = guide.blocked_by.iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["ops_provision_server", "web_implement_user_auth"]);
    }

    #[test]
    fn test_header_only_and_broken_blocks_warned_once_each() {
        let report = parse();
        assert_eq!(report.warnings.len(), 2);

        let header = &report.warnings[0];
        assert_eq!(header.title, "For Claude Code (Server/Config)");
        assert_eq!(header.kind, WarningKind::HeaderOnly);
        assert_eq!(header.line, 5);

        let broken = &report.warnings[1];
        assert_eq!(broken.title, "Broken entry");
        match &broken.kind {
            WarningKind::Incomplete(problems) => {
                assert!(problems.contains(&FieldProblem::Missing("capability")));
                assert!(problems
                    .iter()
                    .any(|p| matches!(p, FieldProblem::Invalid { field: "status", .. })));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_titles_excluded() {
        let content = "\
### Deploy
**Status:** Not Started
**Priority:** Low
**Capability:** server-ops

### deploy
**Status:** Complete
**Priority:** Low
**Capability:** server-ops
";
        let report = parse_ledger("ops", Path::new("ops/TASKS.md"), content);
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].status, Status::NotStarted);
        assert_eq!(
            report.warnings[0].kind,
            WarningKind::DuplicateId("ops_deploy".into())
        );
    }

    #[test]
    fn test_level_two_header_ends_block() {
        let content = "\
### Task
**Status:** Not Started
**Priority:** Low
**Capability:** review
Body line.
## Archive
Not part of the task.
";
        let report = parse_ledger("p", Path::new("p/TASKS.md"), content);
        assert_eq!(report.items[0].description, "Body line.");
    }

    #[test]
    fn test_fenced_hash_line_stays_in_description() {
        let content = "\
### Add deploy script
Run it like this:
```sh
# build first
**Status:** Complete
cargo build --release
```
**Status:** Not Started
**Priority:** Medium
**Capability:** server-ops
";
        let report = parse_ledger("ops", Path::new("ops/TASKS.md"), content);
        assert_eq!(report.items.len(), 1);
        assert!(report.warnings.is_empty());
        let item = &report.items[0];
        assert_eq!(item.status, Status::NotStarted);
        assert_eq!(item.required_capability, "server-ops");
        assert!(item.description.contains("# build first"));
    }

    #[test]
    fn test_rewrite_status_skips_fenced_lines() {
        let content = "\
### Add deploy script
~~~
**Status:** Complete
~~~
**Status:** Not Started
**Priority:** Medium
**Capability:** server-ops
";
        let updated = rewrite_status(content, "ops", "ops_add_deploy_script", Status::InProgress)
            .unwrap();
        assert!(updated.contains("~~~\n**Status:** Complete\n~~~"));
        assert!(updated.contains("**Status:** In Progress\n**Priority:**"));
    }

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes("20-30 minutes"), Some(30));
        assert_eq!(parse_minutes("1 hour"), Some(60));
        assert_eq!(parse_minutes("soon"), None);
        assert_eq!(parse_minutes("0 min"), None);
        assert_eq!(parse_minutes("45"), Some(45));
    }

    #[test]
    fn test_parse_minutes_fractions_and_compound() {
        assert_eq!(parse_minutes("1.5 hours"), Some(90));
        assert_eq!(parse_minutes("1 hour 30 minutes"), Some(90));
        assert_eq!(parse_minutes("1-2 hours"), Some(120));
        assert_eq!(parse_minutes("2h 15m"), Some(135));
        assert_eq!(parse_minutes("0.5 hrs"), Some(30));
    }

    #[test]
    fn test_rewrite_status_targets_one_block() {
        let updated =
            rewrite_status(LEDGER, "web", "web_write_setup_guide", Status::Complete).unwrap();
        let report = parse_ledger("web", Path::new("web/TASKS.md"), &updated);
        assert_eq!(report.items[0].status, Status::NotStarted);
        assert_eq!(report.items[1].status, Status::Complete);
        assert_eq!(updated.lines().count(), LEDGER.lines().count());
    }

    #[test]
    fn test_rewrite_status_preserves_crlf() {
        let content = "### A\r\n**Status:** Not Started\r\n**Priority:** Low\r\n";
        let updated = rewrite_status(content, "p", "p_a", Status::Complete).unwrap();
        assert_eq!(
            updated,
            "### A\r\n**Status:** Complete\r\n**Priority:** Low\r\n"
        );
    }

    #[test]
    fn test_rewrite_status_unknown_item() {
        assert!(rewrite_status(LEDGER, "web", "web_missing", Status::Complete).is_none());
    }
}
