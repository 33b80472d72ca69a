use handoff_core::WorkItem;
use std::collections::HashMap;

/// The presentable backlog.
///
/// Selection indices: `0` is the continue entry (when present), then `ready`,
/// then `blocked`, numbered from `1` in that order.
#[derive(Debug, Clone, Default)]
pub struct RankedBacklog<'a> {
    /// The active work item from the previous session, if it is still open.
    pub continue_last: Option<&'a WorkItem>,
    /// Items with no unresolved blockers, best first.
    pub ready: Vec<&'a WorkItem>,
    /// Items waiting on at least one incomplete (or unknown) item, best first.
    pub blocked: Vec<&'a WorkItem>,
}

impl<'a> RankedBacklog<'a> {
    /// Everything in presentation order: continue entry, ready, blocked.
    pub fn ordered(&self) -> Vec<&'a WorkItem> {
        self.continue_last
            .into_iter()
            .chain(self.ready.iter().copied())
            .chain(self.blocked.iter().copied())
            .collect()
    }

    /// Resolve a user-facing selection index.
    pub fn select(&self, index: usize) -> Option<&'a WorkItem> {
        if index == 0 {
            return self.continue_last;
        }
        self.ready
            .iter()
            .chain(self.blocked.iter())
            .nth(index - 1)
            .copied()
    }

    /// True when there is nothing left to work on.
    pub fn is_empty(&self) -> bool {
        self.continue_last.is_none() && self.ready.is_empty() && self.blocked.is_empty()
    }

    /// Number of numbered (non-continue) entries.
    pub fn numbered_len(&self) -> usize {
        self.ready.len() + self.blocked.len()
    }
}

/// Order the backlog across all projects.
///
/// Complete items are dropped. Within each partition items sort by priority
/// (critical first), then by estimate (shortest first, unestimated last); the
/// sort is stable so ties keep ledger order.
pub fn rank<'a>(items: &'a [WorkItem], active_work_item_id: Option<&str>) -> RankedBacklog<'a> {
    let by_id: HashMap<&str, &WorkItem> = items.iter().map(|i| (i.id.as_str(), i)).collect();

    let continue_last = active_work_item_id
        .and_then(|id| by_id.get(id).copied())
        .filter(|item| !item.is_complete());

    let mut ready = Vec::new();
    let mut blocked = Vec::new();
    for item in items {
        if item.is_complete() || continue_last.is_some_and(|c| c.id == item.id) {
            continue;
        }
        let unresolved = item
            .blocked_by
            .iter()
            .any(|dep| !by_id.get(dep.as_str()).is_some_and(|d| d.is_complete()));
        if unresolved {
            blocked.push(item);
        } else {
            ready.push(item);
        }
    }

    let key = |item: &&WorkItem| (item.priority, item.estimated_minutes.unwrap_or(u32::MAX));
    ready.sort_by_key(key);
    blocked.sort_by_key(key);

    RankedBacklog {
        continue_last,
        ready,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handoff_core::{Priority, Status};

    fn item(title: &str, priority: Priority, minutes: Option<u32>) -> WorkItem {
        let mut item = WorkItem::new("p", title, Status::NotStarted, priority, "debugging");
        item.estimated_minutes = minutes;
        item
    }

    fn titles(items: &[&WorkItem]) -> Vec<String> {
        items.iter().map(|i| i.title.clone()).collect()
    }

    #[test]
    fn test_priority_then_estimate_then_insertion() {
        let items = vec![
            item("low", Priority::Low, Some(5)),
            item("high-long", Priority::High, Some(90)),
            item("high-short", Priority::High, Some(10)),
            item("high-none", Priority::High, None),
            item("high-short-2", Priority::High, Some(10)),
            item("critical", Priority::Critical, None),
        ];
        let ranked = rank(&items, None);
        assert_eq!(
            titles(&ranked.ready),
            vec!["critical", "high-short", "high-short-2", "high-long", "high-none", "low"]
        );
    }

    #[test]
    fn test_complete_items_excluded() {
        let mut done = item("done", Priority::Critical, None);
        done.status = Status::Complete;
        let items = vec![done, item("open", Priority::Low, None)];
        let ranked = rank(&items, None);
        assert_eq!(titles(&ranked.ordered()), vec!["open"]);
    }

    #[test]
    fn test_blocked_partition_after_ready() {
        let mut dep = item("dep", Priority::Low, None);
        let waiting = item("waiting", Priority::Critical, None).with_blocked_by([dep.id.clone()]);
        let unknown = item("unknown", Priority::Critical, None)
            .with_blocked_by(["p_not_there".to_string()]);
        let items = vec![waiting.clone(), unknown.clone(), dep.clone()];

        let ranked = rank(&items, None);
        assert_eq!(titles(&ranked.ready), vec!["dep"]);
        assert_eq!(titles(&ranked.blocked), vec!["waiting", "unknown"]);

        dep.status = Status::Complete;
        let items = vec![waiting, unknown, dep];
        let ranked = rank(&items, None);
        assert_eq!(titles(&ranked.ready), vec!["waiting"]);
        assert_eq!(titles(&ranked.blocked), vec!["unknown"]);
    }

    #[test]
    fn test_continue_last_surfaced_first_and_not_repeated() {
        let items = vec![
            item("top", Priority::Critical, None),
            item("resume", Priority::Deferred, None),
        ];
        let ranked = rank(&items, Some("p_resume"));
        assert_eq!(ranked.continue_last.unwrap().title, "resume");
        assert_eq!(titles(&ranked.ordered()), vec!["resume", "top"]);
        assert_eq!(ranked.select(0).unwrap().title, "resume");
        assert_eq!(ranked.select(1).unwrap().title, "top");
        assert!(ranked.select(2).is_none());
    }

    #[test]
    fn test_continue_last_ignored_when_complete_or_missing() {
        let mut finished = item("finished", Priority::High, None);
        finished.status = Status::Complete;
        let items = vec![finished, item("other", Priority::High, None)];
        assert!(rank(&items, Some("p_finished")).continue_last.is_none());
        assert!(rank(&items, Some("p_gone")).continue_last.is_none());
        assert!(rank(&items, None).select(0).is_none());
    }
}
