/// Normalize free text into an id fragment.
///
/// Lowercases ASCII alphanumerics and collapses every other run of characters
/// into a single `_`, with no leading or trailing separator.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Canonical form of a capability tag: trimmed, lowercase, whitespace runs as `-`.
///
/// Unlike [`slugify`] this keeps `-` so tags such as `server-ops` read the same in
/// ledgers, the executor registry, and decomposition patterns.
pub fn normalize_capability(tag: &str) -> String {
    tag.trim()
        .trim_matches('`')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Stable id of a work item: `<project>_<title>`, both slugified.
pub fn work_item_id(project: &str, title: &str) -> String {
    format!("{}_{}", slugify(project), slugify(title))
}

/// Stable id of a subtask: the parent work item id plus the step slug.
pub fn subtask_id(work_item_id: &str, step: &str) -> String {
    format!("{}_{}", work_item_id, slugify(step))
}
