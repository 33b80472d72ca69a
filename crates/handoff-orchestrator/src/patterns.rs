use serde::{Deserialize, Serialize};

/// One step of a decomposition template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDef {
    /// Appended to the work item id to form the subtask id.
    pub slug: String,
    /// `{title}` is replaced with the work item title.
    pub description: String,
    /// Capability tag; `None` inherits the work item's capability.
    #[serde(default)]
    pub capability: Option<String>,
    /// Percentage of the item estimate given to this step.
    pub share: u32,
    /// Slugs of sibling steps that must finish first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// May run alongside other ready steps.
    #[serde(default)]
    pub parallel: bool,
}

impl StepDef {
    fn new(slug: &str, description: &str, capability: Option<&str>, share: u32) -> Self {
        Self {
            slug: slug.to_string(),
            description: description.to_string(),
            capability: capability.map(str::to_string),
            share,
            depends_on: Vec::new(),
            parallel: false,
        }
    }

    fn after(mut self, slug: &str) -> Self {
        self.depends_on.push(slug.to_string());
        self
    }

    fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }
}

/// A named decomposition pattern: a keyword predicate plus a step template.
///
/// Keywords match at the start of a word, case-insensitively, so `implement`
/// also matches "Implementation".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDef {
    /// Shown in logs and used to resolve overrides.
    pub name: String,
    /// Any one matching the title selects the pattern.
    pub keywords: Vec<String>,
    /// Steps in declaration order.
    pub steps: Vec<StepDef>,
}

/// Name of the single-step fallback pattern.
pub const ATOMIC_PATTERN: &str = "atomic";

/// Built-in patterns in evaluation order.
pub fn builtin_patterns() -> Vec<PatternDef> {
    vec![
        implementation_pattern(),
        documentation_pattern(),
        configuration_pattern(),
        fix_pattern(),
    ]
}

/// The fallback: one subtask equal to the work item.
pub fn atomic_pattern() -> PatternDef {
    PatternDef {
        name: ATOMIC_PATTERN.to_string(),
        keywords: Vec::new(),
        steps: vec![StepDef::new("complete", "{title}", None, 100)],
    }
}

fn implementation_pattern() -> PatternDef {
    PatternDef {
        name: "implementation".to_string(),
        keywords: keywords(&["implement", "create", "build", "add"]),
        steps: vec![
            StepDef::new("plan", "Plan implementation for: {title}", Some("planning"), 15),
            StepDef::new("implement", "Implement: {title}", None, 55).after("plan"),
            StepDef::new("review", "Review implementation: {title}", Some("review"), 15)
                .after("implement"),
            StepDef::new("test", "Test and validate: {title}", Some("testing"), 15)
                .after("review"),
        ],
    }
}

fn documentation_pattern() -> PatternDef {
    PatternDef {
        name: "documentation".to_string(),
        keywords: keywords(&["document", "research", "write-up"]),
        steps: vec![
            StepDef::new("research", "Research: {title}", Some("research"), 30).parallel(),
            StepDef::new("write", "Document findings: {title}", Some("documentation"), 40)
                .after("research"),
            StepDef::new("review", "Review documentation: {title}", Some("review"), 30)
                .after("write"),
        ],
    }
}

fn configuration_pattern() -> PatternDef {
    PatternDef {
        name: "configuration".to_string(),
        keywords: keywords(&["automation", "config", "yaml"]),
        steps: vec![
            StepDef::new("draft", "Draft configuration for: {title}", Some("yaml"), 40),
            StepDef::new("review", "Review structure and conventions: {title}", Some("review"), 20)
                .after("draft"),
            StepDef::new("validate", "Validate syntax and deploy: {title}", Some("deployment"), 20)
                .after("review"),
            StepDef::new("test", "Test on the target system: {title}", Some("testing"), 20)
                .after("validate"),
        ],
    }
}

fn fix_pattern() -> PatternDef {
    PatternDef {
        name: "fix".to_string(),
        keywords: keywords(&["fix", "bug", "cleanup", "refactor"]),
        steps: vec![
            StepDef::new("fix", "Fix or clean up: {title}", None, 70),
            StepDef::new("verify", "Verify fix: {title}", Some("testing"), 30).after("fix"),
        ],
    }
}

fn keywords(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| (*w).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_order() {
        let names: Vec<String> = builtin_patterns().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["implementation", "documentation", "configuration", "fix"]);
    }

    #[test]
    fn test_builtin_dependencies_name_earlier_steps() {
        for pattern in builtin_patterns() {
            let mut seen = HashSet::new();
            for step in &pattern.steps {
                for dep in &step.depends_on {
                    assert!(seen.contains(dep), "{}: {} before {dep}", pattern.name, step.slug);
                }
                seen.insert(step.slug.clone());
            }
        }
    }

    #[test]
    fn test_builtin_shares_cover_estimate() {
        for pattern in builtin_patterns().into_iter().chain([atomic_pattern()]) {
            let total: u32 = pattern.steps.iter().map(|s| s.share).sum();
            assert_eq!(total, 100, "{}", pattern.name);
        }
    }

    #[test]
    fn test_pattern_from_toml() {
        let pattern: PatternDef = toml::from_str(
            r#"
name = "release"
keywords = ["release", "ship"]

[[steps]]
slug = "changelog"
description = "Changelog for {title}"
capability = "documentation"
share = 30

[[steps]]
slug = "tag"
description = "Tag {title}"
share = 70
depends_on = ["changelog"]
"#,
        )
        .unwrap();
        assert_eq!(pattern.steps.len(), 2);
        assert_eq!(pattern.steps[1].capability, None);
        assert!(!pattern.steps[1].parallel);
    }
}
