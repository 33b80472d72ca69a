use handoff_core::{normalize_capability, write_atomic, HandoffError, HandoffResult, Subtask};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Relative cost of using an executor. Declaration order is preference order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    /// No per-use cost.
    Free,
    /// Cheap enough to use freely.
    #[default]
    Low,
    /// Metered or rate-limited.
    Medium,
    /// Reserve for work nothing cheaper can do.
    High,
}

impl fmt::Display for CostTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostTier::Free => write!(f, "free"),
            CostTier::Low => write!(f, "low"),
            CostTier::Medium => write!(f, "medium"),
            CostTier::High => write!(f, "high"),
        }
    }
}

impl FromStr for CostTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(CostTier::Free),
            "low" => Ok(CostTier::Low),
            "medium" => Ok(CostTier::Medium),
            "high" => Ok(CostTier::High),
            other => Err(format!(
                "unknown cost tier '{other}' (expected free, low, medium or high)"
            )),
        }
    }
}

/// A capability-tagged worker that can take subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executor {
    /// Unique key used in state files and on the command line.
    pub id: String,
    /// Name shown in instructions.
    pub display_name: String,
    /// Disabled executors are never assigned, not even as fallback.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Cheaper tiers win when several executors qualify.
    #[serde(default)]
    pub cost_tier: CostTier,
    /// Normalized capability tags.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Needs an API key or login before use.
    #[serde(default)]
    pub requires_credential: bool,
    /// What the executor is good at; used as its framing in instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form remark shown by `handoff agents list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Executor {
    /// Enabled, low-cost executor with no description or notes.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            enabled: true,
            cost_tier: CostTier::default(),
            capabilities: vec![],
            requires_credential: false,
            description: None,
            notes: None,
        }
    }

    /// Exact match against a normalized tag.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Why no executor could take a subtask.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignmentError {
    /// Nothing enabled covers the capability and no fallback is configured.
    #[error(
        "no enabled executor has capability '{capability}' (needed by subtask '{subtask_id}'); \
         enable one with `handoff agents enable <id>` or set `fallback_executor`"
    )]
    NoCapableExecutor {
        capability: String,
        subtask_id: String,
    },
    /// The configured fallback id is not registered.
    #[error("fallback executor '{0}' is not in the registry")]
    UnknownFallback(String),
    /// The configured fallback exists but is disabled.
    #[error("fallback executor '{0}' is disabled; enable it with `handoff agents enable {0}`")]
    FallbackDisabled(String),
}

impl From<AssignmentError> for HandoffError {
    fn from(err: AssignmentError) -> Self {
        HandoffError::Assignment(err.to_string())
    }
}

/// The validated executor list, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorRegistry {
    #[serde(rename = "executor", default)]
    executors: Vec<Executor>,
}

impl ExecutorRegistry {
    /// Validate ids (non-empty, unique) and normalize capability tags.
    pub fn new(mut executors: Vec<Executor>) -> HandoffResult<Self> {
        let mut seen = HashSet::new();
        for executor in &mut executors {
            executor.id = executor.id.trim().to_string();
            if executor.id.is_empty() {
                return Err(HandoffError::Config(format!(
                    "Executor '{}' has an empty id",
                    executor.display_name
                )));
            }
            if !seen.insert(executor.id.clone()) {
                return Err(HandoffError::Config(format!(
                    "Executor id '{}' is declared more than once",
                    executor.id
                )));
            }
            executor.capabilities = executor
                .capabilities
                .iter()
                .map(|c| normalize_capability(c))
                .filter(|c| !c.is_empty())
                .collect();
        }
        Ok(Self { executors })
    }

    /// Parse and validate registry TOML. `source` names the file in errors.
    pub fn from_toml_str(text: &str, source: &str) -> HandoffResult<Self> {
        let raw: ExecutorRegistry = toml::from_str(text)
            .map_err(|e| HandoffError::Config(format!("Invalid executor registry {source}: {e}")))?;
        Self::new(raw.executors)
            .map_err(|e| HandoffError::Config(format!("{source}: {e}")))
    }

    /// Load from `path`, or use the built-in registry when the file does not exist.
    pub async fn load(path: &Path) -> HandoffResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let registry = Self::from_toml_str(&text, &path.display().to_string())?;
                debug!(path = %path.display(), executors = registry.len(), "Registry loaded");
                Ok(registry)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No executor registry, using built-in defaults");
                Ok(default_registry())
            }
            Err(e) => Err(HandoffError::Config(format!(
                "Failed to read executor registry {}: {e}",
                path.display()
            ))),
        }
    }

    /// Serialize in the same shape [`ExecutorRegistry::from_toml_str`] reads.
    pub fn to_toml_string(&self) -> HandoffResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HandoffError::Config(format!("Failed to serialize registry: {e}")))
    }

    /// Write the registry to `path` atomically.
    pub async fn save(&self, path: &Path) -> HandoffResult<()> {
        write_atomic(path, &self.to_toml_string()?).await?;
        info!(path = %path.display(), "Registry saved");
        Ok(())
    }

    /// Executors in declaration order.
    pub fn executors(&self) -> &[Executor] {
        &self.executors
    }

    /// Number of registered executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Look up an executor by id.
    pub fn get(&self, id: &str) -> Option<&Executor> {
        self.executors.iter().find(|e| e.id == id)
    }

    /// Append an executor after the same validation [`ExecutorRegistry::new`] applies.
    pub fn add(&mut self, executor: Executor) -> HandoffResult<()> {
        let mut executors = self.executors.clone();
        executors.push(executor);
        *self = Self::new(executors)?;
        Ok(())
    }

    /// Remove and return the executor with `id`.
    pub fn remove(&mut self, id: &str) -> HandoffResult<Executor> {
        let index = self
            .executors
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| HandoffError::Config(format!("Unknown executor '{id}'")))?;
        Ok(self.executors.remove(index))
    }

    /// Toggle an executor. This edits the user's registry file, never the
    /// registry an orchestration run is using.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> HandoffResult<()> {
        let executor = self
            .executors
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| HandoffError::Config(format!("Unknown executor '{id}'")))?;
        executor.enabled = enabled;
        Ok(())
    }
}

/// Cheapest enabled executor with the subtask's capability; ties go to the
/// earliest declared.
pub fn assign<'r>(
    subtask: &Subtask,
    registry: &'r ExecutorRegistry,
) -> Result<&'r Executor, AssignmentError> {
    registry
        .executors()
        .iter()
        .filter(|e| e.enabled && e.has_capability(&subtask.required_capability))
        .min_by_key(|e| e.cost_tier)
        .ok_or_else(|| AssignmentError::NoCapableExecutor {
            capability: subtask.required_capability.clone(),
            subtask_id: subtask.id.clone(),
        })
}

/// [`assign`], falling back to `fallback_id` only when no capable executor exists.
pub fn assign_with_fallback<'r>(
    subtask: &Subtask,
    registry: &'r ExecutorRegistry,
    fallback_id: &str,
) -> Result<&'r Executor, AssignmentError> {
    match assign(subtask, registry) {
        Ok(executor) => Ok(executor),
        Err(err) => {
            let fallback = registry
                .get(fallback_id)
                .ok_or_else(|| AssignmentError::UnknownFallback(fallback_id.to_string()))?;
            if !fallback.enabled {
                return Err(AssignmentError::FallbackDisabled(fallback_id.to_string()));
            }
            warn!(
                subtask = %subtask.id,
                fallback = %fallback.id,
                reason = %err,
                "Assigning fallback executor"
            );
            Ok(fallback)
        }
    }
}

/// Registry used when no registry file exists.
pub fn default_registry() -> ExecutorRegistry {
    let executor = |id: &str,
                    name: &str,
                    tier: CostTier,
                    enabled: bool,
                    capabilities: &[&str],
                    description: &str| Executor {
        id: id.to_string(),
        display_name: name.to_string(),
        enabled,
        cost_tier: tier,
        capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
        requires_credential: false,
        description: Some(description.to_string()),
        notes: None,
    };

    let mut perplexity = executor(
        "perplexity",
        "Perplexity",
        CostTier::Medium,
        false,
        &["research", "citations", "documentation-search"],
        "Research with citations, finding docs and prior solutions",
    );
    perplexity.requires_credential = true;
    perplexity.notes = Some("Requires an API key".to_string());

    ExecutorRegistry {
        executors: vec![
            executor(
                "claude-code",
                "Claude Code",
                CostTier::High,
                true,
                &["server-ops", "deployment", "debugging", "testing"],
                "Server operations, deployment, complex debugging, and validation on real systems",
            ),
            executor(
                "codex",
                "Codex",
                CostTier::Low,
                true,
                &["documentation", "yaml", "code-formatting", "linting"],
                "Documentation, YAML drafting, code formatting, and convention reviews",
            ),
            executor(
                "chatgpt",
                "ChatGPT",
                CostTier::Medium,
                true,
                &["planning", "brainstorming", "architecture", "review", "research"],
                "Planning, architecture decisions, and logic reviews",
            ),
            perplexity,
            executor(
                "gemini",
                "Gemini",
                CostTier::Low,
                false,
                &["analysis", "summarization", "large-documents"],
                "Large document analysis and summarization",
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(capability: &str) -> Subtask {
        Subtask::new("web_docs_write", "Write docs", capability, 10)
    }

    fn executor(id: &str, tier: CostTier, enabled: bool, caps: &[&str]) -> Executor {
        Executor {
            id: id.into(),
            display_name: id.to_uppercase(),
            enabled,
            cost_tier: tier,
            capabilities: caps.iter().map(|c| c.to_string()).collect(),
            requires_credential: false,
            description: None,
            notes: None,
        }
    }

    #[test]
    fn test_disabled_only_candidate_is_no_capable_executor() {
        let registry =
            ExecutorRegistry::new(vec![executor("scribe", CostTier::Free, false, &["documentation"])])
                .unwrap();
        let err = assign(&subtask("documentation"), &registry).unwrap_err();
        assert_eq!(
            err,
            AssignmentError::NoCapableExecutor {
                capability: "documentation".into(),
                subtask_id: "web_docs_write".into()
            }
        );
    }

    #[test]
    fn test_cheapest_tier_then_declaration_order() {
        let registry = ExecutorRegistry::new(vec![
            executor("pricey", CostTier::High, true, &["review"]),
            executor("first-low", CostTier::Low, true, &["review"]),
            executor("second-low", CostTier::Low, true, &["review"]),
            executor("free-off", CostTier::Free, false, &["review"]),
        ])
        .unwrap();
        assert_eq!(assign(&subtask("review"), &registry).unwrap().id, "first-low");
    }

    #[test]
    fn test_fallback_only_after_failure() {
        let registry = ExecutorRegistry::new(vec![
            executor("generalist", CostTier::High, true, &["debugging"]),
            executor("writer", CostTier::Low, true, &["documentation"]),
            executor("off", CostTier::Low, false, &[]),
        ])
        .unwrap();

        let normal = assign_with_fallback(&subtask("documentation"), &registry, "generalist");
        assert_eq!(normal.unwrap().id, "writer");

        let fallback = assign_with_fallback(&subtask("research"), &registry, "generalist");
        assert_eq!(fallback.unwrap().id, "generalist");

        assert_eq!(
            assign_with_fallback(&subtask("research"), &registry, "ghost").unwrap_err(),
            AssignmentError::UnknownFallback("ghost".into())
        );
        assert_eq!(
            assign_with_fallback(&subtask("research"), &registry, "off").unwrap_err(),
            AssignmentError::FallbackDisabled("off".into())
        );
    }

    #[test]
    fn test_validation_rejects_duplicate_and_empty_ids() {
        let dup = ExecutorRegistry::new(vec![
            executor("a", CostTier::Low, true, &[]),
            executor("a", CostTier::High, true, &[]),
        ]);
        assert!(dup.unwrap_err().to_string().contains("more than once"));

        let empty = ExecutorRegistry::new(vec![executor("  ", CostTier::Low, true, &[])]);
        assert!(empty.is_err());
    }

    #[test]
    fn test_toml_round_trip_preserves_order_and_normalizes() {
        let text = r#"
[[executor]]
id = "ops"
display_name = "Ops Bot"
cost_tier = "free"
capabilities = ["Server Ops", "deployment"]

[[executor]]
id = "writer"
display_name = "Writer"
enabled = false
capabilities = ["documentation"]
requires_credential = true
notes = "needs a key"
"#;
        let registry = ExecutorRegistry::from_toml_str(text, "agents.toml").unwrap();
        let ids: Vec<&str> = registry.executors().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["ops", "writer"]);
        assert!(registry.get("ops").unwrap().enabled);
        assert_eq!(registry.get("ops").unwrap().capabilities, vec!["server-ops", "deployment"]);
        assert_eq!(registry.get("writer").unwrap().cost_tier, CostTier::Low);

        let again =
            ExecutorRegistry::from_toml_str(&registry.to_toml_string().unwrap(), "x").unwrap();
        assert_eq!(again, registry);
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let err = ExecutorRegistry::from_toml_str("[[executor]]\nid = 3", "agents.toml").unwrap_err();
        assert!(err.to_string().contains("agents.toml"));
    }

    #[test]
    fn test_default_registry_is_valid_and_covers_builtin_steps() {
        let registry = default_registry();
        assert!(ExecutorRegistry::new(registry.executors().to_vec()).is_ok());
        for capability in ["planning", "review", "testing", "research", "documentation", "yaml", "deployment"] {
            assert!(
                assign(&subtask(capability), &registry).is_ok(),
                "no default executor for {capability}"
            );
        }
        assert!(!registry.get("perplexity").unwrap().enabled);
    }

    #[test]
    fn test_add_validates_and_normalizes() {
        let mut registry = default_registry();
        let before = registry.len();

        let mut ops = Executor::new(" local-ops ", "Local Ops");
        ops.cost_tier = CostTier::Free;
        ops.capabilities = vec!["Server Ops".into(), " ".into()];
        registry.add(ops).unwrap();

        assert_eq!(registry.len(), before + 1);
        let added = registry.executors().last().unwrap();
        assert_eq!(added.id, "local-ops");
        assert_eq!(added.capabilities, vec!["server-ops"]);
        assert_eq!(
            assign(&subtask("server-ops"), &registry).unwrap().id,
            "local-ops"
        );

        let err = registry.add(Executor::new("codex", "Codex again")).unwrap_err();
        assert!(err.to_string().contains("more than once"));
        assert_eq!(registry.len(), before + 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = default_registry();
        let removed = registry.remove("gemini").unwrap();
        assert_eq!(removed.display_name, "Gemini");
        assert!(registry.get("gemini").is_none());
        assert!(registry.remove("gemini").is_err());
    }

    #[test]
    fn test_cost_tier_from_str() {
        assert_eq!("Free".parse::<CostTier>(), Ok(CostTier::Free));
        assert_eq!(" high ".parse::<CostTier>(), Ok(CostTier::High));
        assert!("cheap".parse::<CostTier>().unwrap_err().contains("cheap"));
    }

    #[test]
    fn test_set_enabled() {
        let mut registry = default_registry();
        registry.set_enabled("gemini", true).unwrap();
        assert!(registry.get("gemini").unwrap().enabled);
        assert!(registry.set_enabled("nobody", true).is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults_and_save_reloads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("agents.toml");
        let mut registry = ExecutorRegistry::load(&path).await.unwrap();
        assert_eq!(registry, default_registry());

        registry.set_enabled("codex", false).unwrap();
        registry.save(&path).await.unwrap();
        let reloaded = ExecutorRegistry::load(&path).await.unwrap();
        assert!(!reloaded.get("codex").unwrap().enabled);
    }
}
