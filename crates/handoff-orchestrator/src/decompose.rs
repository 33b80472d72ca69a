use crate::patterns::{atomic_pattern, builtin_patterns, PatternDef, ATOMIC_PATTERN};
use handoff_core::{
    normalize_capability, subtask_id, GraphError, HandoffError, Subtask, SubtaskGraph, WorkItem,
};
use regex::Regex;
use tracing::{debug, info, warn};

/// Estimate assumed for work items that carry none.
pub const DEFAULT_ESTIMATE_MINUTES: u32 = 30;

/// A pattern that cannot produce a valid graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecompositionError {
    /// A keyword is empty or does not compile to a pattern.
    #[error("pattern '{pattern}' has an unusable keyword '{keyword}': {reason}")]
    InvalidKeyword {
        pattern: String,
        keyword: String,
        reason: String,
    },
    /// `depends_on` names a slug the pattern does not define.
    #[error("pattern '{pattern}' step '{step}' depends on unknown step '{dependency}'")]
    UnknownStep {
        pattern: String,
        step: String,
        dependency: String,
    },
    /// The instantiated steps fail graph validation.
    #[error("pattern '{pattern}' produced an invalid graph: {source}")]
    InvalidGraph {
        pattern: String,
        #[source]
        source: GraphError,
    },
}

impl From<DecompositionError> for HandoffError {
    fn from(err: DecompositionError) -> Self {
        HandoffError::Decomposition(err.to_string())
    }
}

/// A pattern with its keyword predicate compiled.
#[derive(Debug)]
struct CompiledPattern {
    def: PatternDef,
    matcher: Option<Regex>,
}

impl CompiledPattern {
    fn compile(def: PatternDef) -> Result<Self, DecompositionError> {
        let words: Vec<String> = def
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();
        let matcher = if words.is_empty() {
            None
        } else {
            let source = format!(r"(?i)\b(?:{})", words.join("|"));
            Some(Regex::new(&source).map_err(|e| DecompositionError::InvalidKeyword {
                pattern: def.name.clone(),
                keyword: def.keywords.join(", "),
                reason: e.to_string(),
            })?)
        };
        Ok(Self { def, matcher })
    }

    fn matches(&self, text: &str) -> bool {
        self.matcher.as_ref().is_some_and(|m| m.is_match(text))
    }
}

/// Ordered pattern table: custom patterns first, then the built-ins.
#[derive(Debug)]
pub struct Decomposer {
    patterns: Vec<CompiledPattern>,
    atomic: PatternDef,
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Decomposer {
    /// Build the table. A custom pattern whose keywords do not compile is
    /// dropped with a warning; the built-ins always compile.
    pub fn new(custom: Vec<PatternDef>) -> Self {
        let patterns = custom
            .into_iter()
            .chain(builtin_patterns())
            .filter_map(|def| match CompiledPattern::compile(def) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!(error = %e, "Ignoring decomposition pattern");
                    None
                }
            })
            .collect();
        Self {
            patterns,
            atomic: atomic_pattern(),
        }
    }

    /// Pattern names in evaluation order, excluding the atomic fallback.
    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.def.name.as_str()).collect()
    }

    /// The pattern `item` selects: the title is tested against every pattern
    /// before the description is.
    pub fn select_pattern(&self, item: &WorkItem) -> &PatternDef {
        self.patterns
            .iter()
            .find(|p| p.matches(&item.title))
            .or_else(|| self.patterns.iter().find(|p| p.matches(&item.description)))
            .map_or(&self.atomic, |p| &p.def)
    }

    /// Split `item` into its subtask graph.
    ///
    /// Deterministic. A pattern that yields an invalid graph is reported and
    /// the item is decomposed atomically instead.
    pub fn decompose(&self, item: &WorkItem) -> SubtaskGraph {
        let pattern = self.select_pattern(item);
        match instantiate(pattern, item) {
            Ok(graph) => {
                info!(
                    item = %item.id,
                    pattern = %pattern.name,
                    subtasks = graph.len(),
                    "Work item decomposed"
                );
                graph
            }
            Err(e) => {
                warn!(item = %item.id, error = %e, "Falling back to a single subtask");
                atomic_graph(item)
            }
        }
    }
}

/// Decompose with the built-in table only.
pub fn decompose(item: &WorkItem) -> SubtaskGraph {
    Decomposer::default().decompose(item)
}

/// Apply one pattern's template to `item`.
pub fn instantiate(
    pattern: &PatternDef,
    item: &WorkItem,
) -> Result<SubtaskGraph, DecompositionError> {
    let total = item.estimated_minutes.unwrap_or(DEFAULT_ESTIMATE_MINUTES);
    let slugs: Vec<&str> = pattern.steps.iter().map(|s| s.slug.as_str()).collect();

    let mut subtasks = Vec::with_capacity(pattern.steps.len());
    for step in &pattern.steps {
        let mut deps = Vec::with_capacity(step.depends_on.len());
        for dep in &step.depends_on {
            if !slugs.contains(&dep.as_str()) {
                return Err(DecompositionError::UnknownStep {
                    pattern: pattern.name.clone(),
                    step: step.slug.clone(),
                    dependency: dep.clone(),
                });
            }
            deps.push(subtask_id(&item.id, dep));
        }
        let capability = step
            .capability
            .as_deref()
            .map_or_else(|| item.required_capability.clone(), normalize_capability);
        let minutes = (total.saturating_mul(step.share) / 100).max(1);
        debug!(step = %step.slug, capability = %capability, minutes, "Step instantiated");

        subtasks.push(
            Subtask::new(
                subtask_id(&item.id, &step.slug),
                step.description.replace("{title}", &item.title),
                capability,
                minutes,
            )
            .with_dependencies(deps)
            .parallel(step.parallel),
        );
    }

    SubtaskGraph::new(item.id.clone(), subtasks).map_err(|source| {
        DecompositionError::InvalidGraph {
            pattern: pattern.name.clone(),
            source,
        }
    })
}

fn atomic_graph(item: &WorkItem) -> SubtaskGraph {
    let minutes = item.estimated_minutes.unwrap_or(DEFAULT_ESTIMATE_MINUTES).max(1);
    debug!(item = %item.id, pattern = ATOMIC_PATTERN, "Atomic decomposition");
    SubtaskGraph::single(
        item.id.clone(),
        Subtask::new(
            subtask_id(&item.id, "complete"),
            item.title.clone(),
            item.required_capability.clone(),
            minutes,
        ),
    )
}
