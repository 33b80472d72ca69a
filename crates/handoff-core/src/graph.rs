use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A single decomposition step of a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// `<work-item-id>_<step-slug>`; stable across decompositions.
    pub id: String,
    /// Human-readable summary of the step.
    pub description: String,
    /// Normalized capability tag used for assignment.
    pub required_capability: String,
    /// Minutes allotted from the parent estimate.
    pub estimated_minutes: u32,
    /// Sibling subtask ids that must be complete first.
    pub dependencies: BTreeSet<String>,
    /// May run alongside other subtasks whose dependencies are met.
    pub parallel_allowed: bool,
}

impl Subtask {
    /// Sequential subtask with no dependencies.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        required_capability: impl Into<String>,
        estimated_minutes: u32,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            required_capability: required_capability.into(),
            estimated_minutes,
            dependencies: BTreeSet::new(),
            parallel_allowed: false,
        }
    }

    /// Ids of sibling subtasks that must complete first.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Mark whether the subtask may run alongside its siblings.
    pub fn parallel(mut self, allowed: bool) -> Self {
        self.parallel_allowed = allowed;
        self
    }

    /// All dependencies are in `completed` and the subtask itself is not.
    pub fn is_ready(&self, completed: &BTreeSet<String>) -> bool {
        !completed.contains(&self.id) && self.dependencies.iter().all(|d| completed.contains(d))
    }
}

/// Structural problems that prevent a graph from being built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The decomposition produced no steps.
    #[error("subtask graph for '{0}' has no subtasks")]
    Empty(String),
    /// Two subtasks share an id.
    #[error("duplicate subtask id '{0}'")]
    DuplicateId(String),
    /// A dependency names a subtask outside this graph.
    #[error("subtask '{subtask}' depends on '{dependency}', which is not a sibling")]
    UnknownDependency { subtask: String, dependency: String },
    /// The dependencies loop back on themselves.
    #[error("dependency cycle through subtask '{0}'")]
    Cycle(String),
}

/// Ordered, acyclic set of subtasks for one work item.
///
/// Only constructible through [`SubtaskGraph::new`], which rejects duplicate
/// ids, dependencies outside the graph, and cycles, so a persisted graph is
/// always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtaskGraph {
    work_item_id: String,
    subtasks: Vec<Subtask>,
}

impl SubtaskGraph {
    /// Validate and freeze `subtasks` in declaration order.
    pub fn new(work_item_id: impl Into<String>, subtasks: Vec<Subtask>) -> Result<Self, GraphError> {
        let work_item_id = work_item_id.into();
        if subtasks.is_empty() {
            return Err(GraphError::Empty(work_item_id));
        }

        let mut seen = HashSet::new();
        for task in &subtasks {
            if !seen.insert(task.id.as_str()) {
                return Err(GraphError::DuplicateId(task.id.clone()));
            }
        }
        for task in &subtasks {
            if let Some(dep) = task.dependencies.iter().find(|d| !seen.contains(d.as_str())) {
                return Err(GraphError::UnknownDependency {
                    subtask: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }

        let graph = Self {
            work_item_id,
            subtasks,
        };
        if let Some(id) = graph.find_cycle() {
            return Err(GraphError::Cycle(id));
        }
        Ok(graph)
    }

    /// A graph of one subtask; its dependencies are dropped.
    pub fn single(work_item_id: impl Into<String>, mut subtask: Subtask) -> Self {
        subtask.dependencies.clear();
        Self {
            work_item_id: work_item_id.into(),
            subtasks: vec![subtask],
        }
    }

    /// Id of the parent work item.
    pub fn work_item_id(&self) -> &str {
        &self.work_item_id
    }

    /// Subtasks in declaration order.
    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    /// Number of subtasks.
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Always false for a validated graph.
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Look up a subtask by id.
    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    /// True when `id` belongs to this graph.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Declaration index of `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.subtasks.iter().position(|t| t.id == id)
    }

    /// First subtask in declaration order that is ready given `completed`.
    pub fn next_ready(&self, completed: &BTreeSet<String>) -> Option<&Subtask> {
        self.subtasks.iter().find(|t| t.is_ready(completed))
    }

    /// Every subtask ready given `completed`, in declaration order.
    pub fn all_ready(&self, completed: &BTreeSet<String>) -> Vec<&Subtask> {
        self.subtasks.iter().filter(|t| t.is_ready(completed)).collect()
    }

    /// No other subtask remains once `id` is done.
    pub fn is_last_remaining(&self, id: &str, completed: &BTreeSet<String>) -> bool {
        self.subtasks
            .iter()
            .all(|t| t.id == id || completed.contains(&t.id))
    }

    /// True when every subtask id is in `completed`.
    pub fn is_complete(&self, completed: &BTreeSet<String>) -> bool {
        self.subtasks.iter().all(|t| completed.contains(&t.id))
    }

    /// Total estimate across all subtasks.
    pub fn total_minutes(&self) -> u32 {
        self.subtasks.iter().map(|t| t.estimated_minutes).sum()
    }

    fn find_cycle(&self) -> Option<String> {
        let index: HashMap<&str, &Subtask> =
            self.subtasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut visited: HashMap<&str, u8> = HashMap::new();
        for task in &self.subtasks {
            if let Some(id) = dfs_cycle(task.id.as_str(), &index, &mut visited) {
                return Some(id.to_string());
            }
        }
        None
    }
}

fn dfs_cycle<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Subtask>,
    visited: &mut HashMap<&'a str, u8>,
) -> Option<&'a str> {
    match visited.get(id) {
        Some(1) => return Some(id), // back edge
        Some(2) => return None,
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(task) = index.get(id).copied() {
        for dep in &task.dependencies {
            if let Some(hit) = dfs_cycle(dep.as_str(), index, visited) {
                return Some(hit);
            }
        }
    }
    visited.insert(id, 2);
    None
}

#[derive(Deserialize)]
struct RawGraph {
    work_item_id: String,
    subtasks: Vec<Subtask>,
}

// Deserialization re-runs validation so a hand-edited state file cannot smuggle in a cycle.
impl<'de> Deserialize<'de> for SubtaskGraph {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawGraph::deserialize(deserializer)?;
        SubtaskGraph::new(raw.work_item_id, raw.subtasks).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> SubtaskGraph {
        SubtaskGraph::new(
            "x",
            vec![
                Subtask::new("x_plan", "Plan", "planning", 10),
                Subtask::new("x_implement", "Implement", "debugging", 20)
                    .with_dependencies(["x_plan".to_string()]),
                Subtask::new("x_review", "Review", "review", 10)
                    .with_dependencies(["x_implement".to_string()]),
            ],
        )
        .unwrap()
    }

    fn done(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_next_ready_follows_dependencies() {
        let graph = chain();
        assert_eq!(graph.next_ready(&done(&[])).unwrap().id, "x_plan");
        assert_eq!(graph.next_ready(&done(&["x_plan"])).unwrap().id, "x_implement");
        assert!(graph
            .next_ready(&done(&["x_plan", "x_implement", "x_review"]))
            .is_none());
    }

    #[test]
    fn test_all_ready_parallel() {
        let graph = SubtaskGraph::new(
            "d",
            vec![
                Subtask::new("d_research", "Research", "research", 5).parallel(true),
                Subtask::new("d_outline", "Outline", "planning", 5).parallel(true),
                Subtask::new("d_write", "Write", "documentation", 5)
                    .with_dependencies(["d_research".to_string(), "d_outline".to_string()]),
            ],
        )
        .unwrap();
        assert_eq!(graph.all_ready(&done(&[])).len(), 2);
        assert_eq!(graph.all_ready(&done(&["d_research"])).len(), 1);
    }

    #[test]
    fn test_rejects_cycle() {
        let err = SubtaskGraph::new(
            "c",
            vec![
                Subtask::new("c_a", "A", "x", 1).with_dependencies(["c_b".to_string()]),
                Subtask::new("c_b", "B", "x", 1).with_dependencies(["c_a".to_string()]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_rejects_self_dependency() {
        let err = SubtaskGraph::new(
            "s",
            vec![Subtask::new("s_a", "A", "x", 1).with_dependencies(["s_a".to_string()])],
        )
        .unwrap_err();
        assert_eq!(err, GraphError::Cycle("s_a".into()));
    }

    #[test]
    fn test_rejects_unknown_dependency_and_duplicates() {
        let err = SubtaskGraph::new(
            "u",
            vec![Subtask::new("u_a", "A", "x", 1).with_dependencies(["other_b".to_string()])],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));

        let err = SubtaskGraph::new(
            "u",
            vec![Subtask::new("u_a", "A", "x", 1), Subtask::new("u_a", "A", "x", 1)],
        )
        .unwrap_err();
        assert_eq!(err, GraphError::DuplicateId("u_a".into()));

        assert!(matches!(
            SubtaskGraph::new("u", vec![]).unwrap_err(),
            GraphError::Empty(_)
        ));
    }

    #[test]
    fn test_single_drops_dependencies() {
        let graph = SubtaskGraph::single(
            "s",
            Subtask::new("s_complete", "S", "x", 5).with_dependencies(["elsewhere".to_string()]),
        );
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.next_ready(&done(&[])).unwrap().id, "s_complete");
    }

    #[test]
    fn test_is_last_remaining() {
        let graph = chain();
        assert!(!graph.is_last_remaining("x_plan", &done(&[])));
        assert!(graph.is_last_remaining("x_review", &done(&["x_plan", "x_implement"])));
    }

    #[test]
    fn test_deserialize_revalidates() {
        let json = r#"{"work_item_id":"c","subtasks":[
            {"id":"c_a","description":"A","required_capability":"x","estimated_minutes":1,"dependencies":["c_a"],"parallel_allowed":false}
        ]}"#;
        assert!(serde_json::from_str::<SubtaskGraph>(json).is_err());

        let round: SubtaskGraph =
            serde_json::from_str(&serde_json::to_string(&chain()).unwrap()).unwrap();
        assert_eq!(round, chain());
    }
}
