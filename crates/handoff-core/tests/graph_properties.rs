//! Property tests for subtask graph construction.

use handoff_core::{GraphError, Subtask, SubtaskGraph};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Edges only point at earlier nodes, so every generated graph is a DAG.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..12).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::vec(0..i, 0..=i.min(3)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn build(edges: &[Vec<usize>]) -> Vec<Subtask> {
    edges
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            Subtask::new(format!("w_{i}"), format!("step {i}"), "cap", 5)
                .with_dependencies(deps.iter().map(|d| format!("w_{d}")))
        })
        .collect()
}

proptest! {
    /// Property: graphs whose edges point backwards are accepted.
    #[test]
    fn forward_only_graphs_are_accepted(edges in dag_strategy()) {
        prop_assert!(SubtaskGraph::new("w", build(&edges)).is_ok());
    }

    /// Property: draining `next_ready` visits every node exactly once, dependencies first.
    #[test]
    fn next_ready_yields_a_topological_order(edges in dag_strategy()) {
        let graph = SubtaskGraph::new("w", build(&edges)).unwrap();
        let mut completed = BTreeSet::new();
        while let Some(task) = graph.next_ready(&completed) {
            for dep in &task.dependencies {
                prop_assert!(completed.contains(dep));
            }
            completed.insert(task.id.clone());
        }
        prop_assert_eq!(completed.len(), graph.len());
        prop_assert!(graph.is_complete(&completed));
    }

    /// Property: adding an edge from the first node to the last always closes a cycle
    /// when the last node already (transitively) depends on the first.
    #[test]
    fn back_edge_over_a_chain_is_rejected(n in 2usize..10) {
        let mut edges: Vec<Vec<usize>> = (0..n).map(|i| if i == 0 { vec![] } else { vec![i - 1] }).collect();
        edges[0].push(n - 1);
        let err = SubtaskGraph::new("w", build(&edges)).unwrap_err();
        prop_assert!(matches!(err, GraphError::Cycle(_)));
    }
}
