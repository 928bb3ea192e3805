// tests/property_traversal.rs

use std::collections::HashSet;

use proptest::prelude::*;
use taskgraph::dag::{Dag, DagNode};

// Strategy to generate an acyclic graph as per-node dependency lists.
// Acyclicity: node N may only depend on nodes 0..N-1.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_nodes),
            num_nodes,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let deps: HashSet<usize> = if i == 0 {
                        HashSet::new()
                    } else {
                        potential.into_iter().map(|d| d % i).collect()
                    };
                    deps.into_iter().collect()
                })
                .collect()
        })
    })
}

fn name(i: usize) -> String {
    format!("node_{i}")
}

/// Root is the last node; the rest are added in reverse so dependencies are
/// often declared before their nodes exist.
fn build(deps: &[Vec<usize>]) -> Dag<()> {
    let last = deps.len() - 1;
    let dag = Dag::new(DagNode::with_dependencies(
        name(last),
        (),
        deps[last].iter().map(|d| name(*d)),
    ));
    for i in (0..last).rev() {
        dag.add_node(DagNode::with_dependencies(
            name(i),
            (),
            deps[i].iter().map(|d| name(*d)),
        ))
        .unwrap();
    }
    dag
}

proptest! {
    #[test]
    fn test_traversal_respects_dependencies(deps in dag_strategy(12)) {
        let dag = build(&deps);
        dag.prepare_for_enumeration().unwrap();

        let mut completed = HashSet::new();
        while let Some(node) = dag.get_next() {
            for dep in node.dependency_keys() {
                prop_assert!(completed.contains(&dep), "{} before {}", node.key(), dep);
            }
            prop_assert!(completed.insert(node.key().to_string()), "{} returned twice", node.key());
            dag.report_completion(node.key());
        }

        prop_assert_eq!(completed.len(), deps.len());
        prop_assert!(dag.is_exhausted());
    }

    #[test]
    fn test_failure_never_releases_descendants(
        deps in dag_strategy(12),
        fail_at in any::<usize>(),
    ) {
        let dag = build(&deps);
        dag.prepare_for_enumeration().unwrap();
        let victim = name(fail_at % deps.len());

        let mut failed = HashSet::new();
        let mut completed = HashSet::new();
        while let Some(node) = dag.get_next() {
            let key = node.key().to_string();
            for dep in node.dependency_keys() {
                prop_assert!(!failed.contains(&dep), "{} released after {} failed", key, dep);
            }
            if key == victim {
                dag.report_failure(&key);
                failed.insert(key);
            } else {
                dag.report_completion(&key);
                completed.insert(key);
            }
        }

        prop_assert!(dag.is_exhausted());
        prop_assert!(completed.len() + failed.len() <= deps.len());
    }
}
