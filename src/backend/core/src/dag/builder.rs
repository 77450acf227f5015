//! Spec -> graph construction with dangling-dependency and cycle
//! validation.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::{DagGraph, DagNode, DagTaskSpec};
use crate::error::{ErrorCode, Result, TaskHubError};
use crate::task::TaskId;

/// Accumulates task specs, validates the dependency structure, and builds
/// the runtime graph.
#[derive(Default)]
pub struct DagBuilder {
    specs: Vec<DagTaskSpec>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, spec: DagTaskSpec) {
        self.specs.push(spec);
    }

    /// Check that every dependency exists and that the graph is acyclic.
    pub fn validate(&self) -> Result<()> {
        let ids: HashSet<&str> = self.specs.iter().map(|s| s.id.value.as_str()).collect();

        for spec in &self.specs {
            for dep in &spec.deps {
                if !dep.value.is_empty() && !ids.contains(dep.value.as_str()) {
                    return Err(TaskHubError::new(
                        ErrorCode::MissingDep,
                        format!("dependency not found: {} (required by {})", dep.value, spec.id.value),
                    ));
                }
            }
        }

        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index = HashMap::new();
        for spec in &self.specs {
            let idx = graph.add_node(spec.id.value.as_str());
            index.insert(spec.id.value.as_str(), idx);
        }
        for spec in &self.specs {
            for dep in &spec.deps {
                graph.add_edge(index[dep.value.as_str()], index[spec.id.value.as_str()], ());
            }
        }

        toposort(&graph, None).map_err(|cycle| {
            let node = graph[cycle.node_id()];
            TaskHubError::new(ErrorCode::CycleDetected, format!("cycle detected involving task: {node}"))
        })?;

        Ok(())
    }

    /// Build the runtime graph. Call [`validate`](Self::validate) first;
    /// building an invalid spec set is a caller bug.
    pub fn build(self) -> DagGraph {
        let mut downstream: HashMap<String, Vec<TaskId>> = HashMap::new();
        for spec in &self.specs {
            for dep in &spec.deps {
                downstream.entry(dep.value.clone()).or_default().push(spec.id.clone());
            }
        }

        let mut graph = DagGraph::default();
        for spec in self.specs {
            let down = downstream.remove(&spec.id.value).unwrap_or_default();
            graph.insert(DagNode::new(spec.id.clone(), spec.deps, down, spec.runner_cfg));
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskConfig;

    fn spec(id: &str, deps: &[&str]) -> DagTaskSpec {
        DagTaskSpec {
            id: TaskId::new(id),
            deps: deps.iter().map(|d| TaskId::new(*d)).collect(),
            runner_cfg: TaskConfig::new(id),
        }
    }

    #[test]
    fn valid_chain_builds_with_correct_topology() {
        let mut b = DagBuilder::new();
        b.add_task(spec("a", &[]));
        b.add_task(spec("b", &["a"]));
        b.add_task(spec("c", &["a", "b"]));
        b.validate().unwrap();

        let graph = b.build();
        assert_eq!(graph.len(), 3);
        let a = graph.get(&TaskId::new("a")).unwrap();
        assert_eq!(a.indegree(), 0);
        assert_eq!(a.downstream().len(), 2);
        let c = graph.get(&TaskId::new("c")).unwrap();
        assert_eq!(c.indegree(), 2);
    }

    #[test]
    fn missing_dep_rejected() {
        let mut b = DagBuilder::new();
        b.add_task(spec("a", &["ghost"]));
        let err = b.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingDep);
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn cycle_rejected() {
        let mut b = DagBuilder::new();
        b.add_task(spec("a", &["c"]));
        b.add_task(spec("b", &["a"]));
        b.add_task(spec("c", &["b"]));
        let err = b.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CycleDetected);
    }

    #[test]
    fn self_cycle_rejected() {
        let mut b = DagBuilder::new();
        b.add_task(spec("a", &["a"]));
        assert_eq!(b.validate().unwrap_err().code(), ErrorCode::CycleDetected);
    }
}
