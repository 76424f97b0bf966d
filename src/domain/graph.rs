//! Execution graph: a validated DAG of [`ExecutionStep`]s.
//!
//! Grounded on the Python `execution_graph.py` original: Kahn's algorithm
//! over in-degrees for both cycle detection and tie-broken topological order.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::{now_iso, ExecutionStep};
use crate::error::OrchestratorError;

const SCHEMA_VERSION: u32 = 1;

/// A validated directed acyclic graph of execution steps for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub task_id: String,
    pub steps: Vec<ExecutionStep>,
    /// Adjacency: step_id -> set of step_ids that depend on it (must run after).
    pub edges: HashMap<String, Vec<String>>,
    pub parallelizable_groups: Vec<Vec<String>>,
    pub created_at: String,
    pub version: u32,
}

impl ExecutionGraph {
    pub fn new(
        task_id: impl Into<String>,
        steps: Vec<ExecutionStep>,
        edges: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            steps,
            edges,
            parallelizable_groups: Vec::new(),
            created_at: now_iso(),
            version: SCHEMA_VERSION,
        }
    }

    /// Validate: at least one step, every edge endpoint is a known step,
    /// priorities unique, no cycle.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.steps.is_empty() {
            return Err(OrchestratorError::EmptyGraph);
        }

        let known: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();

        let mut seen_priorities: HashSet<u32> = HashSet::new();
        for step in &self.steps {
            if !seen_priorities.insert(step.priority) {
                return Err(OrchestratorError::DuplicateStepPriority {
                    priority: step.priority,
                });
            }
        }

        for (from, tos) in &self.edges {
            if !known.contains(from.as_str()) {
                return Err(OrchestratorError::UnknownStepReference {
                    step_id: from.clone(),
                });
            }
            for to in tos {
                if !known.contains(to.as_str()) {
                    return Err(OrchestratorError::UnknownStepReference { step_id: to.clone() });
                }
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Kahn's algorithm: among zero-indegree nodes, always pick the smallest
    /// `priority` next. Returns `CyclicGraph` if not all steps are visited.
    fn topological_order(&self) -> Result<Vec<&ExecutionStep>, OrchestratorError> {
        let mut in_degree: HashMap<&str, u32> =
            self.steps.iter().map(|s| (s.step_id.as_str(), 0)).collect();

        for tos in self.edges.values() {
            for to in tos {
                if let Some(deg) = in_degree.get_mut(to.as_str()) {
                    *deg += 1;
                }
            }
        }

        let by_id: HashMap<&str, &ExecutionStep> =
            self.steps.iter().map(|s| (s.step_id.as_str(), s)).collect();

        let mut frontier: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut ordered: Vec<&ExecutionStep> = Vec::with_capacity(self.steps.len());

        while !frontier.is_empty() {
            let mut candidates: Vec<&str> = frontier.drain(..).collect();
            candidates.sort_by_key(|id| by_id[id].priority);

            let chosen = candidates.remove(0);
            frontier.extend(candidates);

            ordered.push(by_id[chosen]);

            if let Some(dependents) = self.edges.get(chosen) {
                for dep in dependents {
                    if let Some(deg) = in_degree.get_mut(dep.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            frontier.push_back(dep.as_str());
                        }
                    }
                }
            }
        }

        if ordered.len() != self.steps.len() {
            return Err(OrchestratorError::CyclicGraph);
        }

        Ok(ordered)
    }

    /// Topological order of steps, ties broken by ascending priority.
    pub fn execution_order(&self) -> Result<Vec<ExecutionStep>, OrchestratorError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: usize) -> ExecutionGraph {
        let steps: Vec<ExecutionStep> = (0..n)
            .map(|i| ExecutionStep::new(format!("s{i}"), format!("step {i}"), (i + 1) as u32))
            .collect();
        let mut edges = HashMap::new();
        for i in 0..n.saturating_sub(1) {
            edges.insert(format!("s{i}"), vec![format!("s{}", i + 1)]);
        }
        ExecutionGraph::new("task-1", steps, edges)
    }

    #[test]
    fn validates_simple_chain() {
        let g = chain(4);
        assert!(g.validate().is_ok());
        let order = g.execution_order().unwrap();
        assert_eq!(
            order.iter().map(|s| s.step_id.clone()).collect::<Vec<_>>(),
            vec!["s0", "s1", "s2", "s3"]
        );
    }

    #[test]
    fn rejects_empty_graph() {
        let g = ExecutionGraph::new("task-1", vec![], HashMap::new());
        assert_eq!(g.validate(), Err(OrchestratorError::EmptyGraph));
    }

    #[test]
    fn rejects_unknown_edge_endpoint() {
        let steps = vec![ExecutionStep::new("s0", "only", 1)];
        let mut edges = HashMap::new();
        edges.insert("s0".to_string(), vec!["ghost".to_string()]);
        let g = ExecutionGraph::new("task-1", steps, edges);
        assert!(matches!(
            g.validate(),
            Err(OrchestratorError::UnknownStepReference { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_priority() {
        let steps = vec![
            ExecutionStep::new("s0", "a", 1),
            ExecutionStep::new("s1", "b", 1),
        ];
        let g = ExecutionGraph::new("task-1", steps, HashMap::new());
        assert!(matches!(
            g.validate(),
            Err(OrchestratorError::DuplicateStepPriority { priority: 1 })
        ));
    }

    #[test]
    fn detects_cycle() {
        let steps = vec![
            ExecutionStep::new("s0", "a", 1),
            ExecutionStep::new("s1", "b", 2),
        ];
        let mut edges = HashMap::new();
        edges.insert("s0".to_string(), vec!["s1".to_string()]);
        edges.insert("s1".to_string(), vec!["s0".to_string()]);
        let g = ExecutionGraph::new("task-1", steps, edges);
        assert_eq!(g.validate(), Err(OrchestratorError::CyclicGraph));
    }

    #[test]
    fn ties_broken_by_ascending_priority() {
        // Two independent roots, no edges between them.
        let steps = vec![
            ExecutionStep::new("hi_prio_first", "b", 1),
            ExecutionStep::new("lo_prio_second", "a", 2),
        ];
        let g = ExecutionGraph::new("task-1", steps, HashMap::new());
        let order = g.execution_order().unwrap();
        assert_eq!(order[0].step_id, "hi_prio_first");
    }

    #[test]
    fn json_round_trip_preserves_equality() {
        let g = chain(3);
        let json = g.to_json().unwrap();
        let back = ExecutionGraph::from_json(&json).unwrap();
        assert_eq!(g.task_id, back.task_id);
        assert_eq!(g.steps, back.steps);
        assert_eq!(g.edges, back.edges);
    }
}
