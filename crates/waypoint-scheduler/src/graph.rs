use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef as _;
use petgraph::{algo, Direction};
use tracing::warn;

use waypoint_core::AgentTask;

/// Immutable task dependency graph.
///
/// Nodes are the batch's tasks; an edge `a → b` means `b` declared a
/// dependency on `a`. Dependency ids that name no task in the batch are
/// ignored so a dangling reference cannot wedge execution.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    graph: DiGraph<AgentTask, ()>,
}

impl TaskGraph {
    /// Builds the graph from a batch of tasks.
    pub fn from_tasks(tasks: &[AgentTask]) -> Self {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::new();

        for task in tasks {
            let node = graph.add_node(task.clone());
            node_map.insert(task.id.clone(), node);
        }

        for task in tasks {
            let task_node = node_map[&task.id];
            for dep_id in &task.dependencies {
                if let Some(&dep_node) = node_map.get(dep_id) {
                    graph.add_edge(dep_node, task_node, ());
                }
            }
        }

        Self { graph }
    }

    /// Tasks whose dependencies have all reached a terminal state and
    /// which are not themselves terminal yet.
    pub fn ready_tasks(&self, terminal: &HashSet<String>) -> Vec<AgentTask> {
        self.graph
            .node_indices()
            .filter_map(|node| {
                let task = &self.graph[node];

                if terminal.contains(&task.id) {
                    return None;
                }

                let deps_satisfied = self
                    .graph
                    .edges_directed(node, Direction::Incoming)
                    .all(|edge| terminal.contains(&self.graph[edge.source()].id));

                deps_satisfied.then(|| task.clone())
            })
            .collect()
    }

    /// Dependency ids of `task_id` that are in the given set.
    pub fn dependencies_in(&self, task_id: &str, set: &HashSet<String>) -> Vec<String> {
        self.graph
            .node_indices()
            .find(|node| self.graph[*node].id == task_id)
            .map(|node| {
                self.graph
                    .edges_directed(node, Direction::Incoming)
                    .map(|edge| self.graph[edge.source()].id.clone())
                    .filter(|dep_id| set.contains(dep_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Detects cycles (unsatisfiable graph).
    pub fn has_cycles(&self) -> bool {
        algo::is_cyclic_directed(&self.graph)
    }

    /// Topological execution order. On a cycle the order falls back to the
    /// original submission order with a logged warning; callers that want
    /// to fail hard should check [`has_cycles`](Self::has_cycles) first.
    pub fn execution_order(&self) -> Vec<AgentTask> {
        match algo::toposort(&self.graph, None) {
            Ok(order) => order.into_iter().map(|node| self.graph[node].clone()).collect(),
            Err(_) => {
                warn!("dependency cycle detected; falling back to submission order");
                self.tasks()
            }
        }
    }

    /// All tasks in submission order.
    pub fn tasks(&self) -> Vec<AgentTask> {
        self.graph.node_weights().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> AgentTask {
        AgentTask::new(id, "test").with_dependencies(
            deps.iter().map(|dep| (*dep).to_owned()).collect(),
        )
    }

    #[test]
    fn test_ready_tasks_respect_dependencies() {
        let task_a = task("a", &[]);
        let task_b = task("b", &["a"]);
        let graph = TaskGraph::from_tasks(&[task_a, task_b]);

        let mut terminal = HashSet::new();
        let ready = graph.ready_tasks(&terminal);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "a");

        terminal.insert("a".to_owned());
        let ready_after = graph.ready_tasks(&terminal);
        assert_eq!(ready_after.len(), 1);
        assert_eq!(ready_after[0].id, "b");
    }

    #[test]
    fn test_dangling_dependency_is_ignored() {
        let orphan = task("a", &["missing"]);
        let graph = TaskGraph::from_tasks(&[orphan]);

        let ready = graph.ready_tasks(&HashSet::new());
        assert_eq!(ready.len(), 1, "dangling dependency must not block");
    }

    #[test]
    fn test_cycle_detection() {
        let task_a = task("a", &["b"]);
        let task_b = task("b", &["a"]);
        let graph = TaskGraph::from_tasks(&[task_a, task_b]);
        assert!(graph.has_cycles());

        let acyclic = TaskGraph::from_tasks(&[task("a", &[]), task("b", &["a"])]);
        assert!(!acyclic.has_cycles());
    }

    #[test]
    fn test_execution_order_places_dependencies_first() {
        let tasks = vec![task("c", &["b"]), task("b", &["a"]), task("a", &[])];
        let graph = TaskGraph::from_tasks(&tasks);

        let order = graph.execution_order();
        let position = |id: &str| {
            order
                .iter()
                .position(|entry| entry.id == id)
                .unwrap_or_else(|| panic!("{id} missing from order"))
        };
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
    }

    #[test]
    fn test_cycle_falls_back_to_submission_order_deterministically() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"]), task("c", &[])];
        let graph = TaskGraph::from_tasks(&tasks);

        let first = graph.execution_order();
        let second = graph.execution_order();
        let ids: Vec<&str> = first.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"], "submission order preserved");
        assert_eq!(
            ids,
            second.iter().map(|entry| entry.id.as_str()).collect::<Vec<_>>(),
            "fallback is deterministic"
        );
    }
}
