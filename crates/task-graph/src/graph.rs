//! Task graph builder using petgraph.
//!
//! This module builds directed acyclic graphs (DAGs) from named nodes and
//! their declared prerequisites, and answers the ordering questions the
//! executor and the stack ask of it.
//!
//! Edges always point from a prerequisite to the node that depends on it.

use crate::{Error, Prerequisites, Result, TaskNodeData};
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::IntoNodeReferences;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A node in the task graph.
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    /// Name of the task.
    pub name: String,
    /// The task data.
    pub task: T,
}

/// Task graph for dependency resolution and execution ordering.
///
/// This is a generic graph that can hold any node type implementing
/// [`TaskNodeData`]. Nodes are added first, then
/// [`add_dependency_edges`](Self::add_dependency_edges) wires them together.
pub struct TaskGraph<T: TaskNodeData> {
    /// The directed graph of tasks.
    graph: DiGraph<GraphNode<T>, ()>,
    /// Map from task names to node indices.
    name_to_node: HashMap<String, NodeIndex>,
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Create a new empty task graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            name_to_node: HashMap::new(),
        }
    }

    /// Add a single task to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateTask`] if a task with the same name exists.
    pub fn add_task(&mut self, name: &str, task: T) -> Result<NodeIndex> {
        if self.name_to_node.contains_key(name) {
            return Err(Error::DuplicateTask {
                name: name.to_string(),
            });
        }

        let node = GraphNode {
            name: name.to_string(),
            task,
        };

        let node_index = self.graph.add_node(node);
        self.name_to_node.insert(name.to_string(), node_index);
        debug!(task = name, "Added task node");

        Ok(node_index)
    }

    /// Get a reference to a task node by name.
    #[must_use]
    pub fn get_node_by_name(&self, name: &str) -> Option<&GraphNode<T>> {
        self.name_to_node
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Add dependency edges after all tasks have been added.
    ///
    /// Edges for every resolvable prerequisite are added even when some
    /// prerequisites are missing, so the graph stays usable for ordering
    /// queries after the error is reported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDependencies`] listing every prerequisite
    /// that names a task not in the graph.
    pub fn add_dependency_edges(&mut self) -> Result<()> {
        let mut missing_deps = Vec::new();
        let mut edges_to_add = Vec::new();

        for (node_index, node) in self.graph.node_references() {
            for dep_name in node.task.dependency_names() {
                if let Some(&dep_node_index) = self.name_to_node.get(dep_name) {
                    edges_to_add.push((dep_node_index, node_index));
                } else {
                    missing_deps.push((node.name.clone(), dep_name.to_string()));
                }
            }
        }

        for (from, to) in edges_to_add {
            self.graph.update_edge(from, to, ());
        }

        if missing_deps.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingDependencies {
                missing: missing_deps,
            })
        }
    }

    /// Add a direct edge between two tasks.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.update_edge(from, to, ());
    }

    /// Check if the graph has cycles.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        !self.cycle_members().is_empty()
    }

    /// Names of every task that sits on a dependency cycle.
    ///
    /// Self-dependencies count as cycles of length one.
    #[must_use]
    pub fn cycle_members(&self) -> Vec<String> {
        let mut members: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .flatten()
            .map(|idx| self.graph[idx].name.clone())
            .collect();
        members.sort();
        members
    }

    /// Get topologically sorted list of tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains cycles.
    pub fn topological_sort(&self) -> Result<Vec<GraphNode<T>>> {
        let cycle = self.cycle_members();
        if !cycle.is_empty() {
            return Err(Error::CycleDetected { tasks: cycle });
        }

        match toposort(&self.graph, None) {
            Ok(sorted_indices) => Ok(sorted_indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(_) => Err(Error::TopologicalSortFailed {
                reason: "petgraph toposort failed".to_string(),
            }),
        }
    }

    /// Names of the tasks `name` directly depends on.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Names of the tasks that directly depend on `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.name_to_node.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Every task that directly or transitively depends on `name`.
    ///
    /// The task itself is not included unless it sits on a cycle.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut frontier: Vec<&str> = self.dependents(name);

        while let Some(current) = frontier.pop() {
            if seen.insert(current.to_string()) {
                frontier.extend(self.dependents(current));
            }
        }

        seen
    }

    /// Build the inverse graph: every edge reversed.
    ///
    /// If `a` depends on `b` here, `b` depends on `a` in the result. The
    /// inverse of a creation graph is the matching teardown graph.
    #[must_use]
    pub fn inverted(&self) -> TaskGraph<Prerequisites> {
        let mut inverse = TaskGraph::new();
        for (_, node) in self.graph.node_references() {
            let dependents = Prerequisites::new(self.dependents(&node.name));
            // Names are unique in `self`, so this cannot collide.
            let _ = inverse.add_task(&node.name, dependents);
        }
        // Every prerequisite is a node of `self`, so nothing can be missing.
        let _ = inverse.add_dependency_edges();
        inverse
    }

    /// Get the number of tasks in the graph.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a task exists in the graph.
    #[must_use]
    pub fn contains_task(&self, name: &str) -> bool {
        self.name_to_node.contains_key(name)
    }

    /// Get the node index for a task by name.
    #[must_use]
    pub fn get_node_index(&self, name: &str) -> Option<NodeIndex> {
        self.name_to_node.get(name).copied()
    }

    /// Iterate over all nodes in insertion order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = (NodeIndex, &GraphNode<T>)> {
        self.graph.node_references()
    }
}

impl<T: TaskNodeData> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
