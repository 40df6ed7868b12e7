//! Validation utilities for task graphs.
//!
//! This module provides types and functions for validating task graph structure.

use crate::{Error, TaskGraph, TaskNodeData};

/// Result of graph validation.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the graph is valid (no cycles, no missing dependencies).
    pub is_valid: bool,
    /// List of validation errors, if any.
    pub errors: Vec<Error>,
}

impl ValidationResult {
    /// Create a valid result.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    /// Create an invalid result with errors.
    #[must_use]
    pub fn invalid(errors: Vec<Error>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

impl<T: TaskNodeData> TaskGraph<T> {
    /// Validate the graph structure.
    ///
    /// Checks for:
    /// - Prerequisites naming tasks that are not in the graph
    /// - Cycles in the dependency graph
    ///
    /// Both checks run from the node payloads and the current edges, so this
    /// works whether or not `add_dependency_edges()` has been called yet.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors = Vec::new();

        let missing: Vec<(String, String)> = self
            .iter_nodes()
            .flat_map(|(_, node)| {
                node.task
                    .dependency_names()
                    .filter(|dep| !self.contains_task(dep))
                    .map(|dep| (node.name.clone(), dep.to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        if !missing.is_empty() {
            errors.push(Error::MissingDependencies { missing });
        }

        let cycle = self.cycle_members();
        if !cycle.is_empty() {
            errors.push(Error::CycleDetected { tasks: cycle });
        }

        if errors.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Prerequisites;

    #[test]
    fn test_validate_empty_graph() {
        let graph: TaskGraph<Prerequisites> = TaskGraph::new();
        let result = graph.validate();
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_validate_valid_graph() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", Prerequisites::default()).unwrap();
        graph.add_task("b", Prerequisites::new(["a"])).unwrap();
        graph.add_dependency_edges().unwrap();

        let result = graph.validate();
        assert!(result.is_valid);
    }

    #[test]
    fn test_validate_cyclic_graph() {
        let mut graph = TaskGraph::new();
        graph.add_task("a", Prerequisites::new(["b"])).unwrap();
        graph.add_task("b", Prerequisites::new(["a"])).unwrap();
        graph.add_dependency_edges().unwrap();

        let result = graph.validate();
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![Error::CycleDetected {
                tasks: vec!["a".to_string(), "b".to_string()]
            }]
        );
    }

    #[test]
    fn test_validate_reports_missing_before_edges() {
        let mut graph = TaskGraph::new();
        graph.add_task("ingress", Prerequisites::new(["group"])).unwrap();

        let result = graph.validate();
        assert!(!result.is_valid);
        assert!(matches!(
            result.errors.as_slice(),
            [Error::MissingDependencies { missing }] if missing[0].1 == "group"
        ));
    }
}
