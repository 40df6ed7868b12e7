//! Dependency-ordered task execution for shepherd.
//!
//! This crate provides a directed acyclic graph (DAG) of named tasks built on
//! petgraph, and an executor that runs operations in dependency order with
//! per-task retries.
//!
//! # Key Types
//!
//! - [`TaskGraph`]: The graph structure for building and querying task dependencies
//! - [`TaskNodeData`]: Trait that node payloads implement to declare prerequisites
//! - [`Task`]: A named operation with prerequisites and a retry policy
//! - [`Executor`]: Runs a set of [`Task`]s and reports a [`RunReport`]
//!
//! # Example
//!
//! ```ignore
//! use shepherd_task_graph::{run_tasks, Task};
//!
//! let report = run_tasks(vec![
//!     Task::new("network", || Ok(true)),
//!     Task::new("server", || Ok(true)).depends_on(["network"]).retries(3),
//! ]);
//!
//! assert!(report.passed());
//! ```
//!
//! The executor knows nothing about what a task does. Callers decide what
//! "success" means by returning `Ok(true)`, and whether a failure is worth
//! retrying by returning a retryable or fatal [`TaskError`].

mod error;
mod executor;
mod graph;
mod validation;

pub use error::{Error, Result};
pub use executor::{
    Executor, ExecutorConfig, RunReport, Task, TaskError, TaskOutcome, TaskResult, run_tasks,
};
pub use graph::{GraphNode, TaskGraph};
pub use validation::ValidationResult;

/// Trait for data that can be stored in the task graph.
///
/// Implement this trait for your node type to let it participate in
/// dependency resolution inside a [`TaskGraph`].
pub trait TaskNodeData: Clone {
    /// Returns the names of the nodes this node depends on.
    fn dependency_names(&self) -> impl Iterator<Item = &str>;
}

/// Minimal node payload: just the prerequisite names.
///
/// Used by the executor, and by callers that only need ordering queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prerequisites(pub Vec<String>);

impl Prerequisites {
    /// Build a prerequisite list from anything yielding names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl TaskNodeData for Prerequisites {
    fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
