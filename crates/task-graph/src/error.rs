//! Error types for task graph operations.

use std::fmt;

/// Result type for task graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or querying a task graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A dependency cycle was detected in the graph.
    CycleDetected {
        /// Names of the tasks that sit on a cycle.
        tasks: Vec<String>,
    },

    /// Two tasks were registered under the same name.
    DuplicateTask {
        /// The name that was registered twice.
        name: String,
    },

    /// One or more tasks depend on tasks that do not exist.
    MissingDependencies {
        /// List of (task, missing_dependency) pairs.
        missing: Vec<(String, String)>,
    },

    /// Failed to perform topological sort.
    TopologicalSortFailed {
        /// Reason for the failure.
        reason: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CycleDetected { tasks } => {
                write!(f, "Cycle detected in task graph between: {}", tasks.join(", "))
            }
            Self::DuplicateTask { name } => {
                write!(f, "Task '{name}' was registered more than once")
            }
            Self::MissingDependencies { missing } => {
                let list = missing
                    .iter()
                    .map(|(task, dep)| format!("Task '{task}' depends on missing task '{dep}'"))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Missing dependencies: {list}")
            }
            Self::TopologicalSortFailed { reason } => {
                write!(f, "Failed to sort tasks topologically: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
