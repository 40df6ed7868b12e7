//! Dependency-ordered task execution with per-task retries.
//!
//! The executor takes a flat list of [`Task`]s, resolves their prerequisites
//! through a [`TaskGraph`], and runs every task whose prerequisites have all
//! completed. A task that keeps failing after its retries are spent fails,
//! and everything downstream of it fails without being invoked.

use crate::{Prerequisites, TaskGraph};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Result of a single task attempt: `Ok(true)` means success.
pub type TaskResult = std::result::Result<bool, TaskError>;

type Operation<'a> = Box<dyn FnMut() -> TaskResult + Send + 'a>;

/// Error returned by a task operation.
///
/// Retryable errors are attempted again until the task's retry budget runs
/// out. Fatal errors fail the task on the spot.
#[derive(Debug)]
pub struct TaskError {
    source: Box<dyn std::error::Error + Send + Sync>,
    fatal: bool,
}

impl TaskError {
    /// Wrap an error, choosing whether it may be retried.
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>, fatal: bool) -> Self {
        Self {
            source: source.into(),
            fatal,
        }
    }

    /// A failure worth retrying.
    pub fn retryable(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::new(source, false)
    }

    /// A failure that no amount of retrying will fix.
    pub fn fatal(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::new(source, true)
    }

    /// Whether retries are skipped for this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// The wrapped error.
    #[must_use]
    pub fn source(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl<E> From<E> for TaskError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::retryable(err)
    }
}

/// A named operation with prerequisites and a retry policy.
pub struct Task<'a> {
    name: String,
    prerequisites: Vec<String>,
    retries: u32,
    delay: Duration,
    operation: Operation<'a>,
}

impl<'a> Task<'a> {
    /// Create a task with no prerequisites, no retries and no delay.
    pub fn new<F>(name: impl Into<String>, operation: F) -> Self
    where
        F: FnMut() -> TaskResult + Send + 'a,
    {
        Self {
            name: name.into(),
            prerequisites: Vec::new(),
            retries: 0,
            delay: Duration::ZERO,
            operation: Box::new(operation),
        }
    }

    /// Add prerequisites: tasks that must complete before this one runs.
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites.extend(names.into_iter().map(Into::into));
        self
    }

    /// Number of extra attempts after the first failure.
    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Pause between attempts.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prerequisite names.
    #[must_use]
    pub fn prerequisites(&self) -> &[String] {
        &self.prerequisites
    }

    #[instrument(name = "task", skip(self), fields(task = %self.name))]
    fn execute(&mut self) -> TaskOutcome {
        let max_attempts = self.retries.saturating_add(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, max_attempts, "Running task");

            let last_error = match (self.operation)() {
                Ok(true) => {
                    if attempts > 1 {
                        info!(attempts, "Task succeeded after retry");
                    }
                    return TaskOutcome::Completed { attempts };
                }
                Ok(false) => None,
                Err(err) if err.is_fatal() => {
                    error!(attempts, error = %err, "Task failed with a fatal error");
                    return TaskOutcome::Failed {
                        attempts,
                        error: Some(err.to_string()),
                    };
                }
                Err(err) => Some(err.to_string()),
            };

            if attempts >= max_attempts {
                error!(
                    attempts,
                    error = last_error.as_deref().unwrap_or("operation reported failure"),
                    "Task failed after exhausting retries"
                );
                return TaskOutcome::Failed {
                    attempts,
                    error: last_error,
                };
            }

            warn!(
                attempt = attempts,
                max_attempts,
                error = last_error.as_deref().unwrap_or("operation reported failure"),
                retry_in_ms = self.delay.as_millis(),
                "Task failed, retrying"
            );
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }
    }
}

impl fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("retries", &self.retries)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The operation reported success.
    Completed {
        /// Number of invocations, including the successful one.
        attempts: u32,
    },
    /// The operation was invoked and never succeeded.
    Failed {
        /// Number of invocations.
        attempts: u32,
        /// Last error message, if the final attempt returned an error.
        error: Option<String>,
    },
    /// The operation was never invoked.
    NotRun {
        /// Why the task could not run.
        reason: String,
    },
}

impl TaskOutcome {
    /// Number of times the operation was invoked.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts } | Self::Failed { attempts, .. } => *attempts,
            Self::NotRun { .. } => 0,
        }
    }

    /// Whether the task completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Aggregate result of one executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    outcomes: BTreeMap<String, TaskOutcome>,
}

impl RunReport {
    /// True when no task failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_completed)
    }

    /// Names of completed tasks.
    #[must_use]
    pub fn completed(&self) -> BTreeSet<String> {
        self.names_where(TaskOutcome::is_completed)
    }

    /// Names of failed tasks, including those that never ran.
    #[must_use]
    pub fn failed(&self) -> BTreeSet<String> {
        self.names_where(|outcome| !outcome.is_completed())
    }

    /// Invocation count for a task; zero for unknown or never-run tasks.
    #[must_use]
    pub fn attempts(&self, name: &str) -> u32 {
        self.outcomes.get(name).map_or(0, TaskOutcome::attempts)
    }

    /// Outcome of a task, if the task was part of the run.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(name)
    }

    /// Every outcome, ordered by task name.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.outcomes.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    fn names_where(&self, pred: impl Fn(&TaskOutcome) -> bool) -> BTreeSet<String> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| pred(outcome))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Executor tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on tasks running at once. `1` runs tasks one at a time.
    pub max_parallel: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_parallel: 1 }
    }
}

/// Runs tasks in dependency order.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    /// Create an executor with the given configuration.
    #[must_use]
    pub const fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run every task and report which completed and which failed.
    ///
    /// Tasks are failed without invocation when they are registered twice,
    /// name an unknown prerequisite, sit on or behind a cycle, or depend on
    /// a task that failed.
    #[instrument(name = "executor_run", skip_all, fields(tasks = tasks.len(), max_parallel = self.config.max_parallel))]
    pub fn run<'a>(&self, tasks: Vec<Task<'a>>) -> RunReport {
        let mut state = RunState::default();
        let mut graph: TaskGraph<Prerequisites> = TaskGraph::new();
        let mut pending: HashMap<String, Task<'a>> = HashMap::new();
        let mut duplicates = Vec::new();

        for task in tasks {
            if graph
                .add_task(&task.name, Prerequisites(task.prerequisites.clone()))
                .is_err()
            {
                duplicates.push(task.name.clone());
                continue;
            }
            pending.insert(task.name.clone(), task);
        }

        let mut blocked: Vec<(String, String)> = duplicates
            .into_iter()
            .map(|name| (name, "task name registered more than once".to_string()))
            .collect();

        // Missing prerequisites are reported by validation below; the
        // resolvable edges are in place either way.
        let _ = graph.add_dependency_edges();
        for error in graph.validate().errors {
            match error {
                crate::Error::MissingDependencies { missing } => {
                    blocked.extend(missing.into_iter().map(|(task, dep)| {
                        (task, format!("unknown prerequisite '{dep}'"))
                    }));
                }
                crate::Error::CycleDetected { tasks } => {
                    blocked.extend(tasks.into_iter().map(|name| (name, "dependency cycle".to_string())));
                }
                other => warn!(error = %other, "Unexpected graph validation error"),
            }
        }

        for (name, reason) in blocked {
            warn!(task = %name, reason = %reason, "Task cannot run");
            state.fail_without_running(&graph, &mut pending, &name, reason);
        }

        while !pending.is_empty() {
            let mut ready: Vec<String> = pending
                .keys()
                .filter(|name| {
                    graph
                        .dependencies(name)
                        .iter()
                        .all(|dep| state.completed.contains(*dep))
                })
                .cloned()
                .collect();

            if ready.is_empty() {
                // Unreachable once cycles and failures have been propagated.
                let stuck: Vec<String> = pending.keys().cloned().collect();
                for name in stuck {
                    state.fail_without_running(&graph, &mut pending, &name, "prerequisites never completed".to_string());
                }
                break;
            }
            ready.sort();

            let wave: Vec<Task<'a>> = ready
                .iter()
                .filter_map(|name| pending.remove(name))
                .collect();
            debug!(wave = ?ready, "Starting wave");

            for (name, outcome) in self.run_wave(wave) {
                state.record(&graph, &mut pending, name, outcome);
            }
        }

        let report = RunReport {
            outcomes: state.outcomes,
        };
        info!(
            completed = report.completed().len(),
            failed = report.failed().len(),
            "Task run finished"
        );
        report
    }

    fn run_wave<'a>(&self, wave: Vec<Task<'a>>) -> Vec<(String, TaskOutcome)> {
        if self.config.max_parallel <= 1 || wave.len() == 1 {
            return wave
                .into_iter()
                .map(|mut task| {
                    let outcome = task.execute();
                    (task.name, outcome)
                })
                .collect();
        }

        let mut results = Vec::with_capacity(wave.len());
        let mut remaining = wave.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<Task<'a>> = remaining.by_ref().take(self.config.max_parallel).collect();
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .into_iter()
                    .map(|mut task| {
                        scope.spawn(move || {
                            let outcome = task.execute();
                            (task.name, outcome)
                        })
                    })
                    .collect();
                for handle in handles {
                    match handle.join() {
                        Ok(result) => results.push(result),
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                }
            });
        }
        results
    }
}

#[derive(Default)]
struct RunState {
    outcomes: BTreeMap<String, TaskOutcome>,
    completed: HashSet<String>,
}

impl RunState {
    fn record(
        &mut self,
        graph: &TaskGraph<Prerequisites>,
        pending: &mut HashMap<String, Task<'_>>,
        name: String,
        outcome: TaskOutcome,
    ) {
        if outcome.is_completed() {
            self.completed.insert(name.clone());
            self.outcomes.insert(name, outcome);
        } else {
            self.outcomes.insert(name.clone(), outcome);
            self.propagate_failure(graph, pending, &name);
        }
    }

    fn fail_without_running(
        &mut self,
        graph: &TaskGraph<Prerequisites>,
        pending: &mut HashMap<String, Task<'_>>,
        name: &str,
        reason: String,
    ) {
        pending.remove(name);
        self.outcomes
            .entry(name.to_string())
            .or_insert(TaskOutcome::NotRun { reason });
        self.propagate_failure(graph, pending, name);
    }

    fn propagate_failure(
        &mut self,
        graph: &TaskGraph<Prerequisites>,
        pending: &mut HashMap<String, Task<'_>>,
        failed: &str,
    ) {
        for dependent in graph.transitive_dependents(failed) {
            if pending.remove(&dependent).is_some() {
                debug!(task = %dependent, failed_prerequisite = failed, "Skipping task");
                self.outcomes.insert(
                    dependent,
                    TaskOutcome::NotRun {
                        reason: format!("prerequisite '{failed}' failed"),
                    },
                );
            }
        }
    }
}

/// Run tasks with the default sequential executor.
pub fn run_tasks(tasks: Vec<Task<'_>>) -> RunReport {
    Executor::default().run(tasks)
}
