//! Benchmarks for graph queries and task execution
//!
//! Run with: cargo bench -p shepherd-task-graph

#![allow(clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use shepherd_task_graph::{Executor, ExecutorConfig, Prerequisites, Task, TaskGraph};
use std::hint::black_box;

/// (name, prerequisites) pairs for a root with many direct dependents
fn wide_layout(task_count: usize) -> Vec<(String, Vec<String>)> {
    std::iter::once(("root".to_string(), vec![]))
        .chain((0..task_count).map(|i| (format!("task_{i}"), vec!["root".to_string()])))
        .collect()
}

/// (name, prerequisites) pairs for a linear chain
fn deep_layout(depth: usize) -> Vec<(String, Vec<String>)> {
    (0..depth)
        .map(|i| {
            let deps = if i == 0 {
                vec![]
            } else {
                vec![format!("task_{}", i - 1)]
            };
            (format!("task_{i}"), deps)
        })
        .collect()
}

fn build_graph(layout: &[(String, Vec<String>)]) -> TaskGraph<Prerequisites> {
    let mut graph = TaskGraph::new();
    for (name, deps) in layout {
        graph.add_task(name, Prerequisites(deps.clone())).unwrap();
    }
    graph.add_dependency_edges().unwrap();
    graph
}

fn noop_tasks(layout: &[(String, Vec<String>)]) -> Vec<Task<'static>> {
    layout
        .iter()
        .map(|(name, deps)| Task::new(name.clone(), || Ok(true)).depends_on(deps.iter().cloned()))
        .collect()
}

fn benchmark_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");

    for count in [50, 200, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let graph = build_graph(&wide_layout(count));
            b.iter(|| black_box(graph.validate()));
        });
    }

    group.finish();
}

fn benchmark_inversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("inverted");

    for depth in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let graph = build_graph(&deep_layout(depth));
            b.iter(|| black_box(graph.inverted()));
        });
    }

    group.finish();
}

fn benchmark_sequential_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_run");

    for depth in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let layout = deep_layout(depth);
            b.iter(|| black_box(Executor::default().run(noop_tasks(&layout))));
        });
    }

    group.finish();
}

fn benchmark_parallel_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_run");

    for count in [50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let layout = wide_layout(count);
            let executor = Executor::new(ExecutorConfig { max_parallel: 8 });
            b.iter(|| black_box(executor.run(noop_tasks(&layout))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_validation,
    benchmark_inversion,
    benchmark_sequential_run,
    benchmark_parallel_run,
);

criterion_main!(benches);
