use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use regolith::{CompiledSet, Value, query, query_rule};
use serde_json::json;

/// A policy with `n` leaf rules (each checking a unique input field) and one
/// rule that requires all of them.
fn policy(n: usize) -> String {
    let mut source = String::from("package bench\n");
    for i in 0..n {
        source.push_str(&format!("r{i} {{ input.f{i} >= 1 }}\n"));
    }
    let all: Vec<String> = (0..n).map(|i| format!("r{i}")).collect();
    source.push_str(&format!("final {{\n    {}\n}}\n", all.join("\n    ")));
    source
}

fn input(n: usize) -> Value {
    let fields: serde_json::Map<String, serde_json::Value> = (0..n).map(|i| (format!("f{i}"), json!(10))).collect();
    Value::from(serde_json::Value::Object(fields))
}

fn bench_query_rule(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_rule");

    for &n in &[5, 20, 50] {
        let compiled = CompiledSet::from_source("bench.rego", &policy(n)).unwrap();
        let input = input(n);
        group.bench_function(format!("{n}_rules"), |b| {
            b.iter(|| query_rule(&compiled, "bench", "final", Some(black_box(&input)), None));
        });
    }

    group.finish();
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("iteration");
    let compiled = CompiledSet::from_source(
        "bench.rego",
        "package bench\nbig[x] { x := input.items[_]; x % 2 == 0 }\ntotal = sum([x | x := input.items[_]])\n",
    )
    .unwrap();

    for &n in &[100_i64, 1_000] {
        let input = Value::from(json!({ "items": (0..n).collect::<Vec<i64>>() }));
        group.bench_function(format!("partial_set_{n}"), |b| {
            b.iter(|| query_rule(&compiled, "bench", "big", Some(black_box(&input)), None));
        });
        group.bench_function(format!("comprehension_{n}"), |b| {
            b.iter(|| query(&compiled, "data.bench.total", Some(black_box(&input)), None));
        });
    }

    group.finish();
}

fn bench_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compilation");

    for &n in &[5, 20, 50] {
        let source = policy(n);
        group.bench_function(format!("{n}_rules"), |b| {
            b.iter(|| black_box(CompiledSet::from_source("bench.rego", black_box(&source)).unwrap()));
        });
    }

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let thread_counts = [1, 2, 4, 8];
    let n = 20;

    let mut group = c.benchmark_group("throughput");
    group.measurement_time(Duration::from_secs(5));

    for &threads in &thread_counts {
        let compiled = Arc::new(CompiledSet::from_source("bench.rego", &policy(n)).unwrap());
        let input = Arc::new(input(n));

        group.bench_function(format!("{threads}_threads"), |b| {
            b.iter_custom(|iters| {
                let per_thread = iters / threads as u64;
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let compiled = Arc::clone(&compiled);
                        let input = Arc::clone(&input);
                        thread::spawn(move || {
                            let start = Instant::now();
                            for _ in 0..per_thread {
                                let _ = query_rule(&compiled, "bench", "final", Some(&input), None);
                            }
                            start.elapsed()
                        })
                    })
                    .collect();

                let mut max_elapsed = Duration::ZERO;
                for h in handles {
                    let elapsed = h.join().unwrap();
                    if elapsed > max_elapsed {
                        max_elapsed = elapsed;
                    }
                }
                max_elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_query_rule,
    bench_iteration,
    bench_compilation,
    bench_throughput
);
criterion_main!(benches);
