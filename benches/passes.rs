//! Benchmarks for the method-local optimization passes.
//!
//! Synthetic methods scale with a size parameter so the cost of the frame
//! analyses and of the pass fixpoints can be observed separately.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use localopt::callgraph::{CallGraph, NoopHost};
use localopt::config::OptConfig;
use localopt::method::{Method, MethodBuilder};
use localopt::opcodes::Opcode;
use localopt::optimizer::LocalOptimizer;

/// `n` chained store/load pairs of otherwise dead slots.
fn store_load_chain(n: u16) -> Method {
    let mut b = MethodBuilder::new("bench", "()V")
        .is_static(true)
        .max_locals(n + 1)
        .max_stack(4);
    for slot in 1..=n {
        b = b
            .op(Opcode::Iconst0)
            .var(Opcode::Istore, slot)
            .var(Opcode::Iload, slot)
            .op(Opcode::Pop);
    }
    b.op(Opcode::Return).build()
}

/// `n` popped pure arithmetic expressions.
fn popped_arithmetic(n: u16) -> Method {
    let mut b = MethodBuilder::new("bench", "()V").is_static(true).max_stack(4);
    for _ in 0..n {
        b = b
            .op(Opcode::Iconst1)
            .op(Opcode::Iconst2)
            .op(Opcode::Iadd)
            .op(Opcode::Pop);
    }
    b.op(Opcode::Return).build()
}

fn bench_store_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_load_elimination");
    for size in [16u16, 64, 256] {
        let method = store_load_chain(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &method, |b, m| {
            let config = OptConfig::default();
            let cg = CallGraph::new();
            let host = NoopHost;
            let opt = LocalOptimizer::new(&config, &cg, &host);
            b.iter_batched(
                || m.clone(),
                |mut m| opt.eliminate_store_load(&mut m),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("push_pop_elimination");
    for size in [16u16, 64, 256] {
        let method = popped_arithmetic(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &method, |b, m| {
            let config = OptConfig::default();
            let cg = CallGraph::new();
            let host = NoopHost;
            let opt = LocalOptimizer::new(&config, &cg, &host);
            b.iter_batched(
                || m.clone(),
                |mut m| opt.eliminate_push_pop(&mut m, "p/Bench"),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_copy_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("copy_propagation");
    for size in [16u16, 64] {
        let method = store_load_chain(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &method, |b, m| {
            let config = OptConfig::default();
            let cg = CallGraph::new();
            let host = NoopHost;
            let opt = LocalOptimizer::new(&config, &cg, &host);
            b.iter_batched(
                || m.clone(),
                |mut m| opt.copy_propagation(&mut m, "p/Bench"),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_store_load, bench_push_pop, bench_copy_propagation);
criterion_main!(benches);
