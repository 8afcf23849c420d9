//! Benchmarks for pipeline execution.

use agentflow::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn counting_pipeline(stages: usize) -> Pipeline {
    (0..stages).fold(Pipeline::new(Arc::new(Mediator::new())), |pipeline, i| {
        pipeline.step(format!("inc-{i}"), |p| Payload::from(p.as_i64().unwrap_or(0) + 1))
    })
}

fn pipeline_benchmark(c: &mut Criterion) {
    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };

    let short = counting_pipeline(4);
    c.bench_function("sequential_4_callables", |b| {
        b.iter(|| runtime.block_on(short.through(black_box(0))))
    });

    let long = counting_pipeline(32);
    c.bench_function("sequential_32_callables", |b| {
        b.iter(|| runtime.block_on(long.through(black_box(0))))
    });

    let agents = Pipeline::new(Arc::new(Mediator::new()))
        .agent(FnAgent::transform("upper", |p| {
            Payload::from(p.as_str().unwrap_or_default().to_uppercase())
        }))
        .agent(NoOpAgent::new("idle"));
    c.bench_function("sequential_2_agents", |b| {
        b.iter(|| runtime.block_on(agents.through(black_box("bench"))))
    });
}

criterion_group!(benches, pipeline_benchmark);
criterion_main!(benches);
