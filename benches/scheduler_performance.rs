//! Scheduler routing and dispatch overhead, benchmarked in isolation from
//! any real inference engine (the stub session's synthetic latency is
//! fixed at zero so the numbers reflect scheduling overhead only).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kokoro_runtime::provider::session::{StubSession, SynthesizeRequest};
use kokoro_runtime::provider::ProviderId;
use kokoro_runtime::scheduler::{Role, Scheduler, SessionPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn build_scheduler() -> Scheduler {
    let mut pool = SessionPool::new();
    pool.set(Role::Fast, Arc::new(StubSession::new(ProviderId::cpu())));
    pool.set(Role::Balanced, Arc::new(StubSession::new(ProviderId::cpu())));
    pool.set(Role::Heavy, Arc::new(StubSession::new(ProviderId::accelerator())));
    let active = Arc::new(StubSession::new(ProviderId::cpu()));
    Scheduler::new(pool, active, Duration::from_secs(5))
}

fn routing_table_lookup(c: &mut Criterion) {
    c.bench_function("scheduler/role_for_complexity", |b| {
        b.iter(|| {
            for score in [0.05, 0.33, 0.5, 0.67, 0.9] {
                criterion::black_box(Role::for_complexity(score));
            }
        })
    });
}

fn dispatch_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let scheduler = build_scheduler();
    let req = SynthesizeRequest {
        text: "The quick brown fox jumps over the lazy dog.".to_string(),
        voice: "af_heart".to_string(),
        speed: 1.0,
        lang: "en-us".to_string(),
    };

    let mut group = c.benchmark_group("scheduler/dispatch");
    for complexity in [0.1, 0.5, 0.9] {
        group.bench_with_input(BenchmarkId::from_parameter(complexity), &complexity, |b, &complexity| {
            b.to_async(&rt).iter(|| async {
                let outcome = scheduler.dispatch(&req, complexity).await.expect("dispatch should succeed");
                criterion::black_box(outcome.audio.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, routing_table_lookup, dispatch_roundtrip);
criterion_main!(benches);
