//! TTFA monitor update/stats overhead. `finalize`/`stats` must stay
//! sub-millisecond on the happy path (spec.md §5) since they run on every
//! request's hot path.

use criterion::{criterion_group, criterion_main, Criterion};
use kokoro_runtime::provider::ProviderId;
use kokoro_runtime::ttfa::{Stage, StageTimer, TtfaMonitor};

fn finalize_overhead(c: &mut Criterion) {
    let monitor = TtfaMonitor::new(1.5, 0.5, 2000.0);
    c.bench_function("ttfa/finalize", |b| {
        b.iter(|| {
            let mut timer = StageTimer::new("bench-req".to_string(), 120, ProviderId::cpu());
            timer.begin_stage(Stage::TextProc);
            timer.begin_stage(Stage::Inference);
            timer.begin_stage(Stage::AudioGen);
            timer.begin_stage(Stage::FirstChunkDeliver);
            criterion::black_box(monitor.finalize(timer));
        })
    });
}

fn stats_overhead(c: &mut Criterion) {
    let monitor = TtfaMonitor::new(1.5, 0.5, 2000.0);
    for i in 0..500 {
        let mut timer = StageTimer::new(format!("warm-{i}"), 120, ProviderId::cpu());
        timer.begin_stage(Stage::Inference);
        monitor.finalize(timer);
    }

    c.bench_function("ttfa/stats", |b| {
        b.iter(|| criterion::black_box(monitor.stats()));
    });
}

criterion_group!(benches, finalize_overhead, stats_overhead);
criterion_main!(benches);
