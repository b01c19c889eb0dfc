//! Resilience benchmarks
//!
//! Benchmarks for the circuit breaker hot paths, backoff calculation, and
//! fault classification.
//!
//! Run with: `cargo bench --bench resilience_bench -p faultline`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use faultline::{CircuitBreaker, Classifier, Fault, RetryPolicy};
use tokio::runtime::Builder as RuntimeBuilder;

fn bench_breaker_paths(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread()
        .enable_time()
        .build()
        .expect("benchmark runtime");
    let mut group = c.benchmark_group("circuit_breaker_paths");

    group.bench_function("execute_success", |b| {
        let breaker = CircuitBreaker::with_defaults("bench");
        b.iter(|| {
            let result =
                runtime.block_on(breaker.execute(|| async { Ok::<_, Fault>(black_box(1)) }));
            let _result = black_box(result);
        });
    });

    group.bench_function("open_short_circuit", |b| {
        let breaker = CircuitBreaker::builder("bench")
            .failure_threshold(1)
            .reset_timeout(Duration::from_secs(600))
            .build()
            .expect("valid breaker config");
        breaker.record_failure(&Fault::network("prime the open state"));

        b.iter(|| {
            let result: Result<(), Fault> =
                runtime.block_on(breaker.execute(|| async { Ok(()) }));
            let _result = black_box(result);
        });
    });

    group.finish();
}

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_backoff");
    let policy = RetryPolicy::fast();

    group.bench_function("exact_delay", |b| {
        b.iter(|| {
            for attempt in 1..=8u32 {
                black_box(policy.backoff_delay(black_box(attempt)));
            }
        });
    });

    group.bench_function("jittered_delay", |b| {
        b.iter(|| black_box(policy.delay_for(black_box(3))));
    });

    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let classifier = Classifier::new();
    let faults = [
        Fault::network("connection refused"),
        Fault::other_status("bad gateway", 502),
        Fault::other_code("request timed out", "ETIMEDOUT"),
        Fault::other("unlabeled failure"),
    ];

    group.bench_function("classify_mixed", |b| {
        b.iter(|| {
            for fault in &faults {
                black_box(classifier.classify(black_box(fault)));
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_breaker_paths, bench_backoff, bench_classification);
criterion_main!(benches);
