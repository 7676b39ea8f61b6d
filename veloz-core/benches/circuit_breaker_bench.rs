//! Benchmark: circuit breaker overhead on the pre-trade submission path.
//!
//! `allow_request`/`record_success`/`record_failure` run on every order
//! submission, so the closed-state hot path should stay cheap; this
//! benchmark tracks that alongside the cost of the Open -> HalfOpen ->
//! Closed recovery sequence.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use veloz_core::risk::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

fn config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        timeout: Duration::from_millis(10),
        success_threshold: 2,
    }
}

fn bench_allow_request_closed(c: &mut Criterion) {
    let cb = CircuitBreaker::new(config());
    c.bench_function("circuit_breaker/allow_request_closed", |b| {
        b.iter(|| black_box(cb.allow_request()));
    });
}

fn bench_record_success_closed(c: &mut Criterion) {
    let cb = CircuitBreaker::new(config());
    c.bench_function("circuit_breaker/record_success_closed", |b| {
        b.iter(|| cb.record_success());
    });
}

fn bench_trip_and_recover(c: &mut Criterion) {
    c.bench_function("circuit_breaker/trip_and_recover", |b| {
        b.iter(|| {
            let cb = CircuitBreaker::new(config());
            for _ in 0..5 {
                cb.record_failure();
            }
            std::thread::sleep(Duration::from_millis(15));
            black_box(cb.allow_request());
            cb.record_success();
            cb.record_success();
        });
    });
}

criterion_group!(
    benches,
    bench_allow_request_closed,
    bench_record_success_closed,
    bench_trip_and_recover,
);
criterion_main!(benches);
