//! Benchmark: order book snapshot application and delta throughput, the
//! hot path fed by every market-data tick (C1/C2).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use veloz_core::model::BookLevel;
use veloz_core::orderbook::OrderBook;

fn ten_levels(base: f64, step: f64) -> Vec<BookLevel> {
    (0..10)
        .map(|i| BookLevel { price: base + step * i as f64, qty: 1.0 + i as f64 * 0.1 })
        .collect()
}

fn bench_apply_snapshot(c: &mut Criterion) {
    let bids = ten_levels(50_000.0, -1.0);
    let asks = ten_levels(50_010.0, 1.0);
    c.bench_function("orderbook/apply_snapshot_10x10", |b| {
        b.iter(|| {
            let mut book = OrderBook::new();
            book.apply_snapshot(black_box(&bids), black_box(&asks), 1);
            black_box(&book);
        });
    });
}

fn bench_apply_delta(c: &mut Criterion) {
    let mut book = OrderBook::new();
    book.apply_snapshot(&ten_levels(50_000.0, -1.0), &ten_levels(50_010.0, 1.0), 1);
    let mut seq = 2u64;
    c.bench_function("orderbook/apply_delta_upsert", |b| {
        b.iter(|| {
            book.apply_delta(BookLevel { price: 50_000.5, qty: 2.0 }, true, seq);
            seq += 1;
        });
    });
}

fn bench_best_bid_ask(c: &mut Criterion) {
    let mut book = OrderBook::new();
    book.apply_snapshot(&ten_levels(50_000.0, -1.0), &ten_levels(50_010.0, 1.0), 1);
    c.bench_function("orderbook/best_bid_ask", |b| {
        b.iter(|| {
            black_box(book.best_bid());
            black_box(book.best_ask());
        });
    });
}

criterion_group!(benches, bench_apply_snapshot, bench_apply_delta, bench_best_bid_ask);
criterion_main!(benches);
