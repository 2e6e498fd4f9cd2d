//! Performance benchmarks for backoff computation and criteria conversion

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use match_ticket::backoff::{Backoff, BackoffPolicy};
use match_ticket::transport::proto;
use match_ticket::types::SearchCriteria;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn bench_backoff_delays(c: &mut Criterion) {
    let policy = BackoffPolicy::new(Duration::from_millis(250), Duration::from_secs(10));
    let mut rng = StdRng::seed_from_u64(42);

    c.bench_function("backoff_next_jittered", |b| {
        b.iter(|| black_box(policy.next(black_box(6), &mut rng)))
    });

    c.bench_function("backoff_sequence_32", |b| {
        b.iter(|| {
            let mut backoff = Backoff::seeded(policy, 7);
            let mut total = Duration::ZERO;
            for _ in 0..32 {
                total += backoff.next_delay();
            }
            black_box(total)
        })
    });
}

fn bench_criteria_conversion(c: &mut Criterion) {
    let criteria = SearchCriteria::new()
        .tag("mode.session")
        .text("region", "us-central1")
        .number("skill", 1.25)
        .number("latency", 42.0);

    c.bench_function("criteria_to_search_fields", |b| {
        b.iter(|| black_box(proto::SearchFields::from(black_box(&criteria))))
    });

    c.bench_function("criteria_validate", |b| {
        b.iter(|| black_box(criteria.validate().is_ok()))
    });
}

criterion_group!(benches, bench_backoff_delays, bench_criteria_conversion);
criterion_main!(benches);
