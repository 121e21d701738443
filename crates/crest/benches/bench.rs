use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use crest::{
    ConflictPolicy, HighestPrime, Increment, MaxRegister, MemoryStore, PrimeRequest, RandomText,
    RegisterConfig, Update, WorkSource, WorkerId, highest_prime_at_most,
};
use std::{sync::Arc, time::Instant};
use tokio::runtime::Builder;

// Events applied per benchmark iteration.
const TOTAL_EVENTS: usize = 1024;

fn request(max: u64) -> PrimeRequest {
    PrimeRequest {
        id: format!("req-{max}"),
        max,
        time: 0,
    }
}

fn config() -> RegisterConfig {
    RegisterConfig::new("bench")
        .expect("valid key")
        .with_policy(ConflictPolicy::Abandon)
}

/// Every event loses to the stored value: read, derive, compare, no write.
fn bench_register_skip(c: &mut Criterion) {
    let rt = Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("register/skip");
    group.throughput(Throughput::Elements(TOTAL_EVENTS as u64));

    group.bench_function(format!("elems/{TOTAL_EVENTS}"), |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let register = MaxRegister::new(Arc::new(MemoryStore::new()), HighestPrime, config());
            register.on_event(&request(1_000_000)).await;
            let event = request(1_000);

            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_EVENTS {
                    let update = register.on_event(&event).await;
                    debug_assert!(matches!(update, Update::Skipped { .. }));
                    black_box(update);
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Every event improves: read, derive, encode, conditional write.
fn bench_register_apply(c: &mut Criterion) {
    let rt = Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("register/apply");
    group.throughput(Throughput::Elements(TOTAL_EVENTS as u64));

    group.bench_function(format!("elems/{TOTAL_EVENTS}"), |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let register = MaxRegister::new(
                Arc::new(MemoryStore::new()),
                Increment::<PrimeRequest>::new(),
                config(),
            );
            let event = request(0);

            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_EVENTS {
                    let update = register.on_event(&event).await;
                    debug_assert!(update.is_applied());
                    black_box(update);
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_highest_prime(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive/highest_prime");
    for max in [1_000u64, 100_000, 10_000_000] {
        group.bench_function(format!("max/{max}"), |b| {
            b.iter(|| black_box(highest_prime_at_most(black_box(max))));
        });
    }
    group.finish();
}

fn bench_random_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("work/random_text");
    group.throughput(Throughput::Elements(1));
    let source = RandomText::default();
    group.bench_function("len/256", |b| {
        b.iter(|| black_box(source.next_item(WorkerId(0))));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_register_skip,
    bench_register_apply,
    bench_highest_prime,
    bench_random_text,
);
criterion_main!(benches);
