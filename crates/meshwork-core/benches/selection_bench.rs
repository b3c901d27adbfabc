//! # Hot-Path Benchmarks
//!
//! Instance selection, breaker checks and rate-limit checks sit on every
//! proxied call.
//!
//! Run with: `cargo bench -p meshwork-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use meshwork_core::{
    CircuitBreaker, CircuitBreakerConfig, LoadBalancer, RouteConfig, RouteTable, ServiceInstance,
    ServiceRegistration, SlidingWindowLimiter, Strategy, weighted_index,
};
use std::hint::black_box;
use std::time::Duration;

fn pool(size: u16) -> Vec<ServiceInstance> {
    (0..size)
        .map(|i| {
            ServiceInstance::from_registration(&ServiceRegistration::new(
                "svc",
                "localhost",
                9000 + i,
            ))
        })
        .collect()
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");

    for size in [1u16, 10, 100] {
        let instances = pool(size);
        for strategy in [Strategy::RoundRobin, Strategy::Random] {
            let lb = LoadBalancer::new(strategy);
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", strategy), size),
                &instances,
                |b, instances| b.iter(|| black_box(lb.select("svc", instances))),
            );
        }
    }

    group.finish();
}

fn bench_weighted(c: &mut Criterion) {
    let weights: Vec<u32> = (1..=32).collect();
    c.bench_function("weighted_index_32", |b| {
        b.iter(|| black_box(weighted_index(black_box(&weights))))
    });
}

fn bench_breaker(c: &mut Criterion) {
    let cb = CircuitBreaker::new("svc", CircuitBreakerConfig::default());
    c.bench_function("breaker_call_allowed", |b| {
        b.iter(|| black_box(cb.call_allowed()))
    });
    c.bench_function("breaker_success", |b| b.iter(|| cb.record_success()));
}

fn bench_limiter(c: &mut Criterion) {
    let limiter = SlidingWindowLimiter::new(Duration::from_secs(60));
    c.bench_function("limiter_check", |b| {
        b.iter(|| black_box(limiter.check("10.0.0.1", "/api", 1_000)))
    });
}

fn bench_resolve(c: &mut Criterion) {
    let mut table = RouteTable::new();
    for i in 0..50 {
        table
            .add_route(RouteConfig::new(format!("/svc{}", i), format!("svc{}", i)))
            .expect("route");
    }
    c.bench_function("route_resolve_50", |b| {
        b.iter(|| black_box(table.resolve("GET", "/svc42/items/7")))
    });
}

criterion_group!(
    benches,
    bench_select,
    bench_weighted,
    bench_breaker,
    bench_limiter,
    bench_resolve
);
criterion_main!(benches);
