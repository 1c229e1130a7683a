// Criterion benchmarks for skein-cluster load balancers
//
// Run benchmarks with:
//   cargo bench -p skein-cluster
//
// For detailed output with plots:
//   cargo bench -p skein-cluster -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use skein_cluster::load_balancer::{
    ConsistentHashLoadBalancer, LocalPrefLoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
    WeightedRoundRobinLoadBalancer,
};
use skein_cluster::LoadBalancer;
use skein_common::{ProviderInfo, Request};

fn providers(count: u16) -> Vec<ProviderInfo> {
    (0..count)
        .map(|i| ProviderInfo::new(format!("10.0.{}.{}", i / 250, i % 250 + 1), 12200).with_weight(i32::from(i % 4 + 1) * 25))
        .collect()
}

fn balancers() -> Vec<Box<dyn LoadBalancer>> {
    vec![
        Box::new(RandomLoadBalancer::new()),
        Box::new(RoundRobinLoadBalancer::new()),
        Box::new(WeightedRoundRobinLoadBalancer::new()),
        Box::new(ConsistentHashLoadBalancer::new()),
        Box::new(LocalPrefLoadBalancer::new("10.0.0.3")),
    ]
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select");
    let request = Request::new("calculator", "add", json!(["user-42", 1]));

    for count in [2u16, 10, 50] {
        let candidates = providers(count);
        for balancer in balancers() {
            group.bench_with_input(BenchmarkId::new(balancer.name(), count), &candidates, |b, candidates| {
                b.iter(|| balancer.select(black_box(&request), black_box(candidates)));
            });
        }
    }

    group.finish();
}

fn bench_consistent_hash_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("consistent_hash_keys");
    let balancer = ConsistentHashLoadBalancer::new();
    let candidates = providers(20);
    let requests: Vec<Request> = (0..100)
        .map(|i| Request::new("calculator", "get", json!(null)).with_hash_key(format!("user-{}", i)))
        .collect();

    group.bench_function("20_providers_100_keys", |b| {
        b.iter(|| {
            for request in &requests {
                black_box(balancer.select(request, &candidates).ok());
            }
        });
    });

    group.bench_function("ring_rebuild_on_change", |b| {
        let shrunk = candidates[1..].to_vec();
        let request = &requests[0];
        b.iter(|| {
            black_box(balancer.select(request, &candidates).ok());
            black_box(balancer.select(request, &shrunk).ok());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_select, bench_consistent_hash_keys);
criterion_main!(benches);
