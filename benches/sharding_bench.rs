// benches/sharding_bench.rs
//! Shard hash and filter throughput
//!
//! The filter runs for every registered agent on every scheduler tick, so it
//! has to stay cheap for fleets with tens of thousands of agents.

use cats_coordinator::agent::StaticAgent;
use cats_coordinator::cluster::{shard_hash, ShardAssignment, ShardingFilter};
use cats_coordinator::utils::config::ShardingConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn agents(count: usize) -> Vec<StaticAgent> {
    (0..count)
        .map(|i| {
            StaticAgent::new(
                format!("account-{:05}/us-east-1/ClusterCachingAgent", i),
                "aws",
            )
        })
        .collect()
}

fn bench_shard_hash(c: &mut Criterion) {
    c.bench_function("shard_hash", |b| {
        b.iter(|| shard_hash(black_box("account-00042")))
    });
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("sharding_filter");

    for count in [1_000usize, 10_000] {
        let agents = agents(count);
        let filter = ShardingFilter::new(&ShardingConfig::default());
        filter.assign(ShardAssignment {
            pod_index: 3,
            pod_count: 8,
        });

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &agents, |b, agents| {
            b.iter(|| agents.iter().filter(|agent| filter.filter(*agent)).count())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_shard_hash, bench_filter);
criterion_main!(benches);
