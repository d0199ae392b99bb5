use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ipblock_pool::{FailurePolicy, MemoryStore, PoolConfig, PoolManager, ReleaseMode};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Builder;

// Number of blocks allocated per benchmark iteration.
const TOTAL_BLOCKS: usize = 256;

fn config() -> PoolConfig {
    PoolConfig {
        start_range: Ipv4Addr::new(10, 0, 0, 0),
        end_range: Ipv4Addr::new(10, 255, 255, 252),
        failure_policy: FailurePolicy::Propagate,
        ..Default::default()
    }
}

async fn fresh_pool() -> PoolManager {
    PoolManager::new(config(), Arc::new(MemoryStore::new()))
        .await
        .unwrap()
}

/// Sequential allocations on a fresh in-memory pool, keyed and unkeyed.
fn bench_allocate(c: &mut Criterion) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let mut group = c.benchmark_group("allocate");
    group.throughput(Throughput::Elements(TOTAL_BLOCKS as u64));

    group.bench_function(format!("unkeyed/{TOTAL_BLOCKS}"), |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let pool = fresh_pool().await;
                let start = Instant::now();
                for _ in 0..TOTAL_BLOCKS {
                    black_box(pool.allocate(None, ReleaseMode::Immediate).await.unwrap());
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    // Every keyed allocation scans all existing records first.
    group.bench_function(format!("keyed/{TOTAL_BLOCKS}"), |b| {
        b.to_async(&rt).iter_custom(|iters| async move {
            let keys: Vec<String> = (0..TOTAL_BLOCKS).map(|i| format!("svc-{i}")).collect();
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let pool = fresh_pool().await;
                let start = Instant::now();
                for key in &keys {
                    black_box(
                        pool.allocate(Some(key), ReleaseMode::Immediate)
                            .await
                            .unwrap(),
                    );
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

/// Lookups against a pool holding `TOTAL_BLOCKS` keyed blocks.
fn bench_lookup(c: &mut Criterion) {
    let rt = Builder::new_current_thread().enable_all().build().unwrap();
    let pool = rt.block_on(async {
        let pool = fresh_pool().await;
        for i in 0..TOTAL_BLOCKS {
            pool.allocate(Some(&format!("svc-{i}")), ReleaseMode::Immediate)
                .await
                .unwrap();
        }
        pool
    });
    let last_key = format!("svc-{}", TOTAL_BLOCKS - 1);
    let mut group = c.benchmark_group("lookup");
    group.throughput(Throughput::Elements(1));

    group.bench_function("by_address", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                pool.lookup(Some(Ipv4Addr::new(10, 0, 0, 128)), None)
                    .await
                    .unwrap(),
            )
        });
    });

    group.bench_function(format!("by_key/{TOTAL_BLOCKS}"), |b| {
        b.to_async(&rt).iter(|| async {
            black_box(pool.lookup(None, Some(&last_key)).await.unwrap())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_allocate, bench_lookup);
criterion_main!(benches);
