use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures::future::join_all;
use linegrant::{CachedLineStore, ClaimCoordinator, FileLineStore, LineStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Builder;

const BATCH_SIZES: [usize; 3] = [1, 64, 1024];
const CONCURRENCY: usize = 16;

fn batch(next: &AtomicUsize, size: usize) -> Vec<String> {
    let start = next.fetch_add(size, Ordering::Relaxed);
    (start..start + size).map(|n| format!("line-{n}")).collect()
}

fn bench_claims(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut group = c.benchmark_group("claim");
    for (label, cached) in [("file", false), ("cached", true)] {
        for size in BATCH_SIZES {
            let path = dir.path().join(format!("{label}-{size}.txt"));
            let store = FileLineStore::new(&path);
            let coordinator = rt.block_on(async {
                store.ensure_initialized().await.unwrap();
                if cached {
                    ClaimCoordinator::spawn(CachedLineStore::new(store))
                } else {
                    ClaimCoordinator::spawn(store)
                }
            });
            let next = AtomicUsize::new(0);

            group.throughput(Throughput::Elements((size * CONCURRENCY) as u64));
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, &size| {
                b.to_async(&rt).iter(|| async {
                    let calls = (0..CONCURRENCY).map(|_| {
                        let coordinator = coordinator.clone();
                        let candidates = batch(&next, size);
                        async move { coordinator.claim(candidates, None).await }
                    });
                    for result in join_all(calls).await {
                        black_box(result.unwrap());
                    }
                });
            });

            rt.block_on(coordinator.shutdown()).unwrap();
        }
    }
    group.finish();
}

criterion_group!(benches, bench_claims);
criterion_main!(benches);
