//! 存储引擎性能基准测试

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tinyurl::storage::{MemoryKeeper, Storage, UrlMap, UrlRecord};

fn build_storage(rt: &tokio::runtime::Runtime, size: usize) -> Arc<Storage> {
    rt.block_on(async {
        let storage = Storage::open(Arc::new(MemoryKeeper::new())).await;
        let batch: UrlMap = (0..size)
            .map(|i| {
                let key = format!("k{}", i);
                let record = UrlRecord::new(key.clone(), format!("https://example.com/{}", i))
                    .with_owner(format!("u{}", i % 100));
                (key, record)
            })
            .collect();
        storage.insert_batch(batch).await.unwrap();
        Arc::new(storage)
    })
}

/// 单线程点查
fn bench_get_url(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("get_url");

    for size in [1_000, 100_000] {
        let storage = build_storage(&rt, size);
        let mut idx = 0usize;
        group.bench_with_input(BenchmarkId::new("entries", size), &size, |b, &size| {
            b.iter(|| {
                let key = format!("k{}", idx % size);
                idx += 1;
                storage.get_url(&key).unwrap()
            });
        });
    }
    group.finish();
}

/// 多任务并发读
fn bench_concurrent_reads(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = build_storage(&rt, 10_000);
    let mut group = c.benchmark_group("get_url/concurrent");

    for tasks in [2, 8] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::new("tasks", tasks), &tasks, |b, &tasks| {
            b.to_async(&rt).iter(|| {
                let storage = Arc::clone(&storage);
                async move {
                    let mut handles = Vec::with_capacity(tasks);
                    for t in 0..tasks {
                        let storage = Arc::clone(&storage);
                        handles.push(tokio::spawn(async move {
                            for i in 0..1000 / tasks {
                                let _ = storage.get_url(&format!("k{}", t * 1000 + i));
                            }
                        }));
                    }
                    for handle in handles {
                        handle.await.unwrap();
                    }
                }
            });
        });
    }
    group.finish();
}

/// 按用户列出链接
fn bench_get_user_urls(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = build_storage(&rt, 10_000);

    c.bench_function("get_user_urls/10k", |b| {
        b.iter(|| storage.get_user_urls("u42"));
    });
}

criterion_group!(
    benches,
    bench_get_url,
    bench_concurrent_reads,
    bench_get_user_urls
);
criterion_main!(benches);
