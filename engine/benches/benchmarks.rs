//! Performance benchmarks for tally-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_engine::{
    remote::MemoryRemote, BackupSnapshot, Connectivity, DatasetLock, ManualClock, MemoryTable,
    NewOperation, OperationQueue, OperationType, QueuedOperation, Schema, SyncConfig,
    SyncCoordinator, TracingNotifier,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn memory_queue() -> Arc<OperationQueue> {
    Arc::new(OperationQueue::new(
        Arc::new(MemoryTable::new()),
        Schema::ledger(),
        Arc::new(ManualClock::new(1)),
    ))
}

fn add_transaction(i: usize) -> NewOperation {
    NewOperation::new(
        OperationType::AddTransaction,
        json!({"client_id": format!("tx_{}", i), "amount": 50, "category": "food"}),
    )
}

fn bench_queue_operations(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_operations");

    for size in [10, 100, 1000].iter() {
        // Every insert scans the pending set for duplicates
        group.bench_with_input(BenchmarkId::new("enqueue", size), size, |b, &size| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let queue = memory_queue();
                    for i in 0..size {
                        queue.add_operation(add_transaction(i)).await.unwrap();
                    }
                    let start = Instant::now();
                    queue.add_operation(black_box(add_transaction(size))).await.unwrap();
                    total += start.elapsed();
                }
                total
            })
        });

        group.bench_with_input(BenchmarkId::new("enqueue_duplicate", size), size, |b, &size| {
            let queue = memory_queue();
            rt.block_on(async {
                for i in 0..size {
                    queue.add_operation(add_transaction(i)).await.unwrap();
                }
            });
            b.to_async(&rt)
                .iter(|| async { queue.add_operation(black_box(add_transaction(0))).await.unwrap() })
        });
    }

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("drain");
    group.sample_size(20);

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("sync_to_cloud", size), size, |b, &size| {
            b.to_async(&rt).iter_custom(|iters| async move {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let coordinator = SyncCoordinator::new(
                        memory_queue(),
                        Arc::new(MemoryRemote::new()),
                        Connectivity::new(true),
                        Arc::new(TracingNotifier),
                        DatasetLock::new(),
                        &SyncConfig::default(),
                    );
                    for i in 0..size {
                        coordinator.enqueue(add_transaction(i)).await.unwrap();
                    }

                    let start = Instant::now();
                    let report = coordinator.sync_to_cloud().await.unwrap();
                    total += start.elapsed();
                    assert_eq!(report.success, size);
                }
                total
            })
        });
    }

    group.finish();
}

fn bench_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering");

    for size in [100, 1000, 10000].iter() {
        let ops: Vec<QueuedOperation> = (0..*size)
            .map(|i| {
                serde_json::from_value(json!({
                    "id": i,
                    "type": "UPDATE_DEBT",
                    "data": {"name": format!("debt_{}", i % 50), "amount": i},
                    "timestamp": (i * 7919) % 1000,
                    "status": "pending",
                    "retryCount": 0
                }))
                .unwrap()
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("sort_pending", size), &ops, |b, ops| {
            b.iter(|| {
                let mut ops = ops.clone();
                ops.sort();
                black_box(ops)
            })
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for size in [100, 1000, 5000].iter() {
        let mut snapshot = BackupSnapshot::new(chrono::Utc::now());
        for i in 0..*size {
            snapshot.transactions.push(json!({
                "client_id": format!("tx_{}", i),
                "amount": i as f64 * 1.5,
                "date": "2024-03-01",
            }));
        }
        let text = snapshot.to_json().unwrap();

        group.bench_with_input(BenchmarkId::new("export", size), &snapshot, |b, snapshot| {
            b.iter(|| black_box(snapshot.to_json().unwrap()))
        });

        group.bench_with_input(BenchmarkId::new("parse", size), &text, |b, text| {
            b.iter(|| BackupSnapshot::from_json(black_box(text)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("validate", size), &snapshot, |b, snapshot| {
            let schema = Schema::ledger();
            b.iter(|| {
                black_box(snapshot.valid_records(tally_engine::Entity::Transaction, &schema))
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_operations,
    bench_drain,
    bench_ordering,
    bench_snapshot
);
criterion_main!(benches);
