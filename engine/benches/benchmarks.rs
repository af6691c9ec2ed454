//! Performance benchmarks for duet-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duet_engine::{
    models::LoveNote, resolve::merge_by_id, LocalStore, ManualClock, MemoryRemote, MemoryStorage,
    Mutation, OperationQueue, RecordCodec, RecordMeta,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn note(id: u64, updated_at: u64) -> LoveNote {
    LoveNote {
        meta: RecordMeta::at(format!("note_{id}"), 1, updated_at),
        author_id: "sam".into(),
        content: "thinking of you".into(),
        read: false,
    }
}

fn bench_local_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_store");

    group.bench_function("upsert", |b| {
        let store: LocalStore<LoveNote> = LocalStore::open(
            LoveNote::COLLECTION,
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_000)),
        )
        .unwrap();
        for i in 0..100 {
            store.upsert(note(i, 100)).unwrap();
        }
        let mut i = 0u64;

        b.iter(|| {
            i += 1;
            store.upsert(black_box(note(i % 100, 0)))
        })
    });

    group.bench_function("list_1000", |b| {
        let store: LocalStore<LoveNote> = LocalStore::open(
            LoveNote::COLLECTION,
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(1_000)),
        )
        .unwrap();
        for i in 0..1000 {
            store.upsert(note(i, i)).unwrap();
        }

        b.iter(|| black_box(store.list()))
    });

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("bootstrap_merge");

    for size in [100u64, 1000, 10_000] {
        // Half the ids overlap, the rest are split between the two sides
        let local: BTreeMap<_, _> = (0..size)
            .map(|i| (format!("note_{i}"), note(i, 100)))
            .collect();
        let remote: Vec<_> = (size / 2..size + size / 2).map(|i| note(i, 200)).collect();
        let deleted = BTreeSet::new();

        group.bench_with_input(BenchmarkId::new("merge_by_id", size), &size, |b, _| {
            b.iter(|| merge_by_id(black_box(local.clone()), black_box(remote.clone()), &deleted))
        });
    }

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("operation_queue");
    let codec = RecordCodec::<LoveNote>::default();

    group.bench_function("enqueue", |b| {
        let queue = OperationQueue::open(
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(0)),
            256,
        )
        .unwrap();
        let record = codec.encode(&note(1, 100)).unwrap();

        b.iter(|| {
            queue.enqueue(
                "love_notes",
                black_box(Mutation::Upsert {
                    record: record.clone(),
                }),
            )
        })
    });

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("replay_on_open", size), &size, |b, &size| {
            let storage = MemoryStorage::new();
            let queue = OperationQueue::open(
                Arc::new(storage.clone()),
                Arc::new(ManualClock::new(0)),
                usize::MAX,
            )
            .unwrap();
            for i in 0..size as u64 {
                let op = queue
                    .enqueue(
                        "love_notes",
                        Mutation::Upsert {
                            record: codec.encode(&note(i, 100)).unwrap(),
                        },
                    )
                    .unwrap();
                if i % 2 == 0 {
                    queue.ack(op.seq).unwrap();
                }
            }
            drop(queue);

            // Reopening compacts, so replay from a copy of the original bytes
            b.iter(|| {
                let copy = MemoryStorage::new();
                for key in ["queue/ops.log", "queue/cursor"] {
                    if let Some(bytes) = duet_engine::Storage::read(&storage, key).unwrap() {
                        duet_engine::Storage::write(&copy, key, &bytes).unwrap();
                    }
                }
                OperationQueue::open(Arc::new(copy), Arc::new(ManualClock::new(0)), usize::MAX)
                    .unwrap()
            })
        });
    }

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("flush", size), &size, |b, &size| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            let records: Vec<_> = (0..size as u64)
                .map(|i| codec.encode(&note(i, 100)).unwrap())
                .collect();

            b.iter(|| {
                let remote = MemoryRemote::new();
                let queue = OperationQueue::open(
                    Arc::new(MemoryStorage::new()),
                    Arc::new(ManualClock::new(0)),
                    256,
                )
                .unwrap();
                for record in &records {
                    queue
                        .enqueue(
                            "love_notes",
                            Mutation::Upsert {
                                record: record.clone(),
                            },
                        )
                        .unwrap();
                }
                runtime.block_on(queue.flush(&remote)).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_local_store, bench_merge, bench_queue);
criterion_main!(benches);
