use config::{Durability, EngineConfig};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Engine, RecordGroup};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

const N_KEYS: usize = 1_000;
const VALUE_SIZE: usize = 100;

fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

fn open(durability: Durability) -> (TempDir, Engine) {
    let dir = tempdir().unwrap();
    let config = EngineConfig::new(dir.path()).num_workers(2).durability(durability);
    let engine = Engine::open(config).unwrap();
    engine.create_database("bench", 1).unwrap();
    (dir, engine)
}

fn loaded(checkpoint: bool) -> (TempDir, Engine) {
    let (dir, engine) = open(Durability::PseudoSync {
        window: Duration::from_millis(50),
    });
    let db = engine.database("bench").unwrap();
    let pending: Vec<_> = (0..N_KEYS)
        .map(|i| {
            let mut group = RecordGroup::new(db.id());
            group.insert(0, key(i), vec![b'x'; VALUE_SIZE]);
            engine.submit_insert(group).unwrap()
        })
        .collect();
    for p in pending {
        p.wait().unwrap();
    }
    if checkpoint {
        engine.checkpoint().unwrap();
    }
    (dir, engine)
}

fn insert_benchmark(c: &mut Criterion) {
    for (name, durability) in [
        ("engine_insert_group_commit_1k", Durability::Group {
            window: Duration::from_millis(1),
            max_batch: 64,
        }),
        ("engine_insert_pseudo_sync_1k", Durability::PseudoSync {
            window: Duration::from_millis(50),
        }),
    ] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || open(durability),
                |(_dir, engine)| {
                    let db = engine.database("bench").unwrap();
                    let pending: Vec<_> = (0..N_KEYS)
                        .map(|i| {
                            let mut group = RecordGroup::new(db.id());
                            group.insert(0, key(i), vec![b'x'; VALUE_SIZE]);
                            engine.submit_insert(group).unwrap()
                        })
                        .collect();
                    for p in pending {
                        p.wait().unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }
}

fn lookup_benchmark(c: &mut Criterion) {
    for (name, checkpoint) in [("engine_lookup_overlay_1k", false), ("engine_lookup_disk_1k", true)] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || loaded(checkpoint),
                |(_dir, engine)| {
                    for i in 0..N_KEYS {
                        assert!(engine.lookup("bench", 0, &key(i)).unwrap().is_some());
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }
}

fn prefix_scan_benchmark(c: &mut Criterion) {
    c.bench_function("engine_prefix_scan_disk_1k", |b| {
        b.iter_batched(
            || loaded(true),
            |(_dir, engine)| {
                let n = engine.prefix_lookup("bench", 0, b"key", true).unwrap().count();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::PerIteration,
        );
    });
}

fn checkpoint_benchmark(c: &mut Criterion) {
    c.bench_function("engine_checkpoint_1k", |b| {
        b.iter_batched(
            || loaded(false),
            |(_dir, engine)| {
                engine.checkpoint().unwrap();
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    insert_benchmark,
    lookup_benchmark,
    prefix_scan_benchmark,
    checkpoint_benchmark
);
criterion_main!(benches);
