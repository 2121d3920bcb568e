//! Benchmarks for the B+Tree write path, lookups, scans and checkpoints.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use genbtree::{BTree, MemoryStore, NoMonitor, SimpleLongLayout, TreeConfig, Unlimited, WriterOptions};

const PAGE_SIZE: usize = 4096;
const INSERT_COUNT: i64 = 32_768;
const RANGE_WIDTH: i64 = 512;

fn fresh_tree() -> BTree<SimpleLongLayout> {
    let config = TreeConfig::default()
        .with_page_size(PAGE_SIZE)
        .with_pool_size(4096);
    BTree::open_or_create(
        MemoryStore::new(PAGE_SIZE),
        SimpleLongLayout::new(),
        config,
        NoMonitor,
    )
    .unwrap()
}

fn loaded_tree(count: i64) -> BTree<SimpleLongLayout> {
    let tree = fresh_tree();
    let mut writer = tree.writer(WriterOptions::default()).unwrap();
    for key in 0..count {
        writer.put(key, key).unwrap();
    }
    writer.close();
    tree.checkpoint(&Unlimited).unwrap();
    tree
}

/// Keys 0..count in a fixed scattered order.
fn scattered(count: i64) -> Vec<i64> {
    // 7919 is prime and does not divide count, so this is a permutation
    (0..count).map(|i| (i * 7919) % count).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/insert");
    group.sample_size(20);
    group.throughput(Throughput::Elements(INSERT_COUNT as u64));

    group.bench_function("sequential", |b| {
        b.iter_batched(
            fresh_tree,
            |tree| {
                let mut writer = tree.writer(WriterOptions::default()).unwrap();
                for key in 0..INSERT_COUNT {
                    writer.put(key, key).unwrap();
                }
                writer.close();
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("sequential_dense", |b| {
        let options = WriterOptions::default().with_split_retention(0.9);
        b.iter_batched(
            fresh_tree,
            |tree| {
                let mut writer = tree.writer(options).unwrap();
                for key in 0..INSERT_COUNT {
                    writer.put(key, key).unwrap();
                }
                writer.close();
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    let keys = scattered(INSERT_COUNT);
    group.bench_function("scattered", |b| {
        b.iter_batched(
            fresh_tree,
            |tree| {
                let mut writer = tree.writer(WriterOptions::default()).unwrap();
                for &key in &keys {
                    writer.put(key, key).unwrap();
                }
                writer.close();
                black_box(tree.height());
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/read");
    let tree = loaded_tree(INSERT_COUNT);

    group.throughput(Throughput::Elements(RANGE_WIDTH as u64));
    group.bench_function(BenchmarkId::new("range_scan", RANGE_WIDTH), |b| {
        let mut start = 0;
        b.iter(|| {
            start = (start + 4099) % (INSERT_COUNT - RANGE_WIDTH);
            let hits = tree.seek(start, start + RANGE_WIDTH).unwrap().count();
            black_box(hits);
        });
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("point_seek", |b| {
        let mut key = 0;
        b.iter(|| {
            key = (key + 7919) % INSERT_COUNT;
            black_box(tree.seek(key, key + 1).unwrap().next());
        });
    });

    group.finish();
}

fn bench_checkpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree/checkpoint");
    group.sample_size(20);

    group.bench_function("after_1k_updates", |b| {
        b.iter_batched(
            || {
                let tree = loaded_tree(INSERT_COUNT);
                let mut writer = tree.writer(WriterOptions::default()).unwrap();
                for key in scattered(INSERT_COUNT).into_iter().take(1_000) {
                    writer.put(key, -key).unwrap();
                }
                writer.close();
                tree
            },
            |tree| tree.checkpoint(&Unlimited).unwrap(),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_read, bench_checkpoint);
criterion_main!(benches);
