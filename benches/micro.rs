//! Micro-benchmarks for the table-engine cores.
//!
//! Uses Criterion for statistically rigorous measurement with regression
//! detection and HTML reports.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench micro              # run all micro-benchmarks
//! cargo bench --bench micro -- memtable  # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use std::fs::File;
use std::sync::Arc;

use tempfile::TempDir;

use stratadb::cache::ShardedLruCache;
use stratadb::encoding::{get_varint32, put_varint32};
use stratadb::iterator::Iter;
use stratadb::key::{BytewiseComparator, Comparator, InternalKeyComparator, LookupKey, ValueType};
use stratadb::memtable::Memtable;
use stratadb::sstable::{Block, BlockBuilder, Table, TableBuilder};
use stratadb::{Options, ReadOptions};

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Default value payload (100 bytes, roughly a small row).
const VALUE_100B: &[u8; 100] = &[0xAB; 100];

/// Format a zero-padded key.
fn make_key(i: u64) -> Vec<u8> {
    format!("key-{i:012}").into_bytes()
}

fn internal_comparator() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

/// A memtable preloaded with `n` sequential puts.
fn populated_memtable(n: u64) -> Memtable {
    let memtable = Memtable::new(internal_comparator());
    for i in 0..n {
        memtable.add(i + 1, ValueType::Value, &make_key(i), VALUE_100B);
    }
    memtable
}

// ------------------------------------------------------------------------------------------------
// Codec
// ------------------------------------------------------------------------------------------------

fn bench_varint(c: &mut Criterion) {
    let values: Vec<u32> = (0..1024u32).map(|i| i.wrapping_mul(2_654_435_761)).collect();

    let mut group = c.benchmark_group("varint");
    group.throughput(Throughput::Elements(values.len() as u64));

    group.bench_function("encode32", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(values.len() * 5);
            for &v in &values {
                put_varint32(&mut buf, black_box(v));
            }
            black_box(buf)
        })
    });

    let mut encoded = Vec::new();
    for &v in &values {
        put_varint32(&mut encoded, v);
    }
    group.bench_function("decode32", |b| {
        b.iter(|| {
            let mut input = encoded.as_slice();
            let mut sum = 0u64;
            while let Some(v) = get_varint32(&mut input) {
                sum += u64::from(v);
            }
            black_box(sum)
        })
    });
    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

fn bench_memtable(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable");

    group.throughput(Throughput::Elements(1000));
    group.bench_function("add_1k", |b| {
        b.iter_batched(
            || Memtable::new(internal_comparator()),
            |memtable| {
                for i in 0..1000u64 {
                    memtable.add(i + 1, ValueType::Value, &make_key(i), VALUE_100B);
                }
                memtable
            },
            BatchSize::SmallInput,
        )
    });

    let memtable = populated_memtable(100_000);
    group.throughput(Throughput::Elements(1));
    group.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 100_000;
            let lookup = LookupKey::new(&make_key(i), u64::MAX >> 8);
            black_box(memtable.get(&lookup))
        })
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            let lookup = LookupKey::new(b"key-zzzzzzzzzzzz", u64::MAX >> 8);
            black_box(memtable.get(&lookup))
        })
    });
    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Blocks
// ------------------------------------------------------------------------------------------------

fn bench_block(c: &mut Criterion) {
    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..256u64)
        .map(|i| (make_key(i), VALUE_100B.to_vec()))
        .collect();

    let mut group = c.benchmark_group("block");
    group.throughput(Throughput::Elements(entries.len() as u64));

    group.bench_function("build", |b| {
        b.iter(|| {
            let mut builder = BlockBuilder::new(16);
            for (key, value) in &entries {
                builder.add(key, value);
            }
            black_box(builder.finish())
        })
    });

    let mut builder = BlockBuilder::new(16);
    for (key, value) in &entries {
        builder.add(key, value);
    }
    let block = Block::new(builder.finish()).unwrap();
    let comparator: Arc<dyn Comparator> = Arc::new(BytewiseComparator);

    group.bench_function("scan", |b| {
        b.iter(|| {
            let mut iter = block.iter(comparator.clone());
            iter.seek_to_first();
            let mut count = 0u32;
            while iter.valid() {
                count += 1;
                iter.next();
            }
            black_box(count)
        })
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("seek", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 97) % 256;
            let mut iter = block.iter(comparator.clone());
            iter.seek(&make_key(i));
            debug_assert!(iter.valid());
            black_box(iter.key().len())
        })
    });
    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Table build + read
// ------------------------------------------------------------------------------------------------

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("table");
    group.sample_size(20);

    let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..10_000u64)
        .map(|i| (make_key(i), VALUE_100B.to_vec()))
        .collect();

    group.throughput(Throughput::Elements(entries.len() as u64));
    group.bench_function("build_10k", |b| {
        let dir = TempDir::new().unwrap();
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let path = dir.path().join(format!("{n:06}.ldb"));
            let file = File::create(&path).unwrap();
            let mut builder = TableBuilder::new(Options::default(), file);
            for (key, value) in &entries {
                builder.add(key, value);
            }
            builder.finish().unwrap();
            black_box(builder.file_size())
        })
    });

    // Build one table for the read-side benchmarks.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.ldb");
    let options = Options {
        block_cache: Some(ShardedLruCache::new(8 << 20)),
        ..Options::default()
    };
    let file = File::create(&path).unwrap();
    let mut builder = TableBuilder::new(options.clone(), file);
    for (key, value) in &entries {
        builder.add(key, value);
    }
    builder.finish().unwrap();
    builder.sync().unwrap();
    let size = builder.file_size();
    let table = Arc::new(Table::open(options, File::open(&path).unwrap(), size).unwrap());

    group.throughput(Throughput::Elements(1));
    group.bench_function("point_get_cached", |b| {
        let read_options = ReadOptions::default();
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 6151) % 10_000;
            let mut found = 0usize;
            table
                .internal_get(&read_options, &make_key(i), &mut |_k, v| found = v.len())
                .unwrap();
            black_box(found)
        })
    });

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("full_scan_10k", |b| {
        let read_options = ReadOptions::default();
        b.iter(|| {
            let mut iter = Table::new_iterator(&table, &read_options);
            iter.seek_to_first();
            let mut count = 0u32;
            while iter.valid() {
                count += 1;
                iter.next();
            }
            black_box(count)
        })
    });
    group.finish();
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    let cache: ShardedLruCache<u64> = ShardedLruCache::new(1 << 16);
    for i in 0..10_000u64 {
        let handle = cache.insert(&i.to_be_bytes(), i, 1, Box::new(|_k, _v| {}));
        drop(handle);
    }

    group.bench_function("lookup_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 4241) % 10_000;
            black_box(cache.lookup(&i.to_be_bytes()).is_some())
        })
    });

    group.bench_function("insert_evict", |b| {
        let small: ShardedLruCache<u64> = ShardedLruCache::new(1024);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let handle = small.insert(&i.to_be_bytes(), i, 1, Box::new(|_k, _v| {}));
            drop(handle);
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_varint,
    bench_memtable,
    bench_block,
    bench_table,
    bench_cache
);
criterion_main!(benches);
