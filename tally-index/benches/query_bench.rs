//! Query Path Benchmarks
//!
//! Measures the three planner regimes over a 50k-log corpus: the summed
//! fast path, bloom-pruned selective filters, and dense filters that pay for
//! full row scans.
//!
//! Run with: cargo bench --package tally-index

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use tally_index::{Address, LogIndex, LogRecord, Query, Topic};

const LOGS: u64 = 50_000;
const BLOCKS: u64 = 5_000;

fn populated_index(dir: &std::path::Path) -> LogIndex {
    let mut rng = StdRng::seed_from_u64(42);

    let mut block_numbers: Vec<u64> = (0..LOGS).map(|_| rng.gen_range(0..BLOCKS)).collect();
    block_numbers.sort_unstable();

    let records: Vec<LogRecord> = block_numbers
        .into_iter()
        .map(|block| {
            // Address 0 is rare (selective); the rest are dense.
            let address = if rng.gen_range(0..1000) == 0 {
                Address([0; 20])
            } else {
                Address([rng.gen_range(1..32u8); 20])
            };
            let topics = [Topic([rng.gen_range(0..64u8); 32])];
            LogRecord::new(block, address, &topics)
        })
        .collect();

    let index = LogIndex::open(dir, 512 * 1024 * 1024).unwrap();
    index.insert(&records).unwrap();
    index.bump_height(BLOCKS).unwrap();
    index
}

fn bench_query(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let index = populated_index(tmp.path());

    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(LOGS));

    group.bench_function("unfiltered_full_range", |bencher| {
        let query = Query::range(0, BLOCKS);
        bencher.iter(|| black_box(index.query(black_box(&query)).unwrap()))
    });

    group.bench_function("rare_address_bloom_pruned", |bencher| {
        let query = Query::range(0, BLOCKS).address(Address([0; 20]));
        bencher.iter(|| black_box(index.query(black_box(&query)).unwrap()))
    });

    group.bench_function("dense_address_row_scan", |bencher| {
        let query = Query::range(0, BLOCKS).address(Address([7; 20]));
        bencher.iter(|| black_box(index.query(black_box(&query)).unwrap()))
    });

    group.bench_function("topic_union_two_positions", |bencher| {
        let query = Query::range(0, BLOCKS)
            .topic(0, Topic([3; 32]))
            .topic(0, Topic([9; 32]));
        bencher.iter(|| black_box(index.query(black_box(&query)).unwrap()))
    });

    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(1_000));
    group.sample_size(20);

    group.bench_function("insert_1k_logs", |bencher| {
        bencher.iter_with_setup(
            || {
                let tmp = TempDir::new().unwrap();
                let index = LogIndex::open(tmp.path(), 64 * 1024 * 1024).unwrap();
                let records: Vec<LogRecord> = (0..1_000u64)
                    .map(|i| {
                        LogRecord::new(i / 4, Address([(i % 100) as u8; 20]), &[Topic([(i % 50) as u8; 32])])
                    })
                    .collect();
                (tmp, index, records)
            },
            |(_tmp, index, records)| {
                index.insert(black_box(&records)).unwrap();
            },
        )
    });

    group.finish();
}

criterion_group!(benches, bench_query, bench_ingest);
criterion_main!(benches);
