//! # Index Integration Tests
//!
//! End-to-end coverage of the embedding API: ingestion, height bumps, the
//! query planner's short-circuits, range clamping and reopen fidelity.

use std::sync::atomic::AtomicBool;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use tally_index::{Address, LogIndex, LogRecord, Query, Topic};

fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

fn topic(seed: u8) -> Topic {
    Topic([seed; 32])
}

/// Reference matcher: the count a full replay of the records would give.
fn brute_force(records: &[LogRecord], query: &Query) -> u64 {
    records
        .iter()
        .filter(|r| r.block_number >= query.from_block && r.block_number <= query.to_block)
        .filter(|r| query.addresses.is_empty() || query.addresses.contains(&r.address))
        .filter(|r| {
            query.topics.iter().enumerate().all(|(position, values)| {
                let concrete: Vec<&Topic> = values.iter().flatten().collect();
                if values.is_empty() || concrete.is_empty() {
                    return true; // unconstrained, or nulls only
                }
                match &r.topics[position] {
                    Some(t) => concrete.contains(&t),
                    None => false,
                }
            })
        })
        .count() as u64
}

#[test]
fn test_empty_index() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    assert_eq!(index.query(&Query::range(0, 0)).unwrap(), 0);
    assert_eq!(index.blocks_count(), 0);
    assert_eq!(index.logs_count(), 0);
    assert_eq!(index.height(), None);
}

#[test]
fn test_one_block_one_log() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index.insert(&[LogRecord::new(10, addr(0xAA), &[topic(0x11)])]).unwrap();
    index.bump_height(10).unwrap();

    assert_eq!(index.height(), Some(10));
    assert_eq!(index.query(&Query::range(0, 10)).unwrap(), 1);
    assert_eq!(index.query(&Query::range(0, 10).address(addr(0xAA))).unwrap(), 1);
    assert_eq!(index.query(&Query::range(0, 10).topic(0, topic(0x22))).unwrap(), 0);
    assert_eq!(index.query(&Query::range(0, 9)).unwrap(), 0);
}

#[test]
fn test_topic_position_wildcard() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index
        .insert(&[
            LogRecord::new(5, addr(0xA0), &[topic(0x70), topic(0x71)]),
            LogRecord::new(5, addr(0xA0), &[topic(0x70)]),
        ])
        .unwrap();

    assert_eq!(index.query(&Query::range(5, 5).topic(1, topic(0x71))).unwrap(), 1);
    assert_eq!(index.query(&Query::range(5, 5).topic(0, topic(0x70))).unwrap(), 2);
    assert_eq!(
        index
            .query(&Query::range(5, 5).topic(0, topic(0x70)).topic(1, topic(0x71)))
            .unwrap(),
        1
    );
}

#[test]
fn test_address_union_and_miss_short_circuit() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index
        .insert(&[
            LogRecord::new(7, addr(0xA0), &[]),
            LogRecord::new(7, addr(0xB0), &[]),
        ])
        .unwrap();

    let union = Query::range(7, 7).address(addr(0xA0)).address(addr(0xB0));
    assert_eq!(index.query(&union).unwrap(), 2);

    // An address the dictionary has never seen cannot match: the planner
    // answers without scanning a single row.
    let rows_before = index.metrics().rows_scanned;
    assert_eq!(index.query(&Query::range(7, 7).address(addr(0xC0))).unwrap(), 0);
    assert_eq!(index.metrics().rows_scanned, rows_before);
    assert_eq!(index.metrics().queries_short_circuited, 1);
}

#[test]
fn test_union_with_unknown_member_still_matches() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index.insert(&[LogRecord::new(3, addr(0xA0), &[])]).unwrap();

    // One known and one unknown address: the known one still counts.
    let query = Query::range(0, 3).address(addr(0xA0)).address(addr(0xC0));
    assert_eq!(index.query(&query).unwrap(), 1);
}

#[test]
fn test_range_clamp() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let mut records = Vec::new();
    for block in 0..=100u64 {
        if block % 3 == 0 {
            records.push(LogRecord::new(block, addr((block % 7) as u8), &[]));
        }
    }
    index.insert(&records).unwrap();
    index.bump_height(100).unwrap();

    assert_eq!(index.height(), Some(100));
    assert_eq!(
        index.query(&Query::range(0, 1_000_000_000)).unwrap(),
        index.logs_count()
    );
    // A range entirely past the tip is empty, not an error.
    assert_eq!(index.query(&Query::range(200, 1_000_000_000)).unwrap(), 0);
}

#[test]
fn test_inverted_range_is_client_error() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let err = index.query(&Query::range(5, 4)).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_QUERY");
}

#[test]
fn test_null_topic_normalization() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index
        .insert(&[
            LogRecord::new(1, addr(0xA0), &[topic(0x70)]),
            LogRecord::new(1, addr(0xA1), &[]),
        ])
        .unwrap();

    // A position holding only nulls is the same as omitting it: both logs
    // match, including the one with no topic at all.
    assert_eq!(index.query(&Query::range(1, 1).null_topic(0)).unwrap(), 2);
    // Null alongside a concrete value: the null drops out.
    let mixed = Query::range(1, 1).null_topic(0).topic(0, topic(0x70));
    assert_eq!(index.query(&mixed).unwrap(), 1);
}

#[test]
fn test_limit_short_circuits() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let records: Vec<_> = (0..10u64)
        .map(|block| LogRecord::new(block, addr(0xA0), &[topic(0x70)]))
        .collect();
    index.insert(&records).unwrap();

    assert_eq!(index.query(&Query::range(0, 9).limit(3)).unwrap(), 3);
    assert_eq!(index.query(&Query::range(0, 9).address(addr(0xA0)).limit(4)).unwrap(), 4);
    assert_eq!(index.query(&Query::range(0, 9).limit(0)).unwrap(), 0);
    // Limit above the true count does not inflate it.
    assert_eq!(index.query(&Query::range(0, 9).limit(1000)).unwrap(), 10);
}

#[test]
fn test_cancellation_between_blocks() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let records: Vec<_> = (0..100u64)
        .map(|block| LogRecord::new(block, addr(0xA0), &[]))
        .collect();
    index.insert(&records).unwrap();

    let cancelled = AtomicBool::new(true);
    let partial = index
        .query_with_cancel(&Query::range(0, 99).address(addr(0xA0)), &cancelled)
        .unwrap();
    assert_eq!(partial, 0);

    let live = AtomicBool::new(false);
    assert_eq!(
        index.query_with_cancel(&Query::range(0, 99).address(addr(0xA0)), &live).unwrap(),
        100
    );
}

#[test]
fn test_out_of_order_batches_rejected() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index.insert(&[LogRecord::new(5, addr(0xA0), &[])]).unwrap();

    // Below the tip's successor.
    let err = index.insert(&[LogRecord::new(4, addr(0xA0), &[])]).unwrap_err();
    assert_eq!(err.error_code(), "INVARIANT_VIOLATION");
    // The tip block itself is already finalized.
    let err = index.insert(&[LogRecord::new(5, addr(0xA0), &[])]).unwrap_err();
    assert_eq!(err.error_code(), "INVARIANT_VIOLATION");
    // Unordered within one batch.
    let err = index
        .insert(&[
            LogRecord::new(8, addr(0xA0), &[]),
            LogRecord::new(7, addr(0xA0), &[]),
        ])
        .unwrap_err();
    assert_eq!(err.error_code(), "INVARIANT_VIOLATION");

    // The failed batches published nothing.
    assert_eq!(index.blocks_count(), 6);
    assert_eq!(index.logs_count(), 1);
    assert_eq!(index.query(&Query::range(0, 10)).unwrap(), 1);

    // The index remains usable at its pre-batch state.
    index.insert(&[LogRecord::new(6, addr(0xA0), &[])]).unwrap();
    assert_eq!(index.query(&Query::range(0, 10)).unwrap(), 2);
}

#[test]
fn test_empty_batch_is_noop() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();
    index.insert(&[]).unwrap();
    assert_eq!(index.blocks_count(), 0);
}

#[test]
fn test_bump_height_finalizes_empty_blocks() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    index.bump_height(9).unwrap();
    assert_eq!(index.blocks_count(), 10);
    assert_eq!(index.logs_count(), 0);
    assert_eq!(index.query(&Query::range(0, 9)).unwrap(), 0);

    // Bumping below the tip is a no-op, not an error.
    index.bump_height(3).unwrap();
    assert_eq!(index.blocks_count(), 10);

    // Ingestion continues past the bumped range.
    index.insert(&[LogRecord::new(12, addr(0xA0), &[])]).unwrap();
    assert_eq!(index.blocks_count(), 13);
    assert_eq!(index.query(&Query::range(0, 12)).unwrap(), 1);
}

#[test]
fn test_monotone_counts() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let mut last_blocks = 0;
    let mut last_logs = 0;
    for block in 0..20u64 {
        index.insert(&[LogRecord::new(block * 2, addr((block % 5) as u8), &[])]).unwrap();
        assert!(index.blocks_count() >= last_blocks);
        assert!(index.logs_count() >= last_logs);
        last_blocks = index.blocks_count();
        last_logs = index.logs_count();
    }
}

#[test]
fn test_upstream_hint_persists() {
    let tmp = TempDir::new().unwrap();
    {
        let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();
        assert_eq!(index.upstream(), None);
        index.set_upstream("http://node:8545").unwrap();
        index.close().unwrap();
    }

    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();
    assert_eq!(index.upstream(), Some("http://node:8545".to_string()));

    let oversized = "x".repeat(5000);
    assert!(index.set_upstream(oversized).is_err());
}

#[test]
fn test_status_line() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();
    index.insert(&[LogRecord::new(0, addr(1), &[topic(2)])]).unwrap();

    let status = index.status();
    assert!(status.contains("blocks=1"));
    assert!(status.contains("logs=1"));
    assert!(status.contains("height=0"));
}

#[test]
fn test_snapshot_consistency_under_writes() {
    let tmp = TempDir::new().unwrap();
    let index = LogIndex::open(tmp.path(), 1024 * 1024).unwrap();

    let records: Vec<_> = (0..50u64)
        .map(|block| LogRecord::new(block, addr((block % 3) as u8), &[topic(0x70)]))
        .collect();
    index.insert(&records).unwrap();

    // Queries pinned below the published tip must not move while the writer
    // appends beyond it.
    let frozen = Query::range(0, 49).topic(0, topic(0x70));
    let expected = index.query(&frozen).unwrap();

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for block in 50..500u64 {
                index
                    .insert(&[LogRecord::new(block, addr((block % 3) as u8), &[topic(0x70)])])
                    .unwrap();
            }
        });

        for _ in 0..200 {
            assert_eq!(index.query(&frozen).unwrap(), expected);
        }
        writer.join().unwrap();
    });

    assert_eq!(index.query(&frozen).unwrap(), expected);
    assert_eq!(index.logs_count(), 500);
}

#[test]
fn test_reopen_large_random_corpus() {
    let tmp = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(0x7a11);

    let address_pool: Vec<Address> = (0..40u8).map(addr).collect();
    let topic_pool: Vec<Topic> = (0..60u8).map(topic).collect();

    // 10_000 logs spread over 1_000 blocks, in block order.
    let mut block_numbers: Vec<u64> = (0..10_000).map(|_| rng.gen_range(0..1000u64)).collect();
    block_numbers.sort_unstable();
    let block = *block_numbers.last().unwrap();

    let mut records = Vec::with_capacity(10_000);
    for block_number in block_numbers {
        let address = address_pool[rng.gen_range(0..address_pool.len())];
        let topic_count = rng.gen_range(0..=4usize);
        let topics: Vec<Topic> =
            (0..topic_count).map(|_| topic_pool[rng.gen_range(0..topic_pool.len())]).collect();
        records.push(LogRecord::new(block_number, address, &topics));
    }

    let reference_queries: Vec<Query> = (0..50)
        .map(|_| {
            let from = rng.gen_range(0..=block);
            let mut query = Query::range(from, rng.gen_range(from..=block + 10));
            for _ in 0..rng.gen_range(0..3) {
                query = query.address(address_pool[rng.gen_range(0..address_pool.len())]);
            }
            for position in 0..2 {
                for _ in 0..rng.gen_range(0..3) {
                    query = query.topic(position, topic_pool[rng.gen_range(0..topic_pool.len())]);
                }
            }
            query
        })
        .collect();

    let expected: Vec<u64>;
    {
        let index = LogIndex::open(tmp.path(), 8 * 1024 * 1024).unwrap();
        // Batches may not split a block (end of batch finalizes it), so the
        // chunk boundary extends to the end of the straddled block.
        let mut start = 0;
        while start < records.len() {
            let mut end = (start + 512).min(records.len());
            while end < records.len() && records[end].block_number == records[end - 1].block_number
            {
                end += 1;
            }
            index.insert(&records[start..end]).unwrap();
            start = end;
        }
        index.bump_height(block).unwrap();

        expected = reference_queries
            .iter()
            .map(|query| {
                let count = index.query(query).unwrap();
                assert_eq!(count, brute_force(&records, query), "query {:?}", query);
                count
            })
            .collect();
        index.close().unwrap();
    }

    // Idempotent reopen: identical tip and identical answers.
    let index = LogIndex::open(tmp.path(), 8 * 1024 * 1024).unwrap();
    assert_eq!(index.height(), Some(block));
    assert_eq!(index.logs_count(), 10_000);
    for (query, expected) in reference_queries.iter().zip(&expected) {
        assert_eq!(index.query(query).unwrap(), *expected);
    }
}
