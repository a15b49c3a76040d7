//! # Property Tests
//!
//! Randomized laws over small corpora:
//! - Completeness: the index count always equals a brute-force replay.
//! - Normalization: a topic position holding only nulls behaves exactly like
//!   an omitted position.
//! - Limit: a limited count is the unlimited count clamped.

use proptest::prelude::*;
use tempfile::TempDir;

use tally_index::{Address, LogIndex, LogRecord, Query, Topic};

fn addr(seed: u8) -> Address {
    Address([seed; 20])
}

fn topic(seed: u8) -> Topic {
    Topic([seed; 32])
}

fn brute_force(records: &[LogRecord], query: &Query) -> u64 {
    records
        .iter()
        .filter(|r| r.block_number >= query.from_block && r.block_number <= query.to_block)
        .filter(|r| query.addresses.is_empty() || query.addresses.contains(&r.address))
        .filter(|r| {
            query.topics.iter().enumerate().all(|(position, values)| {
                let concrete: Vec<&Topic> = values.iter().flatten().collect();
                if values.is_empty() || concrete.is_empty() {
                    return true;
                }
                match &r.topics[position] {
                    Some(t) => concrete.contains(&t),
                    None => false,
                }
            })
        })
        .count() as u64
}

fn build_index(dir: &std::path::Path, raw: &[(u64, u8, Vec<u8>)]) -> (LogIndex, Vec<LogRecord>) {
    let mut records: Vec<LogRecord> = raw
        .iter()
        .map(|(block, address, topics)| {
            let topics: Vec<Topic> = topics.iter().map(|t| topic(*t)).collect();
            LogRecord::new(*block, addr(*address), &topics)
        })
        .collect();
    records.sort_by_key(|r| r.block_number);

    let index = LogIndex::open(dir, 2 * 1024 * 1024).unwrap();
    index.insert(&records).unwrap();
    (index, records)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_counts_match_brute_force(
        raw in proptest::collection::vec(
            (0u64..60, 0u8..6, proptest::collection::vec(0u8..8, 0..4)),
            1..120,
        ),
        queries in proptest::collection::vec(
            (
                0u64..70,
                0u64..70,
                proptest::collection::vec(0u8..8, 0..3),   // addresses, some unknown
                proptest::collection::vec(0u8..10, 0..3),  // topics[0], some unknown
                proptest::collection::vec(0u8..10, 0..2),  // topics[1]
            ),
            1..6,
        ),
    ) {
        let tmp = TempDir::new().unwrap();
        let (index, records) = build_index(tmp.path(), &raw);

        for (a, b, addresses, topics0, topics1) in queries {
            let mut query = Query::range(a.min(b), a.max(b));
            for address in addresses {
                query = query.address(addr(address));
            }
            for t in topics0 {
                query = query.topic(0, topic(t));
            }
            for t in topics1 {
                query = query.topic(1, topic(t));
            }

            prop_assert_eq!(index.query(&query).unwrap(), brute_force(&records, &query));
        }
    }

    #[test]
    fn prop_null_only_position_equals_omitted(
        raw in proptest::collection::vec(
            (0u64..30, 0u8..4, proptest::collection::vec(0u8..6, 0..3)),
            1..60,
        ),
        position in 0usize..4,
    ) {
        let tmp = TempDir::new().unwrap();
        let (index, _records) = build_index(tmp.path(), &raw);

        let plain = Query::range(0, 40);
        let nulled = Query::range(0, 40).null_topic(position);
        prop_assert_eq!(index.query(&plain).unwrap(), index.query(&nulled).unwrap());
    }

    #[test]
    fn prop_limit_clamps_exact_count(
        raw in proptest::collection::vec(
            (0u64..30, 0u8..4, proptest::collection::vec(0u8..6, 0..3)),
            1..60,
        ),
        limit in 0u64..80,
        filtered in proptest::bool::ANY,
    ) {
        let tmp = TempDir::new().unwrap();
        let (index, _records) = build_index(tmp.path(), &raw);

        let mut query = Query::range(0, 40);
        if filtered {
            query = query.address(addr(1)).address(addr(2));
        }
        let exact = index.query(&query).unwrap();
        let limited = index.query(&query.clone().limit(limit)).unwrap();
        prop_assert_eq!(limited, exact.min(limit));
    }
}
