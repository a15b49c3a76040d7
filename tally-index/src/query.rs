//! # Query Evaluation
//!
//! Counting proceeds in three stages:
//!
//! 1. **Preparation** — filter values resolve through the dictionaries into
//!    candidate id sets. A non-empty position whose values all miss the
//!    dictionary can match nothing: the query short-circuits to zero without
//!    touching a block.
//! 2. **Bloom prefilter** — a block survives only if, for every constrained
//!    position, at least one candidate id is possibly present in its bloom.
//! 3. **Row scan** — surviving blocks have their row range scanned against
//!    the id sets; the count short-circuits at `limit`.
//!
//! The whole evaluation runs against one snapshot: the published block count
//! loaded up front. Writer activity after that load is invisible.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tally_core::config::BloomConfig;
use tally_core::error::{Error, Result};
use tally_core::types::{Query, TOPIC_POSITIONS};

use crate::bloom;
use crate::index::LogIndex;

/// Candidate ids for one filter position. Small sets stay inline and are
/// probed linearly; larger ones hash.
pub(crate) enum IdSet {
    Small(Vec<u64>),
    Hashed(HashSet<u64>),
}

const SMALL_SET_MAX: usize = 8;

impl IdSet {
    pub(crate) fn new(mut ids: Vec<u64>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        if ids.len() <= SMALL_SET_MAX {
            IdSet::Small(ids)
        } else {
            IdSet::Hashed(ids.into_iter().collect())
        }
    }

    #[inline]
    pub(crate) fn contains(&self, id: u64) -> bool {
        match self {
            IdSet::Small(ids) => ids.contains(&id),
            IdSet::Hashed(ids) => ids.contains(&id),
        }
    }

    /// At least one candidate is possibly present in the block's bloom.
    fn any_in_bloom(&self, bits: &[u8], config: &BloomConfig) -> bool {
        match self {
            IdSet::Small(ids) => ids.iter().any(|&id| bloom::may_contain(bits, config, id)),
            IdSet::Hashed(ids) => ids.iter().any(|&id| bloom::may_contain(bits, config, id)),
        }
    }
}

/// A query with every filter value resolved to ids. `None` positions are
/// wildcards.
struct Prepared {
    addresses: Option<IdSet>,
    topics: [Option<IdSet>; TOPIC_POSITIONS],
}

impl Prepared {
    fn is_unfiltered(&self) -> bool {
        self.addresses.is_none() && self.topics.iter().all(Option::is_none)
    }

    fn passes_bloom(&self, bits: &[u8], config: &BloomConfig) -> bool {
        if let Some(addresses) = &self.addresses {
            if !addresses.any_in_bloom(bits, config) {
                return false;
            }
        }
        self.topics
            .iter()
            .flatten()
            .all(|set| set.any_in_bloom(bits, config))
    }
}

impl LogIndex {
    /// Count the logs matching `query`. See the module docs for the plan.
    pub fn query(&self, query: &Query) -> Result<u64> {
        let cancel = AtomicBool::new(false);
        self.query_with_cancel(query, &cancel)
    }

    /// Like [`LogIndex::query`], checking `cancel` between blocks. A
    /// cancelled query returns the count accumulated so far — the caller set
    /// the flag and knows the number is partial.
    pub fn query_with_cancel(&self, query: &Query, cancel: &AtomicBool) -> Result<u64> {
        self.metrics_handle().record_query();

        if query.from_block > query.to_block {
            return Err(Error::InvalidQuery {
                message: format!(
                    "from_block {} after to_block {}",
                    query.from_block, query.to_block
                ),
            });
        }

        // The snapshot point: everything at or past this count is invisible
        // to this query, whatever the writer does meanwhile.
        let published_blocks = self.blocks_count.load(Ordering::Acquire);
        if published_blocks == 0 || query.from_block >= published_blocks {
            return Ok(0);
        }
        let to_block = query.to_block.min(published_blocks - 1);

        let limit = query.limit.unwrap_or(u64::MAX);
        if limit == 0 {
            return Ok(0);
        }

        let Some(prepared) = self.prepare(query) else {
            // Some filter position cannot match any interned value.
            self.metrics_handle().record_short_circuit();
            return Ok(0);
        };
        let unfiltered = prepared.is_unfiltered();

        let blocks = self.blocks.snapshot();
        let columns = self.columns.snapshot();
        let needs_addr = prepared.addresses.is_some();
        let needs_topic: [bool; TOPIC_POSITIONS] = {
            let mut needs = [false; TOPIC_POSITIONS];
            for (position, set) in prepared.topics.iter().enumerate() {
                needs[position] = set.is_some();
            }
            needs
        };

        let mut count: u64 = 0;
        let mut blocks_scanned: u64 = 0;
        let mut blocks_pruned: u64 = 0;
        let mut rows_scanned: u64 = 0;

        'blocks: for block in query.from_block..=to_block {
            if cancel.load(Ordering::Relaxed) {
                break;
            }

            let Some(summary) = blocks.summary(block) else { break };
            if summary.logs_count == 0 {
                continue;
            }

            if unfiltered {
                count = count.saturating_add(summary.logs_count as u64);
                if count >= limit {
                    count = limit;
                    break;
                }
                continue;
            }

            let possible = blocks
                .with_bloom(block, |bits, config| prepared.passes_bloom(bits, config))
                .unwrap_or(true);
            if !possible {
                blocks_pruned += 1;
                continue;
            }

            blocks_scanned += 1;
            columns.touch(summary.logs_start, summary.logs_count as u64, needs_addr, needs_topic);

            'rows: for row in summary.logs_start..summary.logs_end() {
                rows_scanned += 1;

                if let Some(addresses) = &prepared.addresses {
                    if !addresses.contains(columns.address_id(row).unwrap_or(0)) {
                        continue 'rows;
                    }
                }
                for (position, set) in prepared.topics.iter().enumerate() {
                    if let Some(set) = set {
                        if !set.contains(columns.topic_id(position, row).unwrap_or(0)) {
                            continue 'rows;
                        }
                    }
                }

                count += 1;
                if count >= limit {
                    break 'blocks;
                }
            }
        }

        self.metrics_handle().record_scan(blocks_scanned, blocks_pruned, rows_scanned);
        Ok(count)
    }

    /// Resolve filter values to candidate id sets. `None` means some
    /// position is unsatisfiable. Normalization first: null topic entries
    /// drop out of their position, and a position left with nothing but
    /// nulls becomes a wildcard. Values unknown to the dictionary drop out
    /// of their union; a constrained position whose union resolves empty can
    /// match no row.
    fn prepare(&self, query: &Query) -> Option<Prepared> {
        let addresses = if query.addresses.is_empty() {
            None
        } else {
            let ids: Vec<u64> = query
                .addresses
                .iter()
                .filter_map(|address| self.addr_dict.lookup(address.as_bytes()))
                .collect();
            if ids.is_empty() {
                return None;
            }
            Some(IdSet::new(ids))
        };

        let mut topics: [Option<IdSet>; TOPIC_POSITIONS] = Default::default();
        for (position, values) in query.topics.iter().enumerate() {
            if values.is_empty() {
                continue;
            }
            let concrete: Vec<_> = values.iter().flatten().collect();
            if concrete.is_empty() {
                // Only nulls: equivalent to omitting the position.
                continue;
            }
            let ids: Vec<u64> = concrete
                .iter()
                .filter_map(|topic| self.topic_dict.lookup(topic.as_bytes()))
                .collect();
            if ids.is_empty() {
                return None;
            }
            topics[position] = Some(IdSet::new(ids));
        }

        Some(Prepared { addresses, topics })
    }
}
