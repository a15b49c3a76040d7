//! # Page Residency Tracking
//!
//! Bounds how much of the mapped data stays resident. A sharded LRU of
//! (region, granule) keys tracks recency; when the budget evicts an entry,
//! the kernel is advised the granule is cold. Counts are advisory — evicting
//! a granule a reader is still touching just costs a page fault on the next
//! access.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use lru::LruCache;
use parking_lot::Mutex;

use tally_core::config::ResidencyConfig;
use tally_core::metrics::IndexMetrics;

use crate::strided::MapRegion;

/// One tracked granule of one mapping.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct GranuleKey {
    region: u64,
    granule: u64,
}

/// Process-wide residency budget, shared by every mapping of an index (and
/// shareable across index instances). Passed around as an explicit context.
#[derive(Debug)]
pub(crate) struct ResidencyTracker {
    shards: Vec<Mutex<LruCache<GranuleKey, Weak<MapRegion>>>>,
    shard_mask: usize,
    granule_bytes: u64,
    metrics: IndexMetrics,
}

impl ResidencyTracker {
    pub(crate) fn new(
        ram_limit_bytes: u64,
        config: &ResidencyConfig,
        metrics: IndexMetrics,
    ) -> Arc<Self> {
        let total_granules = (ram_limit_bytes / config.granule_bytes).max(config.shards as u64);
        let per_shard = (total_granules / config.shards as u64).max(1) as usize;

        let shards = (0..config.shards)
            .map(|_| Mutex::new(LruCache::new(NonZeroUsize::new(per_shard).unwrap())))
            .collect();

        Arc::new(Self {
            shards,
            shard_mask: config.shards - 1,
            granule_bytes: config.granule_bytes,
            metrics,
        })
    }

    /// Record that `len` bytes at `offset` of `region` were accessed.
    pub(crate) fn touch(&self, region: &Arc<MapRegion>, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let first = offset / self.granule_bytes;
        let last = (offset + len - 1) / self.granule_bytes;
        for granule in first..=last {
            self.touch_granule(region, granule);
        }
    }

    fn touch_granule(&self, region: &Arc<MapRegion>, granule: u64) {
        let key = GranuleKey { region: region.id(), granule };

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = &self.shards[(hasher.finish() as usize) & self.shard_mask];

        let evicted = {
            let mut lru = shard.lock();
            lru.push(key.clone(), Arc::downgrade(region))
        };

        // push returns the displaced entry: either the old value under the
        // same key (a plain refresh) or the LRU victim.
        if let Some((victim, weak)) = evicted {
            if victim != key {
                self.metrics.record_page_eviction();
                if let Some(victim_region) = weak.upgrade() {
                    victim_region.advise_cold(
                        (victim.granule * self.granule_bytes) as usize,
                        self.granule_bytes as usize,
                    );
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_granules(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strided::StridedFile;
    use tempfile::TempDir;

    #[test]
    fn test_budget_bounds_tracked_set() {
        let config = ResidencyConfig { granule_bytes: 4096, shards: 1 };
        let metrics = IndexMetrics::new();
        // Budget of 4 granules.
        let tracker = ResidencyTracker::new(4 * 4096, &config, metrics.clone());

        let tmp = TempDir::new().unwrap();
        let file = StridedFile::open(tmp.path().join("cells"), 8, tracker.clone()).unwrap();
        for i in 0..4096 {
            file.set_u64(i, i).unwrap();
        }
        file.publish(4096);

        let snap = file.snapshot();
        snap.touch(0, 4096); // 32 KiB of cells across 8+ granules

        assert!(tracker.tracked_granules() <= 4);
        assert!(metrics.snapshot().pages_evicted > 0);

        // The advised-out granules still read back correctly.
        assert_eq!(snap.get_u64(0), Some(0));
        assert_eq!(snap.get_u64(4095), Some(4095));
    }
}
