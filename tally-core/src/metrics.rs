//! # Metrics
//!
//! In-process counters for monitoring an index instance. Exposition (HTTP,
//! Prometheus, …) is the embedder's business; the index only counts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default, Debug)]
pub struct IndexMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default, Debug)]
struct MetricsInner {
    // Write metrics
    batches_ingested: AtomicU64,
    logs_ingested: AtomicU64,
    blocks_finalized: AtomicU64,
    dict_rehashes: AtomicU64,

    // Query metrics
    queries: AtomicU64,
    queries_short_circuited: AtomicU64,
    blocks_scanned: AtomicU64,
    blocks_pruned_by_bloom: AtomicU64,
    rows_scanned: AtomicU64,

    // Resource metrics
    pages_evicted: AtomicU64,
    reopen_truncations: AtomicU64,
}

impl IndexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, logs: u64, blocks: u64) {
        self.inner.batches_ingested.fetch_add(1, Ordering::Relaxed);
        self.inner.logs_ingested.fetch_add(logs, Ordering::Relaxed);
        self.inner.blocks_finalized.fetch_add(blocks, Ordering::Relaxed);
    }

    pub fn record_rehash(&self) {
        self.inner.dict_rehashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.inner.queries.fetch_add(1, Ordering::Relaxed);
    }

    /// A query answered without any block scan (unsatisfiable filter).
    pub fn record_short_circuit(&self) {
        self.inner.queries_short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self, blocks_scanned: u64, blocks_pruned: u64, rows_scanned: u64) {
        self.inner.blocks_scanned.fetch_add(blocks_scanned, Ordering::Relaxed);
        self.inner.blocks_pruned_by_bloom.fetch_add(blocks_pruned, Ordering::Relaxed);
        self.inner.rows_scanned.fetch_add(rows_scanned, Ordering::Relaxed);
    }

    pub fn record_page_eviction(&self) {
        self.inner.pages_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reopen_truncation(&self) {
        self.inner.reopen_truncations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_ingested: self.inner.batches_ingested.load(Ordering::Relaxed),
            logs_ingested: self.inner.logs_ingested.load(Ordering::Relaxed),
            blocks_finalized: self.inner.blocks_finalized.load(Ordering::Relaxed),
            dict_rehashes: self.inner.dict_rehashes.load(Ordering::Relaxed),
            queries: self.inner.queries.load(Ordering::Relaxed),
            queries_short_circuited: self.inner.queries_short_circuited.load(Ordering::Relaxed),
            blocks_scanned: self.inner.blocks_scanned.load(Ordering::Relaxed),
            blocks_pruned_by_bloom: self.inner.blocks_pruned_by_bloom.load(Ordering::Relaxed),
            rows_scanned: self.inner.rows_scanned.load(Ordering::Relaxed),
            pages_evicted: self.inner.pages_evicted.load(Ordering::Relaxed),
            reopen_truncations: self.inner.reopen_truncations.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub batches_ingested: u64,
    pub logs_ingested: u64,
    pub blocks_finalized: u64,
    pub dict_rehashes: u64,
    pub queries: u64,
    pub queries_short_circuited: u64,
    pub blocks_scanned: u64,
    pub blocks_pruned_by_bloom: u64,
    pub rows_scanned: u64,
    pub pages_evicted: u64,
    pub reopen_truncations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = IndexMetrics::new();
        metrics.record_batch(10, 2);
        metrics.record_batch(5, 1);
        metrics.record_query();
        metrics.record_scan(4, 2, 100);

        let snap = metrics.snapshot();
        assert_eq!(snap.batches_ingested, 2);
        assert_eq!(snap.logs_ingested, 15);
        assert_eq!(snap.blocks_finalized, 3);
        assert_eq!(snap.queries, 1);
        assert_eq!(snap.blocks_pruned_by_bloom, 2);
        assert_eq!(snap.rows_scanned, 100);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = IndexMetrics::new();
        let clone = metrics.clone();
        clone.record_query();
        assert_eq!(metrics.snapshot().queries, 1);
    }
}
