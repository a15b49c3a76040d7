//! # The Embedded Index
//!
//! `LogIndex` ties the pieces together: dictionaries, block index, log
//! columns, the meta file and the residency budget.
//!
//! ## Write path
//!
//! ```text
//! insert(batch) ──> intern ids ──> append rows ──> finalize blooms
//!                                                      │
//!                                   publish ◄──────────┘
//!                  (column lens, block lens, counters — release order)
//! ```
//!
//! One writer at a time, serialized by the writer mutex. Readers never take
//! it: they acquire-load the published counters and see a consistent
//! snapshot. A failed batch publishes nothing; its staged bytes are
//! overwritten by the next batch.
//!
//! ## Durability
//!
//! `flush` msyncs data files first, then rewrites the meta file. Reopen
//! clamps every file to the meta counters and truncates torn tails back to
//! the last consistent block boundary (§ recovery in `open_with_config`).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use tally_core::config::IndexConfig;
use tally_core::error::{Error, Result};
use tally_core::metrics::{IndexMetrics, MetricsSnapshot};
use tally_core::types::{LogRecord, TOPIC_POSITIONS};
use tally_core::utils::format_bytes;

use crate::blocks::{BlockIndex, BlockSummary};
use crate::bloom::BloomBuilder;
use crate::columns::LogColumns;
use crate::dict::Dictionary;
use crate::layout::{
    ADDRESS_KEY_BYTES, ADDR_KEYS_FILE, ADDR_TABLE_FILE, META_FILE, TMP_SUFFIX,
    TOPIC_KEYS_FILE, TOPIC_KEY_BYTES, TOPIC_TABLE_FILE,
};
use crate::meta::{Meta, UPSTREAM_LIMIT};
use crate::residency::ResidencyTracker;

/// Writer-local scratch, guarded by the writer mutex.
#[derive(Debug)]
struct WriterState {
    bloom: BloomBuilder,
}

/// An embedded columnar log index over one data directory.
///
/// Shared across threads by reference: one concurrent writer (ingestion,
/// height bumps) and any number of readers (queries, introspection).
#[derive(Debug)]
pub struct LogIndex {
    dir: PathBuf,
    config: IndexConfig,
    metrics: IndexMetrics,

    pub(crate) addr_dict: Dictionary,
    pub(crate) topic_dict: Dictionary,
    pub(crate) blocks: BlockIndex,
    pub(crate) columns: LogColumns,

    /// Published counters; `blocks_count - 1` is the max indexed block.
    pub(crate) blocks_count: AtomicU64,
    pub(crate) logs_count: AtomicU64,

    upstream: RwLock<Option<String>>,
    writer: Mutex<WriterState>,
}

impl LogIndex {
    /// Open (or create) an index under `dir` with the given RAM budget for
    /// resident pages.
    pub fn open(dir: impl AsRef<Path>, ram_limit_bytes: u64) -> Result<Self> {
        Self::open_with_config(dir, IndexConfig::with_ram_limit(ram_limit_bytes))
    }

    pub fn open_with_config(dir: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
        remove_stale_tmp_files(&dir);

        let meta = Meta::load(&dir.join(META_FILE))?;
        let bloom_config = match &meta {
            Some(meta) => {
                if meta.bloom != config.bloom {
                    warn!(
                        on_disk = ?meta.bloom,
                        requested = ?config.bloom,
                        "bloom geometry is fixed at creation; using on-disk geometry"
                    );
                }
                meta.bloom
            }
            None => config.bloom,
        };

        let metrics = IndexMetrics::new();
        let residency =
            ResidencyTracker::new(config.ram_limit_bytes, &config.residency, metrics.clone());

        let addr_dict = Dictionary::open(
            &dir,
            "addr",
            ADDR_KEYS_FILE,
            ADDR_TABLE_FILE,
            ADDRESS_KEY_BYTES,
            residency.clone(),
            metrics.clone(),
        )?;
        let topic_dict = Dictionary::open(
            &dir,
            "topic",
            TOPIC_KEYS_FILE,
            TOPIC_TABLE_FILE,
            TOPIC_KEY_BYTES,
            residency.clone(),
            metrics.clone(),
        )?;
        let blocks = BlockIndex::open(&dir, bloom_config, residency.clone())?;
        let columns = LogColumns::open(&dir, residency)?;

        let index = Self {
            dir,
            writer: Mutex::new(WriterState { bloom: BloomBuilder::new(bloom_config) }),
            config,
            metrics,
            addr_dict,
            topic_dict,
            blocks,
            columns,
            blocks_count: AtomicU64::new(0),
            logs_count: AtomicU64::new(0),
            upstream: RwLock::new(None),
        };

        match meta {
            Some(meta) => index.recover(meta)?,
            None => {
                index.blocks.restore(0);
                index.columns.restore(0);
                index.write_meta()?;
                info!(dir = %index.dir.display(), "created empty index");
            }
        }

        Ok(index)
    }

    /// Reconcile on-disk state with the meta counters, truncating any torn
    /// tail back to the last block boundary the physical files fully cover.
    fn recover(&self, meta: Meta) -> Result<()> {
        self.addr_dict.restore_next_id(meta.addr_next_id);
        self.topic_dict.restore_next_id(meta.topic_next_id);

        let rows_cap = meta.logs_count.min(self.columns.committed_rows());
        let mut blocks = meta.blocks_count.min(self.blocks.committed_blocks());
        let rows = loop {
            if blocks == 0 {
                break 0;
            }
            match self.blocks.read_unpublished_summary(blocks - 1) {
                Some(summary) if summary.logs_end() <= rows_cap => break summary.logs_end(),
                _ => blocks -= 1,
            }
        };

        self.blocks.restore(blocks);
        self.columns.restore(rows);
        self.blocks_count.store(blocks, Ordering::Release);
        self.logs_count.store(rows, Ordering::Release);
        *self.upstream.write() = meta.upstream.clone();

        if blocks != meta.blocks_count || rows != meta.logs_count {
            warn!(
                meta_blocks = meta.blocks_count,
                meta_logs = meta.logs_count,
                blocks,
                logs = rows,
                "truncated torn tail on reopen"
            );
            self.metrics.record_reopen_truncation();
            self.write_meta()?;
        }

        info!(
            dir = %self.dir.display(),
            blocks,
            logs = rows,
            addr_ids = self.addr_dict.entries(),
            topic_ids = self.topic_dict.entries(),
            "opened index"
        );
        Ok(())
    }

    /// Ingest a batch of logs, strictly in block order, targeting only
    /// heights at or above the current tip's successor. The batch becomes
    /// visible atomically; on error nothing is published.
    pub fn insert(&self, batch: &[LogRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock();
        let published_blocks = self.blocks_count.load(Ordering::Relaxed);
        let published_rows = self.logs_count.load(Ordering::Relaxed);

        // Validate the whole batch before staging a single byte.
        let mut previous = None;
        for record in batch {
            if record.block_number < published_blocks {
                return Err(Error::InvariantViolation {
                    message: format!(
                        "batch targets finalized block {} (tip is {})",
                        record.block_number,
                        published_blocks - 1
                    ),
                });
            }
            if let Some(previous) = previous {
                if record.block_number < previous {
                    return Err(Error::InvariantViolation {
                        message: format!(
                            "batch out of order: block {} after {}",
                            record.block_number, previous
                        ),
                    });
                }
            }
            previous = Some(record.block_number);
        }

        let mut blocks = published_blocks;
        let mut rows = published_rows;

        let mut current_block = batch[0].block_number;
        self.backfill_empty(&mut blocks, current_block, rows)?;
        let mut block_start = rows;
        let mut block_rows: u64 = 0;
        writer.bloom.reset();

        for record in batch {
            if record.block_number != current_block {
                self.finalize_block(current_block, block_start, block_rows, &writer.bloom)?;
                blocks = current_block + 1;
                self.backfill_empty(&mut blocks, record.block_number, rows)?;

                current_block = record.block_number;
                block_start = rows;
                block_rows = 0;
                writer.bloom.reset();
            }

            let address_id = self.addr_dict.intern(record.address.as_bytes())?;
            let mut topic_ids = [0u64; TOPIC_POSITIONS];
            for (position, topic) in record.topics.iter().enumerate() {
                if let Some(topic) = topic {
                    topic_ids[position] = self.topic_dict.intern(topic.as_bytes())?;
                }
            }

            self.columns.append_row(rows, address_id, topic_ids)?;
            writer.bloom.add(address_id);
            for topic_id in topic_ids {
                writer.bloom.add(topic_id);
            }
            rows += 1;
            block_rows += 1;
        }

        self.finalize_block(current_block, block_start, block_rows, &writer.bloom)?;
        blocks = current_block + 1;

        // Publication: column lengths, then block lengths, then counters.
        self.columns.publish(rows);
        self.blocks.publish(blocks);
        self.logs_count.store(rows, Ordering::Release);
        self.blocks_count.store(blocks, Ordering::Release);

        self.metrics.record_batch(rows - published_rows, blocks - published_blocks);
        debug!(
            logs = rows - published_rows,
            blocks = blocks - published_blocks,
            tip = blocks - 1,
            "ingested batch"
        );
        Ok(())
    }

    /// Record that every block up to and including `height` is fully
    /// ingested, finalizing any not-yet-seen heights as empty.
    pub fn bump_height(&self, height: u64) -> Result<()> {
        if height == u64::MAX {
            return Err(Error::InvariantViolation {
                message: "height out of range".into(),
            });
        }
        let _writer = self.writer.lock();
        let published_blocks = self.blocks_count.load(Ordering::Relaxed);
        if height < published_blocks {
            return Ok(());
        }

        let rows = self.logs_count.load(Ordering::Relaxed);
        let mut blocks = published_blocks;
        self.backfill_empty(&mut blocks, height + 1, rows)?;

        self.blocks.publish(blocks);
        self.blocks_count.store(blocks, Ordering::Release);
        self.metrics.record_batch(0, blocks - published_blocks);
        debug!(tip = blocks - 1, "bumped height");
        Ok(())
    }

    /// Stage zero-count summaries for `*blocks .. until`, leaving the cursor
    /// at `until`.
    fn backfill_empty(&self, blocks: &mut u64, until: u64, rows: u64) -> Result<()> {
        while *blocks < until {
            self.blocks.append(
                *blocks,
                BlockSummary { logs_count: 0, logs_start: rows },
                None,
            )?;
            *blocks += 1;
        }
        Ok(())
    }

    fn finalize_block(
        &self,
        block: u64,
        block_start: u64,
        block_rows: u64,
        bloom: &BloomBuilder,
    ) -> Result<()> {
        if block_rows > u32::MAX as u64 {
            return Err(Error::InvariantViolation {
                message: format!("block {} exceeds {} logs", block, u32::MAX),
            });
        }
        self.blocks.append(
            block,
            BlockSummary { logs_count: block_rows as u32, logs_start: block_start },
            Some(bloom.as_bytes()),
        )
    }

    /// Record an upstream RPC endpoint for the embedder's backfill worker.
    /// An opaque hint: the index itself never performs network I/O.
    pub fn set_upstream(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        if url.len() > UPSTREAM_LIMIT {
            return Err(Error::Configuration {
                message: format!("upstream hint exceeds {} bytes", UPSTREAM_LIMIT),
            });
        }

        let _writer = self.writer.lock();
        *self.upstream.write() = Some(url);
        self.flush_locked()
    }

    pub fn upstream(&self) -> Option<String> {
        self.upstream.read().clone()
    }

    /// Published row count.
    pub fn logs_count(&self) -> u64 {
        self.logs_count.load(Ordering::Acquire)
    }

    /// Published block count (summaries exist for every height below it).
    pub fn blocks_count(&self) -> u64 {
        self.blocks_count.load(Ordering::Acquire)
    }

    /// Max indexed block, if any block has been finalized.
    pub fn height(&self) -> Option<u64> {
        match self.blocks_count() {
            0 => None,
            count => Some(count - 1),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub(crate) fn metrics_handle(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// One-line human-readable summary.
    pub fn status(&self) -> String {
        format!(
            "blocks={} logs={} height={} addr_ids={} topic_ids={} ram_limit={}",
            self.blocks_count(),
            self.logs_count(),
            self.height().map(|h| h.to_string()).unwrap_or_else(|| "-".into()),
            self.addr_dict.entries(),
            self.topic_dict.entries(),
            format_bytes(self.config.ram_limit_bytes),
        )
    }

    /// Push all published state to disk: data files first, meta last.
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<()> {
        self.columns.flush()?;
        self.blocks.flush()?;
        self.addr_dict.flush()?;
        self.topic_dict.flush()?;
        self.write_meta()
    }

    /// Flush and release the index.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!(dir = %self.dir.display(), "closed index");
        Ok(())
    }

    /// Meta rewrite from the published counters. Callers hold the writer
    /// lock (or are mid-open, before the index is shared).
    fn write_meta(&self) -> Result<()> {
        let meta = Meta {
            bloom: self.blocks.bloom_config(),
            blocks_count: self.blocks_count.load(Ordering::Acquire),
            logs_count: self.logs_count.load(Ordering::Acquire),
            addr_next_id: self.addr_dict.next_id(),
            topic_next_id: self.topic_dict.next_id(),
            upstream: self.upstream.read().clone(),
        };
        meta.store(&self.dir.join(META_FILE))
    }
}

/// Leftovers from an interrupted rehash or meta rewrite.
fn remove_stale_tmp_files(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == TMP_SUFFIX.trim_start_matches('.')) {
            warn!(file = %path.display(), "removing stale temp file");
            let _ = std::fs::remove_file(&path);
        }
    }
}
