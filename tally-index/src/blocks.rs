//! # Block Index
//!
//! Dense per-block summaries and blooms, both indexed by block number. The
//! summary records where the block's rows live in the log columns; the bloom
//! prunes blocks before any row is touched.

use std::path::Path;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use tally_core::config::BloomConfig;
use tally_core::error::Result;

use crate::layout::{BLOCK_BLOOM_FILE, BLOCK_INDEX_FILE, SUMMARY_BYTES};
use crate::residency::ResidencyTracker;
use crate::strided::{Snapshot, StridedFile};

/// Where a block's rows live: `logs_count` rows starting at global row index
/// `logs_start`. Stored as `(logs_count: u32, pad: u32, logs_start: u64)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockSummary {
    pub logs_count: u32,
    pub logs_start: u64,
}

impl BlockSummary {
    fn decode(bytes: &[u8]) -> Self {
        Self {
            logs_count: LittleEndian::read_u32(&bytes[0..4]),
            logs_start: LittleEndian::read_u64(&bytes[8..16]),
        }
    }

    fn encode(&self) -> [u8; SUMMARY_BYTES] {
        let mut bytes = [0u8; SUMMARY_BYTES];
        LittleEndian::write_u32(&mut bytes[0..4], self.logs_count);
        LittleEndian::write_u64(&mut bytes[8..16], self.logs_start);
        bytes
    }

    /// Global row index one past this block's last row.
    pub(crate) fn logs_end(&self) -> u64 {
        self.logs_start + self.logs_count as u64
    }
}

#[derive(Debug)]
pub(crate) struct BlockIndex {
    summaries: StridedFile,
    blooms: StridedFile,
    bloom_config: BloomConfig,
    empty_bloom: Vec<u8>,
}

impl BlockIndex {
    pub(crate) fn open(
        dir: &Path,
        bloom_config: BloomConfig,
        residency: Arc<ResidencyTracker>,
    ) -> Result<Self> {
        let summaries =
            StridedFile::open(dir.join(BLOCK_INDEX_FILE), SUMMARY_BYTES, residency.clone())?;
        let blooms =
            StridedFile::open(dir.join(BLOCK_BLOOM_FILE), bloom_config.filter_bytes(), residency)?;
        Ok(Self {
            summaries,
            blooms,
            bloom_config,
            empty_bloom: vec![0u8; bloom_config.filter_bytes()],
        })
    }

    pub(crate) fn bloom_config(&self) -> BloomConfig {
        self.bloom_config
    }

    /// Finalized blocks visible to readers.
    pub(crate) fn published_blocks(&self) -> u64 {
        self.summaries.len()
    }

    pub(crate) fn snapshot(&self) -> BlockSnapshot {
        BlockSnapshot {
            summaries: self.summaries.snapshot(),
            blooms: self.blooms.snapshot(),
            config: self.bloom_config,
        }
    }

    /// Writer-side: stage the summary and bloom for `block` (the current
    /// append cursor). `bloom: None` stores the empty filter (zero-log
    /// blocks). Invisible until `publish`.
    pub(crate) fn append(
        &self,
        block: u64,
        summary: BlockSummary,
        bloom: Option<&[u8]>,
    ) -> Result<()> {
        self.summaries.set_element(block, &summary.encode())?;
        self.blooms.set_element(block, bloom.unwrap_or(&self.empty_bloom))
    }

    pub(crate) fn publish(&self, blocks: u64) {
        self.summaries.publish(blocks);
        self.blooms.publish(blocks);
    }

    pub(crate) fn restore(&self, blocks: u64) {
        self.summaries.restore_len(blocks);
        self.blooms.restore_len(blocks);
    }

    /// Blocks both files durably hold at open time (recovery bound).
    pub(crate) fn committed_blocks(&self) -> u64 {
        self.summaries.len().min(self.blooms.len())
    }

    /// Recovery: read a summary without regard to the published length.
    pub(crate) fn read_unpublished_summary(&self, block: u64) -> Option<BlockSummary> {
        let mut bytes = [0u8; SUMMARY_BYTES];
        if !self.summaries.read_unpublished(block, &mut bytes) {
            return None;
        }
        Some(BlockSummary::decode(&bytes))
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.summaries.flush()?;
        self.blooms.flush()
    }
}

/// Reader-side view pinned to one publication point.
pub(crate) struct BlockSnapshot {
    summaries: Snapshot,
    blooms: Snapshot,
    config: BloomConfig,
}

impl BlockSnapshot {
    pub(crate) fn summary(&self, block: u64) -> Option<BlockSummary> {
        self.summaries.with_slice(block, BlockSummary::decode)
    }

    /// Run `f` over the block's bloom bits.
    pub(crate) fn with_bloom<R>(&self, block: u64, f: impl FnOnce(&[u8], &BloomConfig) -> R) -> Option<R> {
        self.blooms.touch(block, 1);
        self.blooms.with_slice(block, |bits| f(bits, &self.config))
    }
}
