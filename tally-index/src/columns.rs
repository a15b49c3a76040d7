//! # Log Columns
//!
//! Five parallel stride-8 files, one row per log: the interned address id and
//! the four topic-position ids (0 = absent). Row `r` of a block with summary
//! `s` lives at global row index `s.logs_start + k`.

use std::path::Path;
use std::sync::Arc;

use tally_core::error::Result;
use tally_core::types::TOPIC_POSITIONS;

use crate::layout::{ID_CELL_BYTES, LOG_ADDR_FILE, LOG_TOPIC_FILES};
use crate::residency::ResidencyTracker;
use crate::strided::{Snapshot, StridedFile};

#[derive(Debug)]
pub(crate) struct LogColumns {
    addr: StridedFile,
    topics: [StridedFile; TOPIC_POSITIONS],
}

impl LogColumns {
    pub(crate) fn open(dir: &Path, residency: Arc<ResidencyTracker>) -> Result<Self> {
        let open = |name: &str| {
            StridedFile::open(dir.join(name), ID_CELL_BYTES, residency.clone())
        };
        Ok(Self {
            addr: open(LOG_ADDR_FILE)?,
            topics: [
                open(LOG_TOPIC_FILES[0])?,
                open(LOG_TOPIC_FILES[1])?,
                open(LOG_TOPIC_FILES[2])?,
                open(LOG_TOPIC_FILES[3])?,
            ],
        })
    }

    /// Rows visible to readers.
    pub(crate) fn published_rows(&self) -> u64 {
        self.addr.len()
    }

    /// Writer-side: stage one row at global index `row`. Invisible until
    /// `publish`.
    pub(crate) fn append_row(&self, row: u64, address_id: u64, topic_ids: [u64; TOPIC_POSITIONS]) -> Result<()> {
        self.addr.set_u64(row, address_id)?;
        for (file, id) in self.topics.iter().zip(topic_ids) {
            file.set_u64(row, id)?;
        }
        Ok(())
    }

    pub(crate) fn publish(&self, rows: u64) {
        self.addr.publish(rows);
        for file in &self.topics {
            file.publish(rows);
        }
    }

    pub(crate) fn restore(&self, rows: u64) {
        self.addr.restore_len(rows);
        for file in &self.topics {
            file.restore_len(rows);
        }
    }

    /// Rows every column file durably holds at open time (recovery bound).
    pub(crate) fn committed_rows(&self) -> u64 {
        self.topics
            .iter()
            .map(StridedFile::len)
            .fold(self.addr.len(), u64::min)
    }

    pub(crate) fn snapshot(&self) -> ColumnsSnapshot {
        ColumnsSnapshot {
            addr: self.addr.snapshot(),
            topics: [
                self.topics[0].snapshot(),
                self.topics[1].snapshot(),
                self.topics[2].snapshot(),
                self.topics[3].snapshot(),
            ],
        }
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.addr.flush()?;
        for file in &self.topics {
            file.flush()?;
        }
        Ok(())
    }
}

/// Reader-side view pinned to one publication point.
pub(crate) struct ColumnsSnapshot {
    addr: Snapshot,
    topics: [Snapshot; TOPIC_POSITIONS],
}

impl ColumnsSnapshot {
    pub(crate) fn address_id(&self, row: u64) -> Option<u64> {
        self.addr.get_u64(row)
    }

    pub(crate) fn topic_id(&self, position: usize, row: u64) -> Option<u64> {
        self.topics[position].get_u64(row)
    }

    /// Record access recency for the columns a scan will read.
    pub(crate) fn touch(
        &self,
        start_row: u64,
        rows: u64,
        needs_addr: bool,
        needs_topic: [bool; TOPIC_POSITIONS],
    ) {
        if needs_addr {
            self.addr.touch(start_row, rows);
        }
        for (position, needed) in needs_topic.iter().enumerate() {
            if *needed {
                self.topics[position].touch(start_row, rows);
            }
        }
    }
}
