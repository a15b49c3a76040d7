//! # Meta File
//!
//! The cross-file source of truth: published counters, bloom geometry, key
//! widths and the upstream hint. Rewritten atomically (write temp file,
//! fsync, rename) on every flush, *after* the data files have been msynced —
//! so the counters it carries never point past durable data, and a reopen
//! clamps every file to them.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use tally_core::config::BloomConfig;
use tally_core::error::{Error, Result, ResultExt};

use crate::layout::{ADDRESS_KEY_BYTES, TOPIC_KEY_BYTES};

const META_MAGIC: &[u8; 8] = b"TALLYMET";
const META_VERSION: u32 = 1;
const META_FIXED_BYTES: usize = 64;

/// Upper bound on the stored upstream hint.
pub(crate) const UPSTREAM_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Meta {
    pub bloom: BloomConfig,
    pub blocks_count: u64,
    pub logs_count: u64,
    pub addr_next_id: u64,
    pub topic_next_id: u64,
    pub upstream: Option<String>,
}

impl Meta {
    pub(crate) fn fresh(bloom: BloomConfig) -> Self {
        Self {
            bloom,
            blocks_count: 0,
            logs_count: 0,
            addr_next_id: 1,
            topic_next_id: 1,
            upstream: None,
        }
    }

    /// Load the meta file; `Ok(None)` when it does not exist yet. Any torn or
    /// foreign content is `Corrupt` — the operator wipes and replays.
    pub(crate) fn load(path: &Path) -> Result<Option<Self>> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io(format!("failed to open {}", path.display()), err)),
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", path.display()))?;

        if bytes.len() < META_FIXED_BYTES || &bytes[0..8] != META_MAGIC {
            return Err(Error::Corrupt { details: "meta file torn or foreign".into() });
        }
        let version = LittleEndian::read_u32(&bytes[8..12]);
        if version != META_VERSION {
            return Err(Error::Corrupt {
                details: format!("unsupported meta version {}", version),
            });
        }

        let bloom = BloomConfig {
            bits: LittleEndian::read_u32(&bytes[12..16]),
            hashes: LittleEndian::read_u32(&bytes[16..20]),
        };
        bloom.validate().map_err(|_| Error::Corrupt {
            details: format!("meta carries degenerate bloom geometry {:?}", bloom),
        })?;

        let addr_key = LittleEndian::read_u32(&bytes[20..24]) as usize;
        let topic_key = LittleEndian::read_u32(&bytes[24..28]) as usize;
        if addr_key != ADDRESS_KEY_BYTES || topic_key != TOPIC_KEY_BYTES {
            return Err(Error::Corrupt {
                details: format!("meta key widths {}/{} do not match", addr_key, topic_key),
            });
        }

        let upstream_len = LittleEndian::read_u32(&bytes[28..32]) as usize;
        let blocks_count = LittleEndian::read_u64(&bytes[32..40]);
        let logs_count = LittleEndian::read_u64(&bytes[40..48]);
        let addr_next_id = LittleEndian::read_u64(&bytes[48..56]);
        let topic_next_id = LittleEndian::read_u64(&bytes[56..64]);

        if addr_next_id == 0 || topic_next_id == 0 {
            return Err(Error::Corrupt { details: "meta id counters at reserved zero".into() });
        }
        if upstream_len > UPSTREAM_LIMIT || bytes.len() < META_FIXED_BYTES + upstream_len {
            return Err(Error::Corrupt { details: "meta upstream hint torn".into() });
        }
        let upstream = if upstream_len == 0 {
            None
        } else {
            let raw = bytes[META_FIXED_BYTES..META_FIXED_BYTES + upstream_len].to_vec();
            Some(String::from_utf8(raw).map_err(|_| Error::Corrupt {
                details: "meta upstream hint is not UTF-8".into(),
            })?)
        };

        Ok(Some(Self {
            bloom,
            blocks_count,
            logs_count,
            addr_next_id,
            topic_next_id,
            upstream,
        }))
    }

    /// Persist: write a temp sibling, fsync it, rename into place, fsync the
    /// directory.
    pub(crate) fn store(&self, path: &Path) -> Result<()> {
        let upstream = self.upstream.as_deref().unwrap_or("");
        debug_assert!(upstream.len() <= UPSTREAM_LIMIT);

        let mut bytes = vec![0u8; META_FIXED_BYTES + upstream.len()];
        bytes[0..8].copy_from_slice(META_MAGIC);
        LittleEndian::write_u32(&mut bytes[8..12], META_VERSION);
        LittleEndian::write_u32(&mut bytes[12..16], self.bloom.bits);
        LittleEndian::write_u32(&mut bytes[16..20], self.bloom.hashes);
        LittleEndian::write_u32(&mut bytes[20..24], ADDRESS_KEY_BYTES as u32);
        LittleEndian::write_u32(&mut bytes[24..28], TOPIC_KEY_BYTES as u32);
        LittleEndian::write_u32(&mut bytes[28..32], upstream.len() as u32);
        LittleEndian::write_u64(&mut bytes[32..40], self.blocks_count);
        LittleEndian::write_u64(&mut bytes[40..48], self.logs_count);
        LittleEndian::write_u64(&mut bytes[48..56], self.addr_next_id);
        LittleEndian::write_u64(&mut bytes[56..64], self.topic_next_id);
        bytes[META_FIXED_BYTES..].copy_from_slice(upstream.as_bytes());

        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)
                .with_context(|| format!("failed to create {}", tmp_path.display()))?;
            tmp.write_all(&bytes)
                .with_context(|| format!("failed to write {}", tmp_path.display()))?;
            tmp.sync_all()
                .with_context(|| format!("fsync failed for {}", tmp_path.display()))?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to publish {}", path.display()))?;

        if let Some(dir) = path.parent() {
            if let Ok(dir_handle) = File::open(dir) {
                let _ = dir_handle.sync_all();
            }
        }
        Ok(())
    }
}
