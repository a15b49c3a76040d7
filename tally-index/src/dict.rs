//! # Persistent Hash Dictionaries
//!
//! Interns fixed-width byte keys (20-byte addresses, 32-byte topics) into
//! dense 64-bit ids. Two files per dictionary:
//!
//! - `keys`: dense `id → key bytes` vector; ids are assigned from a
//!   monotonic counter starting at 1 and never reused. Id 0 is reserved as
//!   the "absent" sentinel.
//! - `table`: open-addressed probe table of `(fingerprint64, id64)` slots,
//!   power-of-two sized, linear probing, load factor capped at 0.5.
//!
//! The address dictionary and the topic dictionary are two instances with
//! independent id spaces.
//!
//! ## Concurrency
//!
//! Insertion happens under the index's writer lock. Lookup is concurrent and
//! lock-free on the slot path: the writer publishes the key bytes and the
//! keys length before release-storing the slot id, so a reader that
//! acquire-loads a non-zero slot id always finds the confirming key bytes. A
//! slot id at or above the reader's `next_id` snapshot is a leftover from a
//! torn tail (or an insert the reader predates) and is skipped, probing on.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use tracing::{info, warn};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use tally_core::error::{Error, Result, ResultExt};
use tally_core::metrics::IndexMetrics;
use tally_core::utils::next_power_of_two;

use crate::layout::TABLE_SLOT_BYTES;
use crate::residency::ResidencyTracker;
use crate::strided::{MapRegion, Snapshot, StridedFile, HEADER_BYTES};

const DICT_SEED: u64 = 0x6469_6374_2d74_6c79;
const TABLE_MAGIC: &[u8; 8] = b"TALLYTAB";
const TABLE_VERSION: u32 = 1;
const INITIAL_SLOTS: u64 = 1024;

/// The probe table file: a flat power-of-two array of 16-byte slots after the
/// standard 64-byte header (which records the slot count in place of a
/// committed length). Slots are accessed as atomics over the mapping.
#[derive(Debug)]
struct ProbeTable {
    path: PathBuf,
    file: File,
    region: Arc<MapRegion>,
    slots: u64,
}

impl ProbeTable {
    fn create(path: &Path, slots: u64) -> Result<Self> {
        debug_assert!(slots.is_power_of_two());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        file.set_len((HEADER_BYTES + slots as usize * TABLE_SLOT_BYTES) as u64)
            .with_context(|| format!("failed to size {}", path.display()))?;

        let region = Self::map(&file, path)?;
        let mut header = [0u8; HEADER_BYTES];
        header[0..8].copy_from_slice(TABLE_MAGIC);
        LittleEndian::write_u32(&mut header[8..12], TABLE_VERSION);
        LittleEndian::write_u32(&mut header[12..16], TABLE_SLOT_BYTES as u32);
        LittleEndian::write_u64(&mut header[16..24], slots);
        unsafe { region.write(0, &header) };

        Ok(Self { path: path.to_path_buf(), file, region, slots })
    }

    fn open_existing(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len() as usize;
        if file_len < HEADER_BYTES {
            return Err(Error::Corrupt {
                details: format!("probe table {} too short", path.display()),
            });
        }

        let region = Self::map(&file, path)?;
        let header = unsafe { region.slice(0, HEADER_BYTES) };
        if &header[0..8] != TABLE_MAGIC {
            return Err(Error::Corrupt {
                details: format!("bad magic in {}", path.display()),
            });
        }
        let version = LittleEndian::read_u32(&header[8..12]);
        if version != TABLE_VERSION {
            return Err(Error::Corrupt {
                details: format!("unsupported version {} in {}", version, path.display()),
            });
        }
        let slots = LittleEndian::read_u64(&header[16..24]);
        if !slots.is_power_of_two()
            || file_len < HEADER_BYTES + slots as usize * TABLE_SLOT_BYTES
        {
            return Err(Error::Corrupt {
                details: format!("inconsistent probe table {}", path.display()),
            });
        }

        Ok(Self { path: path.to_path_buf(), file, region, slots })
    }

    fn map(file: &File, path: &Path) -> Result<Arc<MapRegion>> {
        MapRegion::map_file(file, path)
    }

    #[inline]
    fn fp(&self, slot: u64) -> &AtomicU64 {
        unsafe { self.region.atomic_u64(HEADER_BYTES + slot as usize * TABLE_SLOT_BYTES) }
    }

    #[inline]
    fn id(&self, slot: u64) -> &AtomicU64 {
        unsafe { self.region.atomic_u64(HEADER_BYTES + slot as usize * TABLE_SLOT_BYTES + 8) }
    }

    fn flush(&self) -> Result<()> {
        self.region.flush()?;
        self.file
            .sync_all()
            .with_context(|| format!("fsync failed for {}", self.path.display()))
    }
}

/// One persistent interning dictionary. See module docs.
#[derive(Debug)]
pub(crate) struct Dictionary {
    name: &'static str,
    key_len: usize,
    keys: StridedFile,
    table: RwLock<Arc<ProbeTable>>,
    table_path: PathBuf,
    /// Next id to assign; ids `1..next_id` are published.
    next_id: AtomicU64,
    metrics: IndexMetrics,
}

impl Dictionary {
    pub(crate) fn open(
        dir: &Path,
        name: &'static str,
        keys_file: &str,
        table_file: &str,
        key_len: usize,
        residency: Arc<ResidencyTracker>,
        metrics: IndexMetrics,
    ) -> Result<Self> {
        let keys = StridedFile::open(dir.join(keys_file), key_len, residency)?;
        let table_path = dir.join(table_file);

        // The probe table is derived data: anything unusable is rebuilt from
        // the keys file instead of failing the open.
        let table = if !table_path.exists() && keys.len() == 0 {
            let table = ProbeTable::create(&table_path, INITIAL_SLOTS)?;
            table.flush()?;
            table
        } else {
            match ProbeTable::open_existing(&table_path) {
                Ok(table) => table,
                Err(err) => {
                    warn!(dict = name, error = %err, "probe table unusable, rebuilding from keys");
                    let entries = keys.len();
                    let slots = next_power_of_two(entries * 4).max(INITIAL_SLOTS);
                    build_table(&table_path, &keys.snapshot(), entries + 1, slots)?
                }
            }
        };

        let next_id = keys.len() + 1;
        Ok(Self {
            name,
            key_len,
            keys,
            table: RwLock::new(Arc::new(table)),
            table_path,
            next_id: AtomicU64::new(next_id),
            metrics,
        })
    }

    /// Ids assigned so far.
    pub(crate) fn entries(&self) -> u64 {
        self.next_id.load(Ordering::Acquire) - 1
    }

    /// First unassigned id (for the meta file).
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::Acquire)
    }

    /// Recovery: clamp to the authoritative next id from the meta file (and
    /// to what the keys file durably holds).
    pub(crate) fn restore_next_id(&self, next_id: u64) {
        self.keys.restore_len(next_id.saturating_sub(1));
        self.next_id.store(self.keys.len() + 1, Ordering::Release);
    }

    /// Resolve a key to its id, if interned. Lock-free against the writer.
    pub(crate) fn lookup(&self, key: &[u8]) -> Option<u64> {
        debug_assert_eq!(key.len(), self.key_len);
        let next = self.next_id.load(Ordering::Acquire);
        let table = self.table.read().clone();
        let keys = self.keys.snapshot();

        let hash = xxh3_64_with_seed(key, DICT_SEED);
        let mask = table.slots - 1;
        let start = hash & mask;
        let mut slot = start;
        loop {
            let id = table.id(slot).load(Ordering::Acquire);
            if id == 0 {
                return None;
            }
            if id < next && table.fp(slot).load(Ordering::Relaxed) == hash {
                let matches = keys.with_slice(id - 1, |bytes| bytes == key).unwrap_or(false);
                if matches {
                    keys.touch(id - 1, 1);
                    return Some(id);
                }
            }
            // id >= next: stale slot (torn tail, or an insert this lookup
            // predates). Not a chain terminator; keep probing.
            slot = (slot + 1) & mask;
            if slot == start {
                return None;
            }
        }
    }

    /// Resolve a key, assigning a fresh id on first sight. Writer-only:
    /// callers hold the index writer lock.
    pub(crate) fn intern(&self, key: &[u8]) -> Result<u64> {
        debug_assert_eq!(key.len(), self.key_len);
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }

        let id = self.next_id.load(Ordering::Relaxed);
        if id == u64::MAX {
            return Err(Error::InvariantViolation {
                message: format!("{} dictionary id space exhausted", self.name),
            });
        }

        // Publication order: key bytes, keys length, next id, then the slot
        // id last — a reader that sees the slot sees everything behind it.
        self.keys.set_element(id - 1, key)?;
        self.keys.publish(id);
        self.next_id.store(id + 1, Ordering::Release);

        let hash = xxh3_64_with_seed(key, DICT_SEED);
        {
            let table = self.table.read().clone();
            let mask = table.slots - 1;
            let mut slot = hash & mask;
            loop {
                let slot_id = table.id(slot).load(Ordering::Relaxed);
                if slot_id == 0 || slot_id >= id {
                    // Empty, or stale from a torn tail: claim it.
                    table.fp(slot).store(hash, Ordering::Relaxed);
                    table.id(slot).store(id, Ordering::Release);
                    break;
                }
                slot = (slot + 1) & mask;
            }
        }

        // Keep occupancy at or below one half.
        let slots = self.table.read().slots;
        if id * 2 > slots {
            self.rehash(slots * 2)?;
        }

        Ok(id)
    }

    /// Rebuild the probe table at double the size from the keys file, then
    /// atomically swap it in. Readers holding the old table keep a complete
    /// view of every id published before the swap.
    fn rehash(&self, new_slots: u64) -> Result<()> {
        let next = self.next_id.load(Ordering::Relaxed);
        let new_table = build_table(&self.table_path, &self.keys.snapshot(), next, new_slots)?;

        info!(dict = self.name, slots = new_slots, entries = next - 1, "rehashed dictionary");
        self.metrics.record_rehash();
        *self.table.write() = Arc::new(new_table);
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.keys.flush()?;
        self.table.read().flush()
    }
}

/// Build a fresh probe table from the first `next - 1` keys, fsync it as a
/// temp sibling, then rename it over `final_path`.
fn build_table(final_path: &Path, keys: &Snapshot, next: u64, slots: u64) -> Result<ProbeTable> {
    debug_assert!(slots.is_power_of_two() && next <= slots);
    let tmp_path = final_path.with_extension("table.tmp");
    let table = ProbeTable::create(&tmp_path, slots)?;

    let mask = slots - 1;
    for id in 1..next {
        let hash = keys
            .with_slice(id - 1, |bytes| xxh3_64_with_seed(bytes, DICT_SEED))
            .ok_or_else(|| Error::Corrupt {
                details: format!("dictionary lost key {} rebuilding {}", id, final_path.display()),
            })?;
        let mut slot = hash & mask;
        while table.id(slot).load(Ordering::Relaxed) != 0 {
            slot = (slot + 1) & mask;
        }
        table.fp(slot).store(hash, Ordering::Relaxed);
        table.id(slot).store(id, Ordering::Relaxed);
    }

    table.flush()?;
    std::fs::rename(&tmp_path, final_path)
        .with_context(|| format!("failed to swap {}", final_path.display()))?;
    // The mapping follows the inode through the rename.
    Ok(ProbeTable { path: final_path.to_path_buf(), ..table })
}
