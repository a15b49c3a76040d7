//! # Fixed-Stride File Vectors
//!
//! The one storage primitive everything else is built on: a file-backed
//! vector of fixed-width elements behind a growable memory mapping.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (64 bytes):                                         │
//! │    magic: [u8; 8] = "TALLYSEG"                              │
//! │    version: u32                                             │
//! │    stride: u32                                              │
//! │    committed_len: u64   (updated on flush)                  │
//! │    padding to 64                                            │
//! │                                                             │
//! │  Elements (stride bytes each):                              │
//! │    [elem 0][elem 1][elem 2]...                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! One writer, many readers. The writer appends past the published length and
//! publishes with a single release-store of `len`; readers acquire-load `len`
//! first and never look past it. Growth doubles the file and swaps in a fresh
//! mapping; readers that still hold the old `Arc<MapRegion>` keep a valid
//! (older, complete-for-their-snapshot) view until they drop it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::{MmapMut, MmapOptions, UncheckedAdvice};
use parking_lot::RwLock;
use tracing::{debug, warn};

use tally_core::error::{Error, Result, ResultExt};

use crate::residency::ResidencyTracker;

pub(crate) const HEADER_BYTES: usize = 64;
const SEGMENT_MAGIC: &[u8; 8] = b"TALLYSEG";
const SEGMENT_VERSION: u32 = 1;

/// Elements reserved when a file is first created.
const INITIAL_ELEMENTS: usize = 1024;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// One live mapping of a data file.
///
/// Readers keep a region alive through its `Arc`; remapping after growth
/// swaps the current region but never invalidates one still held elsewhere.
#[derive(Debug)]
pub(crate) struct MapRegion {
    id: u64,
    ptr: *mut u8,
    bytes: usize,
    map: MmapMut,
}

// The raw base pointer strips the auto traits; the mapping itself is shared
// process memory and all mutation goes through the single-writer discipline.
unsafe impl Send for MapRegion {}
unsafe impl Sync for MapRegion {}

impl MapRegion {
    pub(crate) fn map_file(file: &File, path: &Path) -> Result<Arc<Self>> {
        let mut map = unsafe { MmapOptions::new().map_mut(file) }
            .with_context(|| format!("mmap failed for {}", path.display()))?;
        let ptr = map.as_mut_ptr();
        let bytes = map.len();
        Ok(Arc::new(Self {
            id: NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed),
            ptr,
            bytes,
            map,
        }))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    /// Read `len` bytes at `offset`.
    ///
    /// Safety: the caller guarantees the range is in bounds and, through the
    /// publication protocol, that no concurrent write overlaps it.
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.bytes);
        std::slice::from_raw_parts(self.ptr.add(offset), len)
    }

    /// Writer-side raw write past the published length.
    pub(crate) unsafe fn write(&self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= self.bytes);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
    }

    /// View an 8-aligned cell as an atomic (dictionary probe slots).
    ///
    /// Safety: `offset` must be 8-aligned and in bounds.
    pub(crate) unsafe fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0 && offset + 8 <= self.bytes);
        &*(self.ptr.add(offset) as *const AtomicU64)
    }

    /// Tell the kernel a range is cold. DONTNEED on a shared file mapping
    /// only drops cached pages; the next touch faults them back in.
    pub(crate) fn advise_cold(&self, offset: usize, len: usize) {
        let end = offset.saturating_add(len).min(self.bytes);
        if offset >= end {
            return;
        }
        if let Err(err) =
            unsafe { self.map.unchecked_advise_range(UncheckedAdvice::DontNeed, offset, end - offset) }
        {
            warn!(error = %err, "madvise(DONTNEED) failed");
        }
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.map.flush().with_context(|| "msync failed".to_string())
    }
}

/// A consistent point-in-time view of a [`StridedFile`]: the published length
/// and the mapping that holds it. All query-path reads go through snapshots,
/// so a concurrent writer (including growth) is never observed mid-flight.
pub(crate) struct Snapshot {
    region: Arc<MapRegion>,
    residency: Arc<ResidencyTracker>,
    stride: usize,
    len: u64,
}

impl Snapshot {
    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    /// Read a stride-8 cell.
    pub(crate) fn get_u64(&self, index: u64) -> Option<u64> {
        debug_assert_eq!(self.stride, 8);
        if index >= self.len {
            return None;
        }
        let offset = HEADER_BYTES + index as usize * 8;
        let cell = unsafe { self.region.slice(offset, 8) };
        Some(LittleEndian::read_u64(cell))
    }

    /// Borrow one element for the duration of `f`.
    pub(crate) fn with_slice<R>(&self, index: u64, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if index >= self.len {
            return None;
        }
        let offset = HEADER_BYTES + index as usize * self.stride;
        let bytes = unsafe { self.region.slice(offset, self.stride) };
        Some(f(bytes))
    }

    /// Record access recency for `count` elements starting at `index`.
    pub(crate) fn touch(&self, index: u64, count: u64) {
        if count == 0 || index >= self.len {
            return;
        }
        let offset = (HEADER_BYTES + index as usize * self.stride) as u64;
        self.residency.touch(&self.region, offset, count * self.stride as u64);
    }
}

/// File-backed vector of fixed-stride elements. See the module docs for the
/// layout and the reader/writer protocol.
#[derive(Debug)]
pub(crate) struct StridedFile {
    path: PathBuf,
    stride: usize,
    file: File,
    region: RwLock<Arc<MapRegion>>,
    /// Published element count.
    len: AtomicU64,
    residency: Arc<ResidencyTracker>,
}

impl StridedFile {
    /// Open or create the file, validating the header if it exists. The
    /// recovered length is the committed header length clamped to what the
    /// physical file can hold; callers restore the authoritative length from
    /// the meta file afterwards.
    pub(crate) fn open(
        path: impl AsRef<Path>,
        stride: usize,
        residency: Arc<ResidencyTracker>,
    ) -> Result<Self> {
        assert!(stride > 0, "zero stride");
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len() as usize;

        let fresh = file_len < HEADER_BYTES;
        if fresh {
            let initial = HEADER_BYTES + stride * INITIAL_ELEMENTS;
            file.set_len(initial as u64)
                .with_context(|| format!("failed to size {}", path.display()))?;
        }

        let region = MapRegion::map_file(&file, &path)?;
        let len = if fresh {
            let mut header = [0u8; HEADER_BYTES];
            header[0..8].copy_from_slice(SEGMENT_MAGIC);
            LittleEndian::write_u32(&mut header[8..12], SEGMENT_VERSION);
            LittleEndian::write_u32(&mut header[12..16], stride as u32);
            LittleEndian::write_u64(&mut header[16..24], 0);
            unsafe { region.write(0, &header) };
            region.flush()?;
            0
        } else {
            let header = unsafe { region.slice(0, HEADER_BYTES) };
            if &header[0..8] != SEGMENT_MAGIC {
                return Err(Error::Corrupt {
                    details: format!("bad magic in {}", path.display()),
                });
            }
            let version = LittleEndian::read_u32(&header[8..12]);
            if version != SEGMENT_VERSION {
                return Err(Error::Corrupt {
                    details: format!("unsupported version {} in {}", version, path.display()),
                });
            }
            let header_stride = LittleEndian::read_u32(&header[12..16]) as usize;
            if header_stride != stride {
                return Err(Error::Corrupt {
                    details: format!(
                        "stride mismatch in {}: file has {}, expected {}",
                        path.display(),
                        header_stride,
                        stride
                    ),
                });
            }
            let committed = LittleEndian::read_u64(&header[16..24]);
            let physical = ((file_len - HEADER_BYTES) / stride) as u64;
            if committed > physical {
                warn!(
                    file = %path.display(),
                    committed,
                    physical,
                    "committed length exceeds physical file, truncating tail"
                );
            }
            committed.min(physical)
        };

        Ok(Self {
            path,
            stride,
            file,
            region: RwLock::new(region),
            len: AtomicU64::new(len),
            residency,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        // Length before region: any region observed afterwards contains all
        // elements below that length (growth swaps the region before the
        // writer publishes into the grown extent).
        let len = self.len.load(Ordering::Acquire);
        let region = self.region.read().clone();
        Snapshot {
            region,
            residency: self.residency.clone(),
            stride: self.stride,
            len,
        }
    }

    /// Read an element regardless of the published length (recovery only);
    /// still bounded by the physical file.
    pub(crate) fn read_unpublished(&self, index: u64, out: &mut [u8]) -> bool {
        debug_assert_eq!(out.len(), self.stride);
        let region = self.region.read().clone();
        let offset = HEADER_BYTES + index as usize * self.stride;
        if offset + self.stride > region.bytes() {
            return false;
        }
        out.copy_from_slice(unsafe { region.slice(offset, self.stride) });
        true
    }

    /// Writer-side: store an element at `index`, growing the file as needed.
    /// The write stays invisible until `publish` covers it.
    pub(crate) fn set_element(&self, index: u64, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), self.stride);
        self.ensure_capacity(index + 1)?;
        let region = self.region.read().clone();
        let offset = HEADER_BYTES + index as usize * self.stride;
        unsafe { region.write(offset, bytes) };
        Ok(())
    }

    /// Writer-side: store a stride-8 cell.
    pub(crate) fn set_u64(&self, index: u64, value: u64) -> Result<()> {
        debug_assert_eq!(self.stride, 8);
        let mut cell = [0u8; 8];
        LittleEndian::write_u64(&mut cell, value);
        self.set_element(index, &cell)
    }

    /// Publication barrier: release-store the element count.
    pub(crate) fn publish(&self, len: u64) {
        self.len.store(len, Ordering::Release);
    }

    /// Recovery: clamp the published length down to `len`. Never raises it —
    /// the open-time length already reflects what the file durably holds, and
    /// preallocated zero space past it is not data.
    pub(crate) fn restore_len(&self, len: u64) {
        let clamped = len.min(self.len.load(Ordering::Acquire));
        self.len.store(clamped, Ordering::Release);
    }

    fn ensure_capacity(&self, elements: u64) -> Result<()> {
        let needed = HEADER_BYTES + elements as usize * self.stride;
        if needed <= self.region.read().bytes() {
            return Ok(());
        }

        let current = self.region.read().bytes();
        let new_bytes = needed.max(current * 2);
        self.file
            .set_len(new_bytes as u64)
            .with_context(|| format!("failed to grow {}", self.path.display()))?;
        let region = MapRegion::map_file(&self.file, &self.path)?;
        debug!(file = %self.path.display(), bytes = new_bytes, "grew mapping");
        *self.region.write() = region;
        Ok(())
    }

    /// Persist: committed length into the header, then msync the mapping.
    pub(crate) fn flush(&self) -> Result<()> {
        let region = self.region.read().clone();
        let mut cell = [0u8; 8];
        LittleEndian::write_u64(&mut cell, self.len.load(Ordering::Acquire));
        unsafe { region.write(16, &cell) };
        region.flush()
    }
}
