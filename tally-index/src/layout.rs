//! On-disk layout: file names and record widths under the data directory.
//!
//! | File              | Stride | Contents                               |
//! |-------------------|--------|----------------------------------------|
//! | `addr.dict.keys`  | 20 B   | id → address bytes                     |
//! | `addr.dict.table` | 16 B   | probe slots `(fp64, id64)`             |
//! | `topic.dict.keys` | 32 B   | id → topic bytes                       |
//! | `topic.dict.table`| 16 B   | probe slots                            |
//! | `block.idx`       | 16 B   | `(logs_count:u32, pad, logs_start:u64)`|
//! | `block.bloom`     | m/8 B  | bloom per block                        |
//! | `log.addr`        | 8 B    | address id per row                     |
//! | `log.t0`..`log.t3`| 8 B    | topic id per row and position          |
//! | `meta`            | —      | counters, bloom geometry, upstream     |
//!
//! Every strided file carries a 64-byte header (magic, version, stride,
//! committed length); integers are little-endian throughout.

pub(crate) const ADDR_KEYS_FILE: &str = "addr.dict.keys";
pub(crate) const ADDR_TABLE_FILE: &str = "addr.dict.table";
pub(crate) const TOPIC_KEYS_FILE: &str = "topic.dict.keys";
pub(crate) const TOPIC_TABLE_FILE: &str = "topic.dict.table";
pub(crate) const BLOCK_INDEX_FILE: &str = "block.idx";
pub(crate) const BLOCK_BLOOM_FILE: &str = "block.bloom";
pub(crate) const LOG_ADDR_FILE: &str = "log.addr";
pub(crate) const LOG_TOPIC_FILES: [&str; 4] = ["log.t0", "log.t1", "log.t2", "log.t3"];
pub(crate) const META_FILE: &str = "meta";

/// Scratch files (dictionary rehash, meta rewrite) before their rename.
pub(crate) const TMP_SUFFIX: &str = ".tmp";

pub(crate) const ADDRESS_KEY_BYTES: usize = 20;
pub(crate) const TOPIC_KEY_BYTES: usize = 32;
pub(crate) const ID_CELL_BYTES: usize = 8;
pub(crate) const SUMMARY_BYTES: usize = 16;
pub(crate) const TABLE_SLOT_BYTES: usize = 16;
