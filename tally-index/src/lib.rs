//! # TallyDB Index Engine
//!
//! An embedded columnar index answering one question quickly: given an
//! Ethereum-style log filter (block range, address set, per-position topic
//! sets), **how many logs match?** RPC gateways use the count to bound or
//! plan `eth_getLogs` fan-out without replaying full log responses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  Log batch ──> Dictionaries ──> Column rows + Block blooms  │
//! │  (block-ordered)  (intern ids)          │                   │
//! │                                         ▼                   │
//! │                            Publication barrier              │
//! │                        (release-stored counters)            │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  Query ──> Dictionary lookup ──> Bloom prefilter ──> Scan   │
//! │              │                        │                     │
//! │              ▼                        ▼                     │
//! │        miss = count 0           skip cold blocks            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything lives in fixed-stride memory-mapped files under one data
//! directory; a process-wide LRU bounds resident pages to the caller's RAM
//! budget. One writer, many lock-free readers.
//!
//! ## Usage
//!
//! ```no_run
//! use tally_index::{Address, LogIndex, LogRecord, Query, Topic};
//!
//! let index = LogIndex::open("./data", 256 * 1024 * 1024)?;
//!
//! let transfer = Topic([0x11; 32]);
//! index.insert(&[LogRecord::new(10, Address([0xaa; 20]), &[transfer])])?;
//! index.bump_height(12)?;
//!
//! let count = index.query(&Query::range(0, 12).topic(0, transfer))?;
//! assert_eq!(count, 1);
//! index.close()?;
//! # Ok::<(), tally_core::Error>(())
//! ```

mod blocks;
mod bloom;
mod columns;
mod dict;
mod index;
mod layout;
mod meta;
mod query;
mod residency;
mod strided;

pub use index::LogIndex;

// Re-export the API surface types so embedders need only this crate.
pub use tally_core::config::{BloomConfig, IndexConfig, ResidencyConfig};
pub use tally_core::error::{Error, Result};
pub use tally_core::metrics::MetricsSnapshot;
pub use tally_core::types::{Address, LogRecord, Query, Topic, TOPIC_POSITIONS};
