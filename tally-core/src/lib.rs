//! # TallyDB Core
//!
//! This crate provides the fundamental building blocks for TallyDB:
//! - Core data structures (`Address`, `Topic`, `LogRecord`, `Query`)
//! - Error types
//! - Configuration
//! - In-process metrics counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   tally-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • types      - Log values and query filters    │
//! │  • error      - Error handling                  │
//! │  • config     - Index configuration             │
//! │  • metrics    - Atomic counters                 │
//! │  • utils      - Common helpers                  │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::{BloomConfig, IndexConfig, ResidencyConfig};
pub use error::{Error, Result};
pub use types::{Address, LogRecord, Query, Topic, TOPIC_POSITIONS};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FORMAT_VERSION: u32 = 1;
