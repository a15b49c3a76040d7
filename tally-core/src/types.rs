//! # Core Types
//!
//! Log values and query filters shared by the ingestion and query paths.
//!
//! Addresses and topics are plain fixed-width byte values; the index interns
//! them into dense 64-bit ids internally, but the embedding API only ever
//! speaks raw bytes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of topic positions per log (Ethereum fixes this at four).
pub const TOPIC_POSITIONS: usize = 4;

/// A 20-byte contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

/// A 32-byte event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Topic(pub [u8; 32]);

impl Address {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Topic {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", crate::utils::hex_encode(&self.0))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", crate::utils::hex_encode(&self.0))
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 20];
        crate::utils::hex_decode(s, &mut bytes)?;
        Ok(Address(bytes))
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        crate::utils::hex_decode(s, &mut bytes)?;
        Ok(Topic(bytes))
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl From<[u8; 32]> for Topic {
    fn from(bytes: [u8; 32]) -> Self {
        Topic(bytes)
    }
}

/// One emitted event as fed to the ingester: block height, emitting address
/// and up to four topics. Absent topic positions are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub block_number: u64,
    pub address: Address,
    pub topics: [Option<Topic>; TOPIC_POSITIONS],
}

impl LogRecord {
    /// Build a record from a topic slice of length <= 4; trailing positions
    /// are left absent.
    pub fn new(block_number: u64, address: Address, topics: &[Topic]) -> Self {
        let mut slots = [None; TOPIC_POSITIONS];
        for (slot, topic) in slots.iter_mut().zip(topics.iter()) {
            *slot = Some(*topic);
        }
        Self { block_number, address, topics: slots }
    }

    /// Number of present topic positions.
    pub fn topic_count(&self) -> usize {
        self.topics.iter().filter(|t| t.is_some()).count()
    }
}

/// A log filter over an inclusive block range.
///
/// Empty `addresses` means "any address". Each topic position holds a set of
/// alternatives; an empty set means "any topic at this position". A `None`
/// entry inside a position's set is the null filter value and is equivalent
/// to not constraining that position with it (a position containing *only*
/// nulls collapses to a wildcard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<Address>,
    pub topics: [Vec<Option<Topic>>; TOPIC_POSITIONS],
    /// Caps the returned count; the scan short-circuits once reached.
    pub limit: Option<u64>,
}

impl Query {
    /// Unfiltered count over an inclusive block range.
    pub fn range(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            addresses: Vec::new(),
            topics: Default::default(),
            limit: None,
        }
    }

    /// Add an address alternative.
    pub fn address(mut self, address: Address) -> Self {
        self.addresses.push(address);
        self
    }

    /// Add a topic alternative at `position` (0..4).
    pub fn topic(mut self, position: usize, topic: Topic) -> Self {
        assert!(position < TOPIC_POSITIONS, "topic position out of range");
        self.topics[position].push(Some(topic));
        self
    }

    /// Add the null alternative at `position` (matches any topic there).
    pub fn null_topic(mut self, position: usize) -> Self {
        assert!(position < TOPIC_POSITIONS, "topic position out of range");
        self.topics[position].push(None);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no address or topic constraint is present.
    pub fn is_unfiltered(&self) -> bool {
        self.addresses.is_empty() && self.topics.iter().all(|t| t.is_empty())
    }
}
