//! # Configuration Management
//!
//! Configuration for an embedded index instance. `LogIndex::open(dir, ram)`
//! uses the defaults below with the caller's RAM budget; embedders that need
//! different bloom geometry go through `open_with_config`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Process-wide budget for resident mapped pages, in bytes.
    pub ram_limit_bytes: u64,
    pub bloom: BloomConfig,
    pub residency: ResidencyConfig,
}

impl IndexConfig {
    pub fn with_ram_limit(ram_limit_bytes: u64) -> Self {
        Self { ram_limit_bytes, ..Self::default() }
    }

    /// Reject configurations the index cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.ram_limit_bytes == 0 {
            return Err(Error::Configuration {
                message: "ram_limit_bytes must be non-zero".into(),
            });
        }
        self.bloom.validate()?;
        self.residency.validate()
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ram_limit_bytes: 256 * 1024 * 1024, // 256MB
            bloom: BloomConfig::default(),
            residency: ResidencyConfig::default(),
        }
    }
}

/// Per-block bloom filter geometry. Fixed at index creation and recorded in
/// the meta file; on reopen the recorded geometry wins over the configured
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomConfig {
    /// Filter width `m` in bits. Must be a multiple of 8.
    pub bits: u32,
    /// Probe count `k`.
    pub hashes: u32,
}

impl BloomConfig {
    /// Bytes occupied by one block's filter.
    pub fn filter_bytes(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Expected false-positive probability at `n` distinct ids:
    /// `(1 - e^(-kn/m))^k`.
    pub fn false_positive_rate(&self, n: u64) -> f64 {
        let k = self.hashes as f64;
        let exponent = -(k * n as f64) / self.bits as f64;
        (1.0 - exponent.exp()).powf(k)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bits == 0 || self.bits % 8 != 0 {
            return Err(Error::Configuration {
                message: format!("bloom bits must be a non-zero multiple of 8, got {}", self.bits),
            });
        }
        if self.hashes == 0 || self.hashes > 16 {
            return Err(Error::Configuration {
                message: format!("bloom hashes must be in 1..=16, got {}", self.hashes),
            });
        }
        Ok(())
    }
}

impl Default for BloomConfig {
    fn default() -> Self {
        // 2 KiB per block, five probes: ~0.14% false positives at the design
        // point of 1024 distinct ids per block, still under 2% up to ~2900.
        Self { bits: 16 * 1024, hashes: 5 }
    }
}

/// Page-residency tracking knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidencyConfig {
    /// Tracking granule in bytes; eviction advises the kernel per granule.
    pub granule_bytes: u64,
    /// Shard count for the LRU; must be a power of 2.
    pub shards: usize,
}

impl ResidencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.granule_bytes == 0 || !self.granule_bytes.is_power_of_two() {
            return Err(Error::Configuration {
                message: format!(
                    "residency granule must be a power of two, got {}",
                    self.granule_bytes
                ),
            });
        }
        if !self.shards.is_power_of_two() {
            return Err(Error::Configuration {
                message: format!("residency shards must be a power of two, got {}", self.shards),
            });
        }
        Ok(())
    }
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            granule_bytes: 64 * 1024, // 64 KiB
            shards: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        IndexConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_ram_rejected() {
        let cfg = IndexConfig::with_ram_limit(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bloom_geometry_rejected() {
        assert!(BloomConfig { bits: 12, hashes: 5 }.validate().is_err());
        assert!(BloomConfig { bits: 1024, hashes: 0 }.validate().is_err());
        assert!(BloomConfig { bits: 1024, hashes: 17 }.validate().is_err());
    }

    #[test]
    fn test_default_bloom_meets_target_rate() {
        let bloom = BloomConfig::default();
        // The sizing target: <= 2% false positives at the 99th-percentile
        // block's distinct-id count.
        assert!(bloom.false_positive_rate(1024) < 0.02);
        assert!(bloom.false_positive_rate(2900) < 0.02);
    }
}
