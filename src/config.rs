use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of shards used when none is configured.
pub const DEFAULT_SHARD_COUNT: usize = 4;

/// Unit in which integer TTLs are interpreted when none is configured.
pub const DEFAULT_TTL_UNIT: Duration = Duration::from_secs(1);

/// Construction parameters for a [`ShardCache`](crate::ShardCache).
///
/// `capacity` applies to every shard individually, so the worst-case number
/// of resident entries is `shard_count * capacity`. Divide the intended total
/// by the shard count when a global bound is wanted.
///
/// # Examples
///
/// ```rust
/// use lru_shard_cache::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new(256)
///     .shard_count(8)
///     .ttl_unit(Duration::from_millis(100))
///     .build();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.ttl(5), Some(Duration::from_millis(500)));
/// assert_eq!(config.ttl(0), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_ttl_unit")]
    pub ttl_unit: Duration,
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

fn default_ttl_unit() -> Duration {
    DEFAULT_TTL_UNIT
}

impl CacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            shard_count: DEFAULT_SHARD_COUNT,
            ttl_unit: DEFAULT_TTL_UNIT,
        }
    }

    pub fn shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn ttl_unit(mut self, ttl_unit: Duration) -> Self {
        self.ttl_unit = ttl_unit;
        self
    }

    pub fn build(self) -> Self {
        self
    }

    /// Rejects parameters that would produce an unusable cache.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(CacheError::invalid_config("capacity must be positive"));
        }
        if self.shard_count == 0 {
            return Err(CacheError::invalid_config("shard count must be positive"));
        }
        if self.ttl_unit.is_zero() {
            return Err(CacheError::invalid_config("ttl unit must be non-zero"));
        }
        Ok(())
    }

    /// Converts an integer TTL expressed in `ttl_unit`s. Zero means no expiry.
    pub fn ttl(&self, units: u32) -> Option<Duration> {
        match units {
            0 => None,
            n => Some(self.ttl_unit.saturating_mul(n)),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::new(10);
        assert_eq!(config.shard_count, DEFAULT_SHARD_COUNT);
        assert_eq!(config.ttl_unit, DEFAULT_TTL_UNIT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = CacheConfig::new(0).validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));

        let err = CacheConfig::new(8).shard_count(0).validate().unwrap_err();
        assert!(err.to_string().contains("shard count"));

        let err = CacheConfig::new(8)
            .ttl_unit(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("ttl unit"));
    }

    #[test]
    fn test_ttl_units() {
        let config = CacheConfig::new(8).ttl_unit(Duration::from_millis(250));
        assert_eq!(config.ttl(0), None);
        assert_eq!(config.ttl(4), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{"capacity": 64}"#).unwrap();
        assert_eq!(config, CacheConfig::new(64));

        let config: CacheConfig = serde_json::from_str(
            r#"{"capacity": 64, "shard_count": 16, "ttl_unit": {"secs": 0, "nanos": 1000000}}"#,
        )
        .unwrap();
        assert_eq!(config.shard_count, 16);
        assert_eq!(config.ttl_unit, Duration::from_millis(1));
    }
}
