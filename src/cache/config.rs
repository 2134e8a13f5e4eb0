//! Construction-time settings for [`ExpiringCache`](super::ExpiringCache).

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Order in which loaded entries are chosen for eviction once the cache is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the entry that was accessed longest ago.
    #[default]
    Lru,
    /// Evict the entry that was inserted longest ago, regardless of hits.
    Fifo,
}

/// Invalid cache settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    Zero { field: &'static str },
}

/// Cache settings, usually read from the `cache` section of the service config.
///
/// ```yaml
/// cache:
///   time_to_live: 1m
///   max_capacity: 1000
///   negative_cache_ttl: 0s
///   load_timeout: 10s
///   eviction_policy: lru
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a loaded value is served before it counts as a miss.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Duration,

    /// Upper bound on the number of entries.
    pub max_capacity: usize,

    /// How long a failed load is replayed to callers before the upstream is
    /// asked again. Zero disables negative caching.
    #[serde(with = "humantime_serde")]
    pub negative_cache_ttl: Duration,

    /// Upper bound on a single fetch.
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,

    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(60),
            max_capacity: 1000,
            negative_cache_ttl: Duration::ZERO,
            load_timeout: Duration::from_secs(10),
            eviction_policy: EvictionPolicy::Lru,
        }
    }
}

impl CacheConfig {
    /// Checks the settings for values the cache cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] for a zero TTL, capacity or load timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.time_to_live.is_zero() {
            return Err(ConfigError::Zero {
                field: "time_to_live",
            });
        }
        if self.max_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "max_capacity",
            });
        }
        if self.load_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "load_timeout",
            });
        }
        Ok(())
    }

    /// Returns `true` if failed loads are remembered.
    pub fn negative_caching(&self) -> bool {
        !self.negative_cache_ttl.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert!(!config.negative_caching());
        assert_eq!(config.eviction_policy, EvictionPolicy::Lru);
    }

    #[test]
    fn parses_humantime_durations() {
        let config: CacheConfig = serde_yaml::from_str(
            "time_to_live: 250ms\nnegative_cache_ttl: 5s\neviction_policy: fifo\n",
        )
        .unwrap();
        assert_eq!(config.time_to_live, Duration::from_millis(250));
        assert_eq!(config.negative_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.eviction_policy, EvictionPolicy::Fifo);
        // untouched fields keep their defaults
        assert_eq!(config.max_capacity, 1000);
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = CacheConfig {
            max_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "max_capacity"
            })
        );
    }
}
