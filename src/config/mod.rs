//! Service configuration, loaded from a YAML file.
//!
//! Every section is optional; a missing file or key falls back to the
//! defaults below.
//!
//! ```yaml
//! bind: 0.0.0.0:8080
//! upstream:
//!   base_url: https://http.cat
//!   request_timeout: 30s
//! cache:
//!   time_to_live: 1m
//!   max_capacity: 1000
//!   negative_cache_ttl: 5s
//! logging:
//!   level: info
//!   format: json
//! stats_interval: 20s
//! ```

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;
use crate::upstream::UpstreamConfig;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for a terminal.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Used when `RUST_LOG` is not set.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to listen on.
    pub bind: String,

    pub upstream: UpstreamConfig,

    pub cache: CacheConfig,

    pub logging: Logging,

    /// How often cache statistics are logged.
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// How often expired entries are swept out of the cache.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:8080".to_owned(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            logging: Logging::default(),
            stats_interval: Duration::from_secs(20),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or the defaults if there is none.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path)
                    .with_context(|| format!("failed to open configuration file {}", path.display()))?,
            )?,
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate().context("invalid cache configuration")?;
        if self.stats_interval.is_zero() {
            anyhow::bail!("`stats_interval` must be greater than zero");
        }
        if self.sweep_interval.is_zero() {
            anyhow::bail!("`sweep_interval` must be greater than zero");
        }
        Ok(())
    }
}

struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EvictionPolicy;

    #[test]
    fn defaults_without_file() {
        let config = Config::get(None).unwrap();
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.cache.time_to_live, Duration::from_secs(60));
        assert_eq!(config.stats_interval, Duration::from_secs(20));
        assert_eq!(config.logging.level, LevelFilter::INFO);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let yaml = r#"
            bind: 0.0.0.0:9000
            cache:
              time_to_live: 5m
              eviction_policy: fifo
              negative_cache_ttl: 2s
            logging:
              level: debug
              format: json
        "#;
        let config = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.cache.time_to_live, Duration::from_secs(300));
        assert_eq!(config.cache.max_capacity, 1000);
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::Fifo);
        assert_eq!(config.cache.negative_cache_ttl, Duration::from_secs(2));
        assert_eq!(config.logging.level, LevelFilter::DEBUG);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.upstream.base_url, "https://http.cat");
    }

    #[test]
    fn empty_file_is_an_error() {
        let err = Config::from_reader("  \n".as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "config file empty");
    }

    #[test]
    fn unknown_level_is_an_error() {
        let err = Config::from_reader("logging:\n  level: loud\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown variant `loud`"), "{err:#}");
    }

    #[test]
    fn validation_rejects_zero_ttl() {
        let config = Config::from_reader("cache:\n  time_to_live: 0s\n".as_bytes()).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "invalid cache configuration: `time_to_live` must be greater than zero"
        );
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::get(Some(Path::new("/nonexistent/cat-cache.yml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/cat-cache.yml"), "{err}");
    }
}
