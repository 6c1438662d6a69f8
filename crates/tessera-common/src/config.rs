//! Configuration types for Tessera
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (TOML/JSON/YAML by extension), then `TESSERA_`-prefixed environment
//! variables using `__` as the section separator
//! (e.g. `TESSERA_CACHE__TIMEOUT_MS=25`).

use crate::error::{Error, Result};
use crate::types::{EncodingMode, EvictionMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for Tessera
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persistence backend configuration
    pub store: StoreConfig,
    /// Cache tier configuration
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Self::default()).map_err(config_error)?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("TESSERA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error)
    }
}

fn config_error(e: ::config::ConfigError) -> Error {
    Error::configuration(e.to_string())
}

/// Which persistence backend to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-wide in-memory map
    #[default]
    Memory,
    /// Embedded redb database file
    Redb,
}

/// Persistence backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind
    pub backend: Backend,
    /// Database file for the redb backend
    pub path: PathBuf,
    /// Encoding used for stored records
    pub encoding: EncodingMode,
    /// Per-operation timeout in milliseconds (0 = none)
    pub timeout_ms: u64,
    /// Retries for retryable failures
    pub retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: PathBuf::from("tessera.redb"),
            encoding: EncodingMode::Binary,
            timeout_ms: 5_000,
            retries: 0,
        }
    }
}

impl StoreConfig {
    /// Per-operation timeout, if any
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Cache tier configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether the cache is consulted at all
    pub enabled: bool,
    /// Budget for a cache lookup before falling back to storage
    pub timeout_ms: u64,
    /// Default time-to-live for entries in seconds
    pub ttl_secs: u64,
    /// Eviction policy
    pub eviction: EvictionMode,
    /// Maximum number of entries
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 100,
            ttl_secs: 300,
            eviction: EvictionMode::Ttl,
            capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.store.timeout(), Some(Duration::from_secs(5)));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.eviction, EvictionMode::Ttl);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let store = StoreConfig {
            timeout_ms: 0,
            ..StoreConfig::default()
        };
        assert_eq!(store.timeout(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\nbackend = \"redb\"\npath = \"/tmp/models.redb\"\n\n[cache]\neviction = \"lru\"\ncapacity = 64"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.store.backend, Backend::Redb);
        assert_eq!(config.store.path, PathBuf::from("/tmp/models.redb"));
        assert_eq!(config.cache.eviction, EvictionMode::Lru);
        assert_eq!(config.cache.capacity, 64);
        // untouched values keep their defaults
        assert_eq!(config.cache.ttl_secs, 300);
    }
}
