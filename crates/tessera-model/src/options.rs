//! Per-call option value objects
//!
//! Options are plain values with builder-style setters. Unset executors fall
//! back to the driver's own runtime handle; unset timeouts mean no budget.

use crate::mask::FieldMask;
use std::time::{Duration, SystemTime};
use tessera_common::config::{CacheConfig, StoreConfig};
use tessera_common::op::Attempts;
use tessera_common::{EvictionMode, MaskMode, WriteDisposition};
use tokio::runtime::Handle;

/// Options for a read
#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Field projection applied before the model is returned
    pub mask: Option<FieldMask>,
    pub mask_mode: MaskMode,
    /// Executor for this call, instead of the driver default
    pub executor: Option<Handle>,
    /// Budget for each attempt
    pub timeout: Option<Duration>,
    /// Extra attempts after a timeout or unavailable backend
    pub retries: u32,
    /// Whether the adapter may consult and populate the cache
    pub enable_cache: bool,
    /// Model type the caller expects; a cached model of any other type is
    /// a miss
    pub model_type: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            mask: None,
            mask_mode: MaskMode::Include,
            executor: None,
            timeout: None,
            retries: 0,
            enable_cache: true,
            model_type: None,
        }
    }
}

impl FetchOptions {
    /// Read only the masked fields
    #[must_use]
    pub fn masked(mask: FieldMask) -> Self {
        Self::default().with_mask(mask, MaskMode::Include)
    }

    #[must_use]
    pub fn with_mask(mut self, mask: FieldMask, mode: MaskMode) -> Self {
        self.mask = Some(mask);
        self.mask_mode = mode;
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }

    #[must_use]
    pub fn for_type(mut self, type_name: impl Into<String>) -> Self {
        self.model_type = Some(type_name.into());
        self
    }

    /// Check if a non-empty mask is requested
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask.as_ref().is_some_and(|mask| !mask.is_empty())
    }

    /// Executor for this call, or `default`
    #[must_use]
    pub fn executor_or(&self, default: &Handle) -> Handle {
        self.executor.clone().unwrap_or_else(|| default.clone())
    }

    #[must_use]
    pub const fn attempts(&self) -> Attempts {
        Attempts {
            timeout: self.timeout,
            retries: self.retries,
            final_on_timeout: false,
        }
    }

    /// Defaults with the store's timeout and retry policy
    #[must_use]
    pub fn from_store_config(config: &StoreConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            ..Self::default()
        }
    }
}

/// Options for a write or delete
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub disposition: WriteDisposition,
    pub executor: Option<Handle>,
    pub timeout: Option<Duration>,
    pub retries: u32,
    /// Only write if the stored record was last written at exactly this time
    pub updated_at: Option<SystemTime>,
}

impl WriteOptions {
    #[must_use]
    pub fn blind() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn must_exist() -> Self {
        Self::with_disposition(WriteDisposition::MustExist)
    }

    #[must_use]
    pub fn must_not_exist() -> Self {
        Self::with_disposition(WriteDisposition::MustNotExist)
    }

    #[must_use]
    pub fn with_disposition(disposition: WriteDisposition) -> Self {
        Self {
            disposition,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Require the stored record's last write time to match
    #[must_use]
    pub const fn if_updated_at(mut self, updated_at: SystemTime) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    #[must_use]
    pub fn executor_or(&self, default: &Handle) -> Handle {
        self.executor.clone().unwrap_or_else(|| default.clone())
    }

    #[must_use]
    pub const fn attempts(&self) -> Attempts {
        Attempts {
            timeout: self.timeout,
            retries: self.retries,
            final_on_timeout: false,
        }
    }

    /// Blind writes with the store's timeout and retry policy
    #[must_use]
    pub fn from_store_config(config: &StoreConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retries: config.retries,
            ..Self::default()
        }
    }
}

/// Cache tier behaviour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheOptions {
    pub enabled: bool,
    /// How long a read waits on the cache before falling back to storage
    pub timeout: Duration,
    pub default_ttl: Duration,
    pub eviction: EvictionMode,
    /// Entry bound before eviction kicks in
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            default_ttl: Duration::from_secs(config.ttl_secs),
            eviction: config.eviction,
            capacity: config.capacity,
        }
    }
}

impl CacheOptions {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_eviction(mut self, eviction: EvictionMode) -> Self {
        self.eviction = eviction;
        self
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_defaults() {
        let options = FetchOptions::default();
        assert!(options.enable_cache);
        assert!(!options.is_masked());
        assert_eq!(options.mask_mode, MaskMode::Include);

        let masked = FetchOptions::masked(FieldMask::new(["name"]));
        assert!(masked.is_masked());
        assert!(!FetchOptions::masked(FieldMask::default()).is_masked());
    }

    #[test]
    fn test_write_constructors() {
        assert_eq!(WriteOptions::blind().disposition, WriteDisposition::Blind);
        assert_eq!(
            WriteOptions::must_exist().disposition,
            WriteDisposition::MustExist
        );
        let options = WriteOptions::must_not_exist()
            .with_timeout(Duration::from_millis(250))
            .with_retries(2);
        assert_eq!(options.disposition, WriteDisposition::MustNotExist);
        let attempts = options.attempts();
        assert_eq!(attempts.timeout, Some(Duration::from_millis(250)));
        assert_eq!(attempts.retries, 2);
    }

    #[test]
    fn test_cache_options_from_config() {
        let config = CacheConfig {
            enabled: false,
            timeout_ms: 25,
            ttl_secs: 60,
            eviction: EvictionMode::Lfu,
            capacity: 8,
        };
        let options = CacheOptions::from(&config);
        assert!(!options.enabled);
        assert_eq!(options.timeout, Duration::from_millis(25));
        assert_eq!(options.default_ttl, Duration::from_secs(60));
        assert_eq!(options.eviction, EvictionMode::Lfu);
        assert_eq!(options.capacity, 8);

        assert_eq!(CacheOptions::default().timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_store_config_policy() {
        let config = StoreConfig {
            timeout_ms: 0,
            retries: 3,
            ..StoreConfig::default()
        };
        let options = WriteOptions::from_store_config(&config);
        assert_eq!(options.timeout, None);
        assert_eq!(options.retries, 3);
    }
}
