//! Model adapter
//!
//! Binds one persistence driver to an optional cache. Reads consult the
//! cache first under a time budget and fall back to storage on a miss, an
//! error or a timeout. Cache failures never fail a call.
//!
//! A storage read populates the cache in the background. Every key maps to
//! one of a fixed set of write generations: writes and deletes advance the
//! key's generation and update the cache while holding it, and a populate
//! only lands if the generation it read under is still current. A populate
//! that loses the race to a write is dropped.

use crate::driver::PersistenceDriver;
use futures::Stream;
use std::hash::{BuildHasher, RandomState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tessera_cache::CacheDriver;
use tessera_common::{PendingOp, Result, WriteDisposition};
use tessera_model::{CacheOptions, FetchOptions, Model, ModelCodec, WriteOptions, metadata};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const GENERATION_STRIPES: u64 = 64;

/// Evict attempts before an entry is reported as possibly stale
const EVICT_ATTEMPTS: u32 = 2;

/// Adapter counters
#[derive(Debug, Default)]
pub struct AdapterStats {
    pub cache_hits: AtomicU64,
    /// Reads served by storage after a cache miss, error or timeout
    pub cache_fallbacks: AtomicU64,
    pub populate_failures: AtomicU64,
    /// Populates dropped because a write overtook them
    pub populates_dropped: AtomicU64,
    /// Entries that could not be evicted after a write, delete or failed
    /// refresh and may be stale until they expire
    pub invalidation_failures: AtomicU64,
}

impl AdapterStats {
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cache_fallbacks(&self) -> u64 {
        self.cache_fallbacks.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn populate_failures(&self) -> u64 {
        self.populate_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn populates_dropped(&self) -> u64 {
        self.populates_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn invalidation_failures(&self) -> u64 {
        self.invalidation_failures.load(Ordering::Relaxed)
    }
}

type Generations = Arc<[Mutex<u64>]>;

/// Storage engine plus optional front cache for one model type
#[derive(Clone)]
pub struct ModelAdapter {
    engine: Arc<dyn PersistenceDriver>,
    cache: Option<Arc<dyn CacheDriver>>,
    cache_options: CacheOptions,
    stats: Arc<AdapterStats>,
    generations: Generations,
    hasher: RandomState,
}

impl ModelAdapter {
    /// Adapter without a cache
    #[must_use]
    pub fn new(engine: Arc<dyn PersistenceDriver>) -> Self {
        Self {
            engine,
            cache: None,
            cache_options: CacheOptions::disabled(),
            stats: Arc::new(AdapterStats::default()),
            generations: (0..GENERATION_STRIPES).map(|_| Mutex::new(0)).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Put `cache` in front of the engine
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheDriver>, options: CacheOptions) -> Self {
        self.cache = Some(cache);
        self.cache_options = options;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn PersistenceDriver> {
        &self.engine
    }

    #[must_use]
    pub fn cache(&self) -> Option<&Arc<dyn CacheDriver>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn cache_options(&self) -> &CacheOptions {
        &self.cache_options
    }

    #[must_use]
    pub fn codec(&self) -> &Arc<dyn ModelCodec> {
        self.engine.codec()
    }

    #[must_use]
    pub fn stats(&self) -> &AdapterStats {
        &self.stats
    }

    /// Active cache, if configured and enabled
    fn active_cache(&self) -> Option<&Arc<dyn CacheDriver>> {
        self.cache.as_ref().filter(|_| self.cache_options.enabled)
    }

    /// Generation stripe of a key; `None` for keys without an ID
    fn stripe(&self, key: &Model) -> Option<usize> {
        let record = metadata::record_key(key).ok()?;
        usize::try_from(self.hasher.hash_one(&record) % GENERATION_STRIPES).ok()
    }

    /// Advance the key's generation, holding it until the guard drops
    async fn advance(&self, key: &Model) -> Option<MutexGuard<'_, u64>> {
        let mut generation = self.generations[self.stripe(key)?].lock().await;
        *generation = generation.wrapping_add(1);
        Some(generation)
    }

    /// Read a model, cache first
    pub async fn retrieve(&self, key: &Model, options: &FetchOptions) -> Result<Option<Model>> {
        let executor = options.executor_or(self.engine.executor());
        let cache = self.active_cache().filter(|_| options.enable_cache);

        if let Some(cache) = cache {
            let lookup = options.clone().for_type(self.engine.schema().full_name());
            match tokio::time::timeout(
                self.cache_options.timeout,
                cache.fetch(key, &lookup, &executor),
            )
            .await
            {
                Ok(Ok(Some(hit))) => {
                    self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(cache = cache.name(), "Cache hit");
                    return Ok(Some(hit));
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(cache = cache.name(), error = %e, "Cache lookup failed"),
                Err(_) => warn!(
                    cache = cache.name(),
                    timeout_ms = self.cache_options.timeout.as_millis(),
                    "Cache lookup timed out"
                ),
            }
            self.stats.cache_fallbacks.fetch_add(1, Ordering::Relaxed);
        }

        // Projected reads never populate the cache
        let populate = match cache.filter(|_| !options.is_masked()) {
            Some(cache) => match self.stripe(key) {
                Some(stripe) => Some((cache, stripe, *self.generations[stripe].lock().await)),
                None => None,
            },
            None => None,
        };

        let found = self.engine.retrieve(key, options).await?;

        if let (Some((cache, stripe, generation)), Some(model)) = (populate, &found) {
            let populate = Populate {
                cache: cache.clone(),
                generations: self.generations.clone(),
                stripe,
                generation,
                key: key.clone(),
                model: model.clone(),
                timeout: self.cache_options.timeout,
                stats: self.stats.clone(),
            };
            let populate_on = executor.clone();
            executor.spawn(async move { populate.run(&populate_on).await });
        }
        Ok(found)
    }

    /// Write a model, then refresh its cache entry
    pub async fn persist(
        &self,
        key: Option<&Model>,
        model: &Model,
        options: &WriteOptions,
    ) -> Result<Model> {
        let written = self.engine.persist(key, model, options).await;
        if let Some(cache) = self.active_cache() {
            let executor = options.executor_or(self.engine.executor());
            match &written {
                Ok(saved) => {
                    if let Ok(Some(saved_key)) = metadata::key(saved) {
                        let _generation = self.advance(&saved_key).await;
                        self.refresh(cache, &saved_key, saved, &executor).await;
                    }
                }
                Err(e) if may_have_written(e) => {
                    if let Some(key) = key {
                        let _generation = self.advance(key).await;
                        self.invalidate(cache, key, &executor).await;
                    }
                }
                Err(_) => {}
            }
        }
        written
    }

    async fn refresh(
        &self,
        cache: &Arc<dyn CacheDriver>,
        key: &Model,
        saved: &Model,
        executor: &Handle,
    ) {
        match tokio::time::timeout(self.cache_options.timeout, cache.put(key, saved, executor))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => warn!(cache = cache.name(), error = %e, "Cache refresh failed"),
            Err(_) => warn!(cache = cache.name(), "Cache refresh timed out"),
        }
        self.stats.populate_failures.fetch_add(1, Ordering::Relaxed);
        self.invalidate(cache, key, executor).await;
    }

    /// Drop a cache entry that may no longer match storage
    async fn invalidate(&self, cache: &Arc<dyn CacheDriver>, key: &Model, executor: &Handle) {
        for attempt in 1..=EVICT_ATTEMPTS {
            match tokio::time::timeout(self.cache_options.timeout, cache.evict(key, executor)).await
            {
                Ok(Ok(())) => return,
                Ok(Err(e)) => warn!(cache = cache.name(), attempt, error = %e, "Cache evict failed"),
                Err(_) => warn!(cache = cache.name(), attempt, "Cache evict timed out"),
            }
        }
        self.stats.invalidation_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            cache = cache.name(),
            type_name = self.engine.schema().full_name(),
            "Cache entry may be stale until it expires"
        );
    }

    /// Delete a record and drop its cache entry
    pub async fn delete_with(&self, key: &Model, options: &WriteOptions) -> Result<Model> {
        let deleted = self.engine.delete(key, options).await;
        if let Some(cache) = self.active_cache()
            && deleted.as_ref().err().is_none_or(may_have_written)
        {
            let executor = options.executor_or(self.engine.executor());
            let _generation = self.advance(key).await;
            self.invalidate(cache, key, &executor).await;
        }
        deleted
    }

    /// Last write time of the stored record
    pub async fn last_updated(&self, key: &Model) -> Result<Option<SystemTime>> {
        self.engine.last_updated(key).await
    }

    /// Store a new model under a generated key
    pub async fn create(&self, model: &Model) -> Result<Model> {
        self.persist(None, model, &WriteOptions::must_not_exist())
            .await
    }

    /// Overwrite an existing record
    pub async fn update(&self, key: &Model, model: &Model) -> Result<Model> {
        self.persist(Some(key), model, &WriteOptions::must_exist())
            .await
    }

    /// Write regardless of what is stored
    pub async fn put(&self, key: &Model, model: &Model) -> Result<Model> {
        self.persist(
            Some(key),
            model,
            &WriteOptions::with_disposition(WriteDisposition::Blind),
        )
        .await
    }

    pub async fn delete(&self, key: &Model) -> Result<Model> {
        self.delete_with(key, &WriteOptions::blind()).await
    }

    /// Read with default options
    pub async fn fetch(&self, key: &Model) -> Result<Option<Model>> {
        self.retrieve(key, &FetchOptions::default()).await
    }

    /// Read with default options, logging and swallowing failures
    pub async fn fetch_safe(&self, key: &Model) -> Option<Model> {
        match self.fetch(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(type_name = key.type_name(), error = %e, "Fetch failed");
                None
            }
        }
    }

    /// Read on the engine's executor as a cancellable operation
    pub fn fetch_async(&self, key: &Model) -> PendingOp<Option<Model>> {
        let adapter = self.clone();
        let key = key.clone();
        PendingOp::spawn(self.engine.executor(), async move { adapter.fetch(&key).await })
    }

    /// Read as a stream of zero or one models
    pub fn fetch_reactive(&self, key: &Model) -> impl Stream<Item = Result<Model>> + use<> {
        self.fetch_async(key).into_item_stream()
    }
}

/// Whether a failed write may still have reached storage
fn may_have_written(error: &tessera_common::Error) -> bool {
    !error.is_conflict() && !error.is_caller_error()
}

/// Background cache fill after a storage read
struct Populate {
    cache: Arc<dyn CacheDriver>,
    generations: Generations,
    stripe: usize,
    /// Generation the storage read started under
    generation: u64,
    key: Model,
    model: Model,
    timeout: std::time::Duration,
    stats: Arc<AdapterStats>,
}

impl Populate {
    async fn run(self, executor: &Handle) {
        let current = self.generations[self.stripe].lock().await;
        if *current != self.generation {
            self.stats.populates_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(cache = self.cache.name(), "Dropped cache populate overtaken by a write");
            return;
        }
        let failure = match tokio::time::timeout(
            self.timeout,
            self.cache.put(&self.key, &self.model, executor),
        )
        .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };
        self.stats.populate_failures.fetch_add(1, Ordering::Relaxed);
        warn!(cache = self.cache.name(), error = %failure, "Cache populate failed");
    }
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("engine", &self.engine.name())
            .field("cache", &self.cache.as_ref().map(|cache| cache.name()))
            .field("cache_options", &self.cache_options)
            .finish_non_exhaustive()
    }
}
