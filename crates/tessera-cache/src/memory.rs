//! In-memory model cache
//!
//! Bounded map of shared, immutable models. Each entry carries an expiry
//! deadline, a logical-clock access stamp and a hit counter, so the victim on
//! overflow can be chosen by any [`EvictionMode`]:
//! - `Ttl`: earliest expiry
//! - `Lru`: oldest access
//! - `Lfu`: fewest hits, ties broken by oldest access
//!
//! Expired entries are misses in every mode and are dropped when seen.
//! Entries are keyed by the key record, so model types sharing a key type
//! share a slot; a lookup naming its model type never sees the other type.

use crate::driver::CacheDriver;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tessera_common::{EvictionMode, PendingOp, RecordKey, Result};
use tessera_model::metadata;
use tessera_model::{CacheOptions, FetchOptions, Model};
use tokio::runtime::Handle;
use tracing::debug;

static SHARED: LazyLock<InMemoryCache> =
    LazyLock::new(|| InMemoryCache::new(CacheOptions::default()));

struct CacheEntry {
    model: Arc<Model>,
    expires_at: Instant,
    /// Logical clock value of the last access
    last_access: AtomicU64,
    hits: AtomicU64,
}

impl CacheEntry {
    fn new(model: Arc<Model>, expires_at: Instant, clock: u64) -> Self {
        Self {
            model,
            expires_at,
            last_access: AtomicU64::new(clock),
            hits: AtomicU64::new(0),
        }
    }

    fn touch(&self, clock: u64) {
        self.last_access.store(clock, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses, expired entries included
    pub misses: AtomicU64,
    /// Number of entries evicted to make room
    pub evictions: AtomicU64,
    /// Number of entries dropped after their TTL
    pub expirations: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}

struct CacheInner {
    entries: RwLock<HashMap<RecordKey, CacheEntry>>,
    options: CacheOptions,
    /// Logical clock for access ordering
    clock: AtomicU64,
    stats: CacheStats,
}

impl CacheInner {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get(&self, key: &RecordKey, model_type: Option<&str>) -> Option<Arc<Model>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                // Another model type keyed by the same key type
                Some(entry)
                    if model_type.is_some_and(|expected| expected != entry.model.type_name()) =>
                {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    entry.touch(self.tick());
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.model.clone());
                }
                Some(_) => {}
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it unless a writer replaced it meanwhile
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn insert(&self, key: RecordKey, model: Arc<Model>) {
        let clock = self.tick();
        let expires_at = Instant::now() + self.options.default_ttl;
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) {
            let limit = self.options.capacity.max(1);
            while entries.len() >= limit {
                let Some(victim) = self.find_victim(&entries) else {
                    break;
                };
                entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %victim, mode = ?self.options.eviction, "Evicted cache entry");
            }
        }

        entries.insert(key, CacheEntry::new(model, expires_at, clock));
    }

    fn find_victim(&self, entries: &HashMap<RecordKey, CacheEntry>) -> Option<RecordKey> {
        let now = Instant::now();
        if let Some((key, _)) = entries.iter().find(|(_, entry)| entry.is_expired(now)) {
            return Some(key.clone());
        }

        let access = |entry: &CacheEntry| entry.last_access.load(Ordering::Relaxed);
        let victim = match self.options.eviction {
            EvictionMode::Ttl => entries
                .iter()
                .min_by_key(|(_, entry)| (entry.expires_at, access(entry))),
            EvictionMode::Lru => entries.iter().min_by_key(|(_, entry)| access(entry)),
            EvictionMode::Lfu => entries
                .iter()
                .min_by_key(|(_, entry)| (entry.hits.load(Ordering::Relaxed), access(entry))),
        };
        victim.map(|(key, _)| key.clone())
    }

    fn invalidate(&self, key: &RecordKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}

/// Bounded in-memory cache of shared models
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone)]
pub struct InMemoryCache {
    inner: Arc<CacheInner>,
}

impl InMemoryCache {
    /// Create a privately scoped cache
    #[must_use]
    pub fn new(options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: RwLock::new(HashMap::new()),
                options,
                clock: AtomicU64::new(0),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Process-wide cache with default options
    #[must_use]
    pub fn shared() -> Self {
        SHARED.clone()
    }

    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Get cache statistics
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }

    /// Number of entries, expired ones included until they are seen
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Check if a live entry exists, without touching it
    #[must_use]
    pub fn contains(&self, key: &RecordKey) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    fn put_key(key: &Model, model: &Model) -> Result<RecordKey> {
        match metadata::record_key(key) {
            Ok(record) => Ok(record),
            Err(e) => match metadata::key(model).ok().flatten() {
                Some(embedded) => metadata::record_key(&embedded),
                None => Err(e),
            },
        }
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("entries", &self.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheDriver for InMemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &Model, model: &Model, executor: &Handle) -> Result<()> {
        let record = Self::put_key(key, model)?;
        let inner = self.inner.clone();
        let model = Arc::new(model.clone());
        PendingOp::spawn(executor, async move {
            inner.insert(record, model);
            Ok(())
        })
        .await
    }

    async fn fetch(
        &self,
        key: &Model,
        options: &FetchOptions,
        executor: &Handle,
    ) -> Result<Option<Model>> {
        let record = metadata::record_key(key)?;
        let inner = self.inner.clone();
        let model_type = options.model_type.clone();
        let hit = PendingOp::spawn(executor, async move {
            Ok(inner.get(&record, model_type.as_deref()))
        })
        .await?;
        let Some(model) = hit else {
            return Ok(None);
        };
        match &options.mask {
            Some(mask) if !mask.is_empty() => {
                metadata::apply_mask(&model, mask, options.mask_mode).map(Some)
            }
            _ => Ok(Some(Model::clone(&model))),
        }
    }

    async fn evict(&self, key: &Model, executor: &Handle) -> Result<()> {
        let record = metadata::record_key(key)?;
        let inner = self.inner.clone();
        PendingOp::spawn(executor, async move {
            if inner.invalidate(&record) {
                debug!(key = %record, "Evicted cache entry on request");
            }
            Ok(())
        })
        .await
    }

    async fn evict_all(&self, keys: &[Model], executor: &Handle) -> Result<()> {
        let records = keys
            .iter()
            .map(metadata::record_key)
            .collect::<Result<Vec<_>>>()?;
        let inner = self.inner.clone();
        PendingOp::spawn(executor, async move {
            for record in &records {
                inner.invalidate(record);
            }
            Ok(())
        })
        .await
    }

    async fn flush(&self, executor: &Handle) -> Result<()> {
        let inner = self.inner.clone();
        PendingOp::spawn(executor, async move {
            let dropped = inner.clear();
            debug!(dropped, "Flushed cache");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_common::Error;
    use tessera_model::FieldMask;
    use tessera_model::test_support::{badge, john_doe, person, person_schema};

    fn key_of(id: &str) -> Model {
        metadata::key_for_id(&person_schema(), id).unwrap()
    }

    fn cache(eviction: EvictionMode, capacity: usize) -> InMemoryCache {
        InMemoryCache::new(
            CacheOptions::default()
                .with_eviction(eviction)
                .with_capacity(capacity),
        )
    }

    #[tokio::test]
    async fn test_put_then_fetch() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        let jane = person("p1", "Jane");

        cache.put(&key_of("p1"), &jane, &exec).await.unwrap();
        let hit = cache
            .fetch(&key_of("p1"), &FetchOptions::default(), &exec)
            .await
            .unwrap();
        assert_eq!(hit, Some(jane));
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let cache = cache(EvictionMode::Ttl, 16);
        let miss = cache
            .fetch(&key_of("nobody"), &FetchOptions::default(), &Handle::current())
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!(cache.stats().hit_ratio().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_put_falls_back_to_embedded_key() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        let jane = person("p2", "Jane");
        let blank_key = Model::new(&tessera_model::test_support::person_key_schema());

        cache.put(&blank_key, &jane, &exec).await.unwrap();
        assert!(cache.contains(&RecordKey::new("tessera.test.PersonKey", "p2")));

        let err = cache.put(&blank_key, &john_doe(), &exec).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_evict_and_flush() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        for id in ["a", "b", "c"] {
            cache.put(&key_of(id), &person(id, id), &exec).await.unwrap();
        }

        cache.evict(&key_of("a"), &exec).await.unwrap();
        cache.evict(&key_of("never-there"), &exec).await.unwrap();
        let options = FetchOptions::default();
        assert!(cache.fetch(&key_of("a"), &options, &exec).await.unwrap().is_none());
        assert!(cache.fetch(&key_of("b"), &options, &exec).await.unwrap().is_some());

        cache.evict_all(&[key_of("b")], &exec).await.unwrap();
        assert_eq!(cache.len(), 1);

        cache.flush(&exec).await.unwrap();
        assert!(cache.fetch(&key_of("c"), &options, &exec).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_evict_all_with_absent_keys() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        cache.put(&key_of("kept"), &person("kept", "K"), &exec).await.unwrap();
        cache.put(&key_of("gone"), &person("gone", "G"), &exec).await.unwrap();

        cache
            .evict_all(&[key_of("ghost"), key_of("gone"), key_of("phantom")], &exec)
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&RecordKey::new("tessera.test.PersonKey", "kept")));

        cache.evict_all(&[key_of("ghost")], &exec).await.unwrap();
        cache.evict_all(&[], &exec).await.unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_model_types_sharing_a_key_type() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        let ann = person("ann", "Ann");
        cache.put(&key_of("ann"), &ann, &exec).await.unwrap();

        let as_person = FetchOptions::default().for_type("tessera.test.Person");
        let as_badge = FetchOptions::default().for_type("tessera.test.Badge");
        assert_eq!(
            cache.fetch(&key_of("ann"), &as_person, &exec).await.unwrap(),
            Some(ann)
        );
        assert!(cache.fetch(&key_of("ann"), &as_badge, &exec).await.unwrap().is_none());
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);

        let gold = badge("ann", "gold");
        cache.put(&key_of("ann"), &gold, &exec).await.unwrap();
        assert!(cache.fetch(&key_of("ann"), &as_person, &exec).await.unwrap().is_none());
        assert_eq!(
            cache.fetch(&key_of("ann"), &as_badge, &exec).await.unwrap(),
            Some(gold)
        );
    }

    #[tokio::test]
    async fn test_fetch_applies_mask() {
        let cache = cache(EvictionMode::Ttl, 16);
        let exec = Handle::current();
        let john = metadata::splice_id(&john_doe(), Some("jd")).unwrap();
        cache.put(&key_of("jd"), &john, &exec).await.unwrap();

        let options = FetchOptions::masked(FieldMask::new(["name"]));
        let projected = cache
            .fetch(&key_of("jd"), &options, &exec)
            .await
            .unwrap()
            .unwrap();
        assert!(projected.has("name"));
        assert_eq!(projected.fields().count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCache::new(CacheOptions::default().with_ttl(Duration::from_millis(20)));
        let exec = Handle::current();
        cache.put(&key_of("t"), &person("t", "T"), &exec).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let miss = cache
            .fetch(&key_of("t"), &FetchOptions::default(), &exec)
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(cache.stats().expirations.load(Ordering::Relaxed), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = cache(EvictionMode::Lru, 2);
        let inner = &cache.inner;
        let a = RecordKey::new("T", "a");
        let b = RecordKey::new("T", "b");
        let c = RecordKey::new("T", "c");

        inner.insert(a.clone(), Arc::new(person("a", "A")));
        inner.insert(b.clone(), Arc::new(person("b", "B")));
        assert!(inner.get(&a, None).is_some());
        inner.insert(c.clone(), Arc::new(person("c", "C")));

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lfu_eviction_order() {
        let cache = cache(EvictionMode::Lfu, 2);
        let inner = &cache.inner;
        let a = RecordKey::new("T", "a");
        let b = RecordKey::new("T", "b");
        let c = RecordKey::new("T", "c");

        inner.insert(a.clone(), Arc::new(person("a", "A")));
        inner.insert(b.clone(), Arc::new(person("b", "B")));
        for _ in 0..3 {
            inner.get(&a, None);
        }
        inner.get(&b, None);
        // b is more recent but used less
        inner.insert(c.clone(), Arc::new(person("c", "C")));

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn test_ttl_eviction_order() {
        let cache = cache(EvictionMode::Ttl, 2);
        let inner = &cache.inner;
        let a = RecordKey::new("T", "a");
        let b = RecordKey::new("T", "b");
        let c = RecordKey::new("T", "c");

        inner.insert(a.clone(), Arc::new(person("a", "A")));
        std::thread::sleep(Duration::from_millis(2));
        inner.insert(b.clone(), Arc::new(person("b", "B")));
        // touching a does not extend its deadline
        inner.get(&a, None);
        inner.insert(c.clone(), Arc::new(person("c", "C")));

        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn test_replacing_does_not_evict() {
        let cache = cache(EvictionMode::Lru, 1);
        let a = RecordKey::new("T", "a");
        cache.inner.insert(a.clone(), Arc::new(person("a", "A")));
        cache.inner.insert(a.clone(), Arc::new(person("a", "A2")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stats_reset() {
        let cache = cache(EvictionMode::Lru, 4);
        let a = RecordKey::new("T", "a");
        cache.inner.insert(a.clone(), Arc::new(person("a", "A")));
        cache.inner.get(&a, None);
        cache.inner.get(&RecordKey::new("T", "z"), None);
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
        cache.stats().reset();
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_shared_instance() {
        let a = InMemoryCache::shared();
        let b = InMemoryCache::shared();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }
}
