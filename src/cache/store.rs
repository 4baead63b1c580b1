//! LRU + TTL key/value store with a byte budget.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use super::disk::{self, DiskEntry, DiskJob, DiskWriter};
use super::{CacheError, CacheOptions};

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Successful lookups.
    pub hits: u64,
    /// Lookups that found nothing (or an expired entry).
    pub misses: u64,
    /// Entries removed to make room for new ones.
    pub evictions: u64,
    /// Sum of `size_bytes` over live entries.
    pub total_size: usize,
    /// Number of live entries.
    pub entry_count: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `0.0` before any lookup.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    size_bytes: usize,
    created_at: SystemTime,
    /// Logical clock value of the most recent access.
    last_access: AtomicU64,
    hit_count: AtomicU64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_size: usize,
}

impl<V> Inner<V> {
    /// Key of the least recently accessed entry.
    fn lru_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
            .map(|(k, _)| k.clone())
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

/// State shared with the sweeper thread.
struct Shared<V> {
    inner: RwLock<Inner<V>>,
    options: CacheOptions,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writer: Mutex<Option<DiskWriter<V>>>,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl<V> Shared<V> {
    fn read(&self) -> RwLockReadGuard<'_, Inner<V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: SystemTime) -> bool {
        now.duration_since(entry.created_at)
            .is_ok_and(|age| age > self.options.ttl)
    }

    /// Queue a disk job if persistence is enabled. Never blocks on I/O.
    fn persist(&self, job: DiskJob<V>) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = writer.as_ref() {
            writer.submit(job);
        }
    }

    fn persistent(&self) -> bool {
        self.options.persist_dir.is_some()
    }

    fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut inner = self.write();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
            if self.persistent() {
                self.persist(DiskJob::Remove(key.clone()));
            }
        }
        if !expired.is_empty() {
            tracing::debug!("cache sweep removed {} expired entries", expired.len());
        }
        expired.len()
    }
}

/// Thread-safe cache with a byte budget, LRU eviction and TTL expiry.
///
/// Reads take a shared lock; access stamps and hit counts are atomics so
/// concurrent `get`s never contend for the write lock. When persistence is
/// enabled, every change is mirrored to disk by a background thread and the
/// store reloads surviving entries on construction.
pub struct CacheStore<V> {
    shared: Arc<Shared<V>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.read();
        f.debug_struct("CacheStore")
            .field("entries", &inner.entries.len())
            .field("total_size", &inner.total_size)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store, reloading persisted entries and starting the sweeper.
    #[must_use]
    pub fn new(options: CacheOptions) -> Self {
        let writer = options.persist_dir.as_ref().and_then(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!("cache persistence disabled, cannot create {}: {e}", dir.display());
                return None;
            }
            Some(dir.clone())
        });
        let loaded = writer
            .as_deref()
            .map(|dir| disk::load_entries::<V>(dir, options.ttl))
            .unwrap_or_default();
        let sweep_interval = options.sweep_interval;

        let shared = Arc::new(Shared {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                total_size: 0,
            }),
            writer: Mutex::new(writer.map(DiskWriter::spawn)),
            options,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });

        let store = Self {
            sweeper: spawn_sweeper(&shared, sweep_interval),
            shared,
        };
        store.restore(loaded);
        store
    }

    /// Reinsert entries read from disk (oldest first, so newest are most recent).
    fn restore(&self, loaded: Vec<DiskEntry<V>>) {
        if loaded.is_empty() {
            return;
        }
        let count = loaded.len();
        let mut inner = self.shared.write();
        for entry in loaded {
            let created_at = entry.created_at();
            self.insert_locked(&mut inner, entry.key, entry.value, entry.size_bytes, created_at, false);
        }
        tracing::debug!("cache reloaded {count} persisted entries");
    }

    /// Look up `key`, refreshing its recency.
    ///
    /// Expired entries count as misses and are removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = SystemTime::now();
        let expired = {
            let inner = self.shared.read();
            match inner.entries.get(key) {
                Some(entry) if !self.shared.is_expired(entry, now) => {
                    entry.last_access.store(self.shared.tick(), Ordering::Relaxed);
                    entry.hit_count.fetch_add(1, Ordering::Relaxed);
                    self.shared.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            }
        };
        self.shared.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            let mut inner = self.shared.write();
            if inner
                .entries
                .get(key)
                .is_some_and(|e| self.shared.is_expired(e, now))
            {
                inner.remove(key);
                if self.shared.persistent() {
                    self.shared.persist(DiskJob::Remove(key.to_string()));
                }
            }
        }
        None
    }

    /// Insert or replace `key`, evicting least recently used entries until
    /// the byte budget allows it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::TooLarge`] if `size_bytes` alone exceeds the
    /// budget; the cache is left unchanged.
    pub fn set(&self, key: impl Into<String>, value: V, size_bytes: usize) -> Result<(), CacheError> {
        let key = key.into();
        let capacity = self.shared.options.max_size;
        if size_bytes > capacity {
            return Err(CacheError::TooLarge {
                key,
                size: size_bytes,
                capacity,
            });
        }
        let mut inner = self.shared.write();
        self.insert_locked(&mut inner, key, value, size_bytes, SystemTime::now(), true);
        Ok(())
    }

    fn insert_locked(
        &self,
        inner: &mut Inner<V>,
        key: String,
        value: V,
        size_bytes: usize,
        created_at: SystemTime,
        persist: bool,
    ) {
        let capacity = self.shared.options.max_size;
        if size_bytes > capacity {
            return;
        }
        inner.remove(&key);
        while inner.total_size + size_bytes > capacity {
            let Some(victim) = inner.lru_key() else { break };
            inner.remove(&victim);
            self.shared.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("cache evicted '{victim}'");
            if self.shared.persistent() {
                self.shared.persist(DiskJob::Remove(victim));
            }
        }
        if persist && self.shared.persistent() {
            self.shared.persist(DiskJob::Write(DiskEntry {
                key: key.clone(),
                value: value.clone(),
                size_bytes,
                created_at_ms: disk::to_millis(created_at),
            }));
        }
        inner.total_size += size_bytes;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                created_at,
                last_access: AtomicU64::new(self.shared.tick()),
                hit_count: AtomicU64::new(0),
            },
        );
    }
}

impl<V> CacheStore<V> {
    /// Remove `key`. Returns `true` if it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.shared.write();
        let removed = inner.remove(key).is_some();
        if removed && self.shared.persistent() {
            self.shared.persist(DiskJob::Remove(key.to_string()));
        }
        drop(inner);
        removed
    }

    /// Remove every key matching a glob `pattern` (e.g. `"kitty:*"`).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] if `pattern` is not a valid glob.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher = glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        let mut inner = self.shared.write();
        let matched: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect();
        for key in &matched {
            inner.remove(key);
            if self.shared.persistent() {
                self.shared.persist(DiskJob::Remove(key.clone()));
            }
        }
        Ok(matched.len())
    }

    /// Remove every entry (counters are kept).
    pub fn clear(&self) {
        let mut inner = self.shared.write();
        if self.shared.persistent() {
            for key in inner.entries.keys() {
                self.shared.persist(DiskJob::Remove(key.clone()));
            }
        }
        inner.entries.clear();
        inner.total_size = 0;
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.shared.read();
        CacheStats {
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
            total_size: inner.total_size,
            entry_count: inner.entries.len(),
        }
    }

    /// Number of times `key` has been served, if present.
    #[must_use]
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.shared
            .read()
            .entries
            .get(key)
            .map(|e| e.hit_count.load(Ordering::Relaxed))
    }

    /// Whether `key` is present (expired or not), without touching recency.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.shared.read().entries.contains_key(key)
    }

    /// Block until queued disk writes have been applied.
    pub fn flush(&self) {
        let writer = self.shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(writer) = writer.as_ref() {
            writer.flush();
        }
    }
}

fn spawn_sweeper<V>(shared: &Arc<Shared<V>>, interval: Duration) -> Option<JoinHandle<()>>
where
    V: Send + Sync + 'static,
{
    if interval.is_zero() {
        return None;
    }
    let shared = Arc::clone(shared);
    std::thread::Builder::new()
        .name("cache-sweeper".to_string())
        .spawn(move || {
            let mut stopped = shared.stop.lock().unwrap_or_else(PoisonError::into_inner);
            while !*stopped {
                let (guard, timeout) = shared
                    .wake
                    .wait_timeout(stopped, interval)
                    .unwrap_or_else(PoisonError::into_inner);
                stopped = guard;
                if !*stopped && timeout.timed_out() {
                    drop(stopped);
                    shared.purge_expired();
                    stopped = shared.stop.lock().unwrap_or_else(PoisonError::into_inner);
                }
            }
        })
        .map_err(|e| tracing::warn!("cache sweeper not started: {e}"))
        .ok()
}

impl<V> Drop for CacheStore<V> {
    fn drop(&mut self) {
        *self.shared.stop.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.sweeper.take()
            && handle.join().is_err()
        {
            tracing::warn!("cache sweeper thread panicked");
        }
        let writer = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(writer);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::thread;

    fn store(max_size: usize) -> CacheStore<String> {
        CacheStore::new(
            CacheOptions::default()
                .with_max_size(max_size)
                .with_sweep_interval(Duration::ZERO),
        )
    }

    // ------------------------------------------------------------------
    // get / set
    // ------------------------------------------------------------------

    #[test]
    fn set_then_get_returns_value() {
        let cache = store(1024);
        cache.set("k", "value".to_string(), 5).unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("value"));
        assert_eq!(cache.hit_count("k"), Some(1));
    }

    #[test]
    fn miss_is_counted() {
        let cache = store(1024);
        assert!(cache.get("absent").is_none());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
    }

    #[test]
    fn replacing_a_key_updates_size() {
        let cache = store(1024);
        cache.set("k", "a".to_string(), 100).unwrap();
        cache.set("k", "b".to_string(), 10).unwrap();
        let stats = cache.stats();
        assert_eq!((stats.entry_count, stats.total_size), (1, 10));
        assert_eq!(cache.get("k").as_deref(), Some("b"));
    }

    #[test]
    fn oversized_value_is_rejected() {
        let cache = store(10);
        let err = cache.set("big", "x".to_string(), 11).unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { size: 11, capacity: 10, .. }));
        assert_eq!(cache.stats().entry_count, 0);
    }

    // ------------------------------------------------------------------
    // TTL
    // ------------------------------------------------------------------

    #[test]
    fn entries_expire_after_ttl() {
        let cache: CacheStore<String> = CacheStore::new(
            CacheOptions::default()
                .with_ttl(Duration::from_millis(50))
                .with_sweep_interval(Duration::ZERO),
        );
        cache.set("k", "v".to_string(), 1).unwrap();
        assert!(cache.get("k").is_some());
        thread::sleep(Duration::from_millis(120));
        assert!(cache.get("k").is_none(), "entry should have expired");
        assert!(!cache.contains("k"), "expired entry should be removed on access");
    }

    #[test]
    fn purge_expired_removes_stale_entries() {
        let cache: CacheStore<String> = CacheStore::new(
            CacheOptions::default()
                .with_ttl(Duration::from_millis(20))
                .with_sweep_interval(Duration::ZERO),
        );
        cache.set("a", "1".to_string(), 1).unwrap();
        cache.set("b", "2".to_string(), 1).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.stats().total_size, 0);
    }

    #[test]
    fn sweeper_removes_expired_entries_in_background() {
        let cache: CacheStore<String> = CacheStore::new(
            CacheOptions::default()
                .with_ttl(Duration::from_millis(10))
                .with_sweep_interval(Duration::from_millis(20)),
        );
        cache.set("k", "v".to_string(), 1).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.contains("k") && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!cache.contains("k"), "sweeper should have removed the entry");
    }

    // ------------------------------------------------------------------
    // LRU
    // ------------------------------------------------------------------

    #[test]
    fn evicts_least_recently_used_first() {
        let cache = store(30);
        cache.set("a", "a".to_string(), 10).unwrap();
        cache.set("b", "b".to_string(), 10).unwrap();
        cache.set("c", "c".to_string(), 10).unwrap();

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("a").is_some());
        cache.set("d", "d".to_string(), 10).unwrap();

        assert!(cache.contains("a"), "recently read entry must survive");
        assert!(!cache.contains("b"), "least recently used entry must go");
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn evicts_as_many_as_needed() {
        let cache = store(30);
        for key in ["a", "b", "c"] {
            cache.set(key, key.to_string(), 10).unwrap();
        }
        cache.set("big", "x".to_string(), 25).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.evictions, 3);
        assert!(stats.total_size <= 30);
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    #[test]
    fn invalidate_by_pattern_matches_glob() {
        let cache = store(1024);
        cache.set("kitty:dark:1", "a".to_string(), 1).unwrap();
        cache.set("kitty:light:2", "b".to_string(), 1).unwrap();
        cache.set("gtk:dark:3", "c".to_string(), 1).unwrap();
        assert_eq!(cache.invalidate_by_pattern("kitty:*").unwrap(), 2);
        assert!(cache.contains("gtk:dark:3"));
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let cache = store(1024);
        assert!(matches!(
            cache.invalidate_by_pattern("[").unwrap_err(),
            CacheError::InvalidPattern { .. }
        ));
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = store(1024);
        cache.set("a", "1".to_string(), 1).unwrap();
        cache.set("b", "2".to_string(), 1).unwrap();
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert_eq!(cache.stats().entry_count, 0);
        assert_eq!(cache.stats().total_size, 0);
    }

    // ------------------------------------------------------------------
    // Concurrency
    // ------------------------------------------------------------------

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = Arc::new(store(64 * 1024));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("{t}:{i}");
                        cache.set(key.clone(), key.clone(), 8).unwrap();
                        assert_eq!(cache.get(&key), Some(key));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = cache.stats();
        assert_eq!(stats.hits, 800);
        assert_eq!(stats.entry_count, 800);
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    #[test]
    fn persisted_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions::default()
            .with_sweep_interval(Duration::ZERO)
            .with_persist_dir(dir.path());
        {
            let cache: CacheStore<String> = CacheStore::new(opts.clone());
            cache.set("kitty:dark:abc", "rendered".to_string(), 8).unwrap();
            cache.set("gone", "x".to_string(), 1).unwrap();
            cache.invalidate("gone");
        }
        let reloaded: CacheStore<String> = CacheStore::new(opts);
        assert_eq!(reloaded.get("kitty:dark:abc").as_deref(), Some("rendered"));
        assert!(reloaded.get("gone").is_none());
        assert_eq!(reloaded.stats().total_size, 8);
    }

    #[test]
    fn racing_set_and_invalidate_leave_disk_matching_memory() {
        let dir = tempfile::tempdir().unwrap();
        let opts = CacheOptions::default()
            .with_sweep_interval(Duration::ZERO)
            .with_persist_dir(dir.path());
        for _ in 0..20 {
            let cache: Arc<CacheStore<String>> = Arc::new(CacheStore::new(opts.clone()));
            let writer = {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..50 {
                        cache.set("kitty", "rendered".to_string(), 8).unwrap();
                    }
                })
            };
            let remover = {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..50 {
                        cache.invalidate("kitty");
                    }
                })
            };
            writer.join().unwrap();
            remover.join().unwrap();
            let in_memory = cache.contains("kitty");
            cache.flush();
            drop(cache);

            let reloaded: CacheStore<String> = CacheStore::new(opts.clone());
            assert_eq!(reloaded.contains("kitty"), in_memory);
            reloaded.clear();
            reloaded.flush();
        }
    }

    #[test]
    fn clear_removes_persisted_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache: CacheStore<String> = CacheStore::new(
            CacheOptions::default()
                .with_sweep_interval(Duration::ZERO)
                .with_persist_dir(dir.path()),
        );
        cache.set("a", "1".to_string(), 1).unwrap();
        cache.flush();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        cache.clear();
        cache.flush();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!(CacheStats::default().hit_rate().abs() < f64::EPSILON);
    }
}
