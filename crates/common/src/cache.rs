//! In-memory query cache.
//!
//! Results are stored under a [`QueryKey`] made of a resource type followed by
//! the parameters identifying it (e.g. `synapse/room/<root>/<room id>`). An
//! entry older than `stale_time` is refetched on the next
//! [`QueryCache::get_or_fetch`]; an entry nobody touched for `gc_time` is
//! dropped by [`QueryCache::collect_garbage`].

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::debug;

use crate::time::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(vec![kind.into()])
    }

    #[must_use]
    pub fn with(mut self, part: impl Into<String>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    fetched_at_ms: u64,
    last_access_ms: u64,
}

pub struct QueryCache {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    stale_time: Duration,
    gc_time: Duration,
    clock: Arc<dyn Clock>,
}

impl QueryCache {
    pub fn new(stale_time: Duration, gc_time: Duration) -> Self {
        Self::with_clock(stale_time, gc_time, Arc::new(SystemClock))
    }

    pub fn with_clock(stale_time: Duration, gc_time: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stale_time,
            gc_time,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached value regardless of staleness.
    pub fn peek<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        entry.last_access_ms = now;
        entry.value.downcast_ref::<T>().cloned()
    }

    /// Return the cached value only while it is fresh.
    pub fn get_fresh<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if now.saturating_sub(entry.fetched_at_ms) >= self.stale_time.as_millis() as u64 {
            return None;
        }
        entry.last_access_ms = now;
        entry.value.downcast_ref::<T>().cloned()
    }

    pub fn insert<T>(&self, key: QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        self.lock().insert(key, Entry {
            value: Arc::new(value),
            fetched_at_ms: now,
            last_access_ms: now,
        });
    }

    /// Serve a fresh cached value or run `fetch` and cache its success.
    ///
    /// Errors are never cached.
    pub async fn get_or_fetch<T, E, F, Fut>(&self, key: QueryKey, fetch: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_fresh::<T>(&key) {
            debug!(%key, "query cache hit");
            return Ok(value);
        }
        debug!(%key, "query cache miss");
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn invalidate(&self, key: &QueryKey) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drop every entry whose key starts with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Evict entries not accessed within `gc_time`.
    pub fn collect_garbage(&self) -> usize {
        let now = self.clock.now_ms();
        let gc_ms = self.gc_time.as_millis() as u64;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_sub(entry.last_access_ms) < gc_ms);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "query cache garbage collected");
        }
        evicted
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn cache_with(clock: Arc<ManualClock>) -> QueryCache {
        QueryCache::with_clock(Duration::from_secs(60), Duration::from_secs(300), clock)
    }

    #[test]
    fn test_key_display_and_prefix() {
        let key = QueryKey::new("synapse").with("room").with("!a:example.com");
        assert_eq!(key.to_string(), "synapse/room/!a:example.com");
        assert!(key.starts_with(&QueryKey::new("synapse").with("room")));
        assert!(!key.starts_with(&QueryKey::new("synapse").with("rooms")));
    }

    #[tokio::test]
    async fn test_fresh_value_is_served_from_cache() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(clock.clone());
        let calls = AtomicUsize::new(0);
        let key = QueryKey::new("k");

        for _ in 0..3 {
            let value: Result<u32, ()> = cache
                .get_or_fetch(key.clone(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
            clock.advance(10_000);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_value_is_refetched() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(clock.clone());
        let key = QueryKey::new("k");

        let first: Result<u32, ()> = cache.get_or_fetch(key.clone(), || async { Ok(1) }).await;
        assert_eq!(first, Ok(1));
        clock.advance(60_000);
        let second: Result<u32, ()> = cache.get_or_fetch(key.clone(), || async { Ok(2) }).await;
        assert_eq!(second, Ok(2));
        assert_eq!(cache.peek::<u32>(&key), Some(2));
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache_with(Arc::new(ManualClock::default()));
        let key = QueryKey::new("k");

        let failed: Result<u32, &str> = cache.get_or_fetch(key.clone(), || async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_wrong_type_is_a_miss() {
        let cache = cache_with(Arc::new(ManualClock::default()));
        let key = QueryKey::new("k");
        cache.insert(key.clone(), 5_u32);
        assert_eq!(cache.peek::<String>(&key), None);
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = cache_with(Arc::new(ManualClock::default()));
        let tasks = QueryKey::new("synapse").with("scheduledTasks");
        cache.insert(tasks.clone().with("root").with("!a"), 1_u32);
        cache.insert(tasks.clone().with("root").with("!b"), 2_u32);
        cache.insert(QueryKey::new("synapse").with("room").with("!a"), 3_u32);

        assert_eq!(cache.invalidate_prefix(&tasks), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_collect_garbage_evicts_untouched_entries() {
        let clock = Arc::new(ManualClock::default());
        let cache = cache_with(clock.clone());
        let old = QueryKey::new("old");
        let busy = QueryKey::new("busy");
        cache.insert(old.clone(), 1_u32);
        cache.insert(busy.clone(), 2_u32);

        clock.advance(200_000);
        assert_eq!(cache.peek::<u32>(&busy), Some(2));
        clock.advance(200_000);

        assert_eq!(cache.collect_garbage(), 1);
        assert_eq!(cache.peek::<u32>(&old), None);
        assert_eq!(cache.peek::<u32>(&busy), Some(2));
    }
}
