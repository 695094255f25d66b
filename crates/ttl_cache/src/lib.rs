//! A string-keyed map with per-entry expiry, a background sweep, and an
//! optional release hook for resource cleanup.
//!
//! Values are shared, not cloned: `get` hands out `Arc`s and callers treat
//! them as read-only. The release hook runs for every displaced entry --
//! expiry, manual removal, overwrite, or `clear` -- exactly once per entry,
//! and always outside the cache lock so hooks may take their time.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use common::runtime::{
    Runtime,
    SpawnHandle,
};
use parking_lot::Mutex;

mod metrics;

use crate::metrics::{
    log_ttl_cache_eviction,
    log_ttl_cache_hit,
    log_ttl_cache_miss,
    log_ttl_cache_size,
};

pub type ReleaseHook<V> = Arc<dyn Fn(&str, Arc<V>) + Send + Sync>;

struct Entry<V> {
    value: Arc<V>,
    expires_at: tokio::time::Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
}

pub struct TtlCache<RT: Runtime, V: Send + Sync + 'static> {
    rt: RT,
    label: &'static str,
    inner: Arc<Mutex<Inner<V>>>,
    release_hook: Option<ReleaseHook<V>>,
    _sweeper: Arc<SweeperGuard>,
}

impl<RT: Runtime, V: Send + Sync + 'static> Clone for TtlCache<RT, V> {
    fn clone(&self) -> Self {
        Self {
            rt: self.rt.clone(),
            label: self.label,
            inner: self.inner.clone(),
            release_hook: self.release_hook.clone(),
            _sweeper: self._sweeper.clone(),
        }
    }
}

/// Aborts the sweeper task once the last cache handle is gone.
struct SweeperGuard(Mutex<Box<dyn SpawnHandle>>);

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.0.lock().shutdown();
    }
}

impl<RT: Runtime, V: Send + Sync + 'static> TtlCache<RT, V> {
    /// `label` distinguishes this cache's log lines and metrics from other
    /// caches in the process.
    pub fn new(
        rt: RT,
        label: &'static str,
        sweep_interval: Duration,
        release_hook: Option<ReleaseHook<V>>,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            entries: HashMap::new(),
        }));
        let sweeper = rt.spawn(
            label,
            Self::sweeper_loop(
                rt.clone(),
                label,
                inner.clone(),
                release_hook.clone(),
                sweep_interval,
            ),
        );
        Self {
            rt,
            label,
            inner,
            release_hook,
            _sweeper: Arc::new(SweeperGuard(Mutex::new(sweeper))),
        }
    }

    /// Returns the live value for `key`. Entries past their deadline are
    /// misses; the sweeper picks them (and their release hook) up later.
    /// Reading never extends an entry's life -- that's what `touch` is for.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.rt.monotonic_now();
        let inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                log_ttl_cache_hit(self.label);
                Some(entry.value.clone())
            },
            _ => {
                log_ttl_cache_miss(self.label);
                None
            },
        }
    }

    pub fn set(&self, key: impl Into<String>, value: Arc<V>, ttl: Duration) {
        let key = key.into();
        let expires_at = self.rt.monotonic_now() + ttl;
        let displaced = {
            let mut inner = self.inner.lock();
            let displaced = inner.entries.insert(key.clone(), Entry { value, expires_at });
            log_ttl_cache_size(self.label, inner.entries.len());
            displaced
        };
        if let Some(entry) = displaced {
            log_ttl_cache_eviction(self.label, "replaced");
            self.release(&key, entry.value);
        }
    }

    /// Extend a live entry's deadline. Returns false if the entry is absent
    /// or already expired.
    pub fn touch(&self, key: &str, ttl: Duration) -> bool {
        let now = self.rt.monotonic_now();
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + ttl;
                true
            },
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.entries.remove(key);
            log_ttl_cache_size(self.label, inner.entries.len());
            removed
        };
        let entry = removed?;
        log_ttl_cache_eviction(self.label, "removed");
        self.release(key, entry.value.clone());
        Some(entry.value)
    }

    /// Evict everything, running the release hook for each entry. Used on
    /// shutdown. Returns the number of evicted entries.
    pub fn clear(&self) -> usize {
        let drained: Vec<(String, Entry<V>)> = {
            let mut inner = self.inner.lock();
            let drained = inner.entries.drain().collect();
            log_ttl_cache_size(self.label, 0);
            drained
        };
        let count = drained.len();
        for (key, entry) in drained {
            log_ttl_cache_eviction(self.label, "cleared");
            self.release(&key, entry.value);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &str, value: Arc<V>) {
        if let Some(ref hook) = self.release_hook {
            hook(key, value);
        }
    }

    async fn sweeper_loop(
        rt: RT,
        label: &'static str,
        inner: Arc<Mutex<Inner<V>>>,
        release_hook: Option<ReleaseHook<V>>,
        sweep_interval: Duration,
    ) {
        loop {
            rt.wait(sweep_interval).await;
            let now = rt.monotonic_now();
            let expired: Vec<(String, Arc<V>)> = {
                let mut inner = inner.lock();
                let expired_keys: Vec<String> = inner
                    .entries
                    .iter()
                    .filter(|(_, entry)| entry.expires_at <= now)
                    .map(|(key, _)| key.clone())
                    .collect();
                let expired = expired_keys
                    .into_iter()
                    .map(|key| {
                        let entry = inner.entries.remove(&key).expect("expired key vanished");
                        (key, entry.value)
                    })
                    .collect();
                log_ttl_cache_size(label, inner.entries.len());
                expired
            };
            if expired.is_empty() {
                continue;
            }
            tracing::debug!("Swept {} expired entries from the {label} cache", expired.len());
            for (key, value) in expired {
                log_ttl_cache_eviction(label, "expired");
                if let Some(ref hook) = release_hook {
                    hook(&key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{
                AtomicUsize,
                Ordering,
            },
            Arc,
        },
        time::Duration,
    };

    use common::runtime::testing::TestRuntime;

    use super::TtlCache;

    const SWEEP: Duration = Duration::from_secs(1);
    const TTL: Duration = Duration::from_secs(10);

    fn cache_with_hook(rt: TestRuntime) -> (TtlCache<TestRuntime, String>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let released_ = released.clone();
        let cache = TtlCache::new(
            rt,
            "test",
            SWEEP,
            Some(Arc::new(move |_key: &str, _value: Arc<String>| {
                released_.fetch_add(1, Ordering::SeqCst);
            })),
        );
        (cache, released)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_live_entry() {
        let cache = TtlCache::new(TestRuntime::new(), "test", SWEEP, None);
        cache.set("k", Arc::new("v".to_owned()), TTL);
        assert_eq!(cache.get("k").as_deref(), Some(&"v".to_owned()));
        assert_eq!(cache.get("other"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = TtlCache::new(TestRuntime::new(), "test", Duration::from_secs(3600), None);
        cache.set("k", Arc::new("v".to_owned()), TTL);
        tokio::time::sleep(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_does_not_extend_ttl() {
        let cache = TtlCache::new(TestRuntime::new(), "test", Duration::from_secs(3600), None);
        cache.set("k", Arc::new("v".to_owned()), TTL);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.get("k").is_some());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_extends_ttl() {
        let cache = TtlCache::new(TestRuntime::new(), "test", Duration::from_secs(3600), None);
        cache.set("k", Arc::new("v".to_owned()), TTL);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.touch("k", TTL));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(cache.get("k").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_expired_entry_fails() {
        let cache = TtlCache::new(TestRuntime::new(), "test", Duration::from_secs(3600), None);
        cache.set("k", Arc::new("v".to_owned()), TTL);
        tokio::time::sleep(TTL + Duration::from_secs(1)).await;
        assert!(!cache.touch("k", TTL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_releases_expired_entries_once() {
        let (cache, released) = cache_with_hook(TestRuntime::new());
        cache.set("k", Arc::new("v".to_owned()), TTL);
        tokio::time::sleep(TTL + SWEEP * 2).await;
        settle().await;
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(cache.is_empty());
        // Further sweeps must not double-release.
        tokio::time::sleep(SWEEP * 3).await;
        settle().await;
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_releases_entry() {
        let (cache, released) = cache_with_hook(TestRuntime::new());
        cache.set("k", Arc::new("v".to_owned()), TTL);
        let removed = cache.remove("k");
        assert_eq!(removed.as_deref(), Some(&"v".to_owned()));
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(cache.remove("k").is_none());
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_releases_displaced_entry() {
        let (cache, released) = cache_with_hook(TestRuntime::new());
        cache.set("k", Arc::new("v1".to_owned()), TTL);
        cache.set("k", Arc::new("v2".to_owned()), TTL);
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.get("k").as_deref(), Some(&"v2".to_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_releases_everything() {
        let (cache, released) = cache_with_hook(TestRuntime::new());
        cache.set("a", Arc::new("1".to_owned()), TTL);
        cache.set("b", Arc::new("2".to_owned()), TTL);
        assert_eq!(cache.clear(), 2);
        assert_eq!(released.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }
}
