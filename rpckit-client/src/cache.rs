//! Thread-safe key/value cache with per-entry expiry.
//!
//! Expired entries are dropped lazily on the next read of their key. Keys
//! that are written once and never read again stay resident until
//! [`TtlCache::purge_expired`] runs, either by hand or from the sweeper
//! started with [`TtlCache::spawn_sweeper`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub fn save(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .insert(key.into(), Entry { value, expires_at });
    }

    /// Returns the live value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Returns the live value under `key`, or stores and returns the value
    /// produced by `renew`. When `renew` yields nothing the key is cleared.
    ///
    /// The lock is held while `renew` runs, so concurrent callers for any
    /// key wait for it.
    pub fn get_or_set(
        &self,
        key: &str,
        ttl: Duration,
        renew: impl FnOnce() -> Option<V>,
    ) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }

        match renew() {
            Some(value) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.clone(),
                        expires_at: now + ttl,
                    },
                );
                Some(value)
            }
            None => {
                entries.remove(key);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().remove(key).map(|e| e.value)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Purges expired entries every `interval` until the cache is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!("Purged {} expired cache entries", purged);
                }
            }
        })
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.lock().len())
            .finish()
    }
}
