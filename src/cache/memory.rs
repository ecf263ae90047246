//! L1 in-memory cache with LFU eviction.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{CacheLayer, CacheStats};

struct Entry {
    value: Value,
    expires_at: Instant,
    /// Per-key hit counter driving LFU eviction.
    hits: u64,
    /// Monotonic insertion sequence; breaks eviction ties.
    seq: u64,
}

struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

/// In-memory LFU cache holding up to `max_size` entries.
///
/// Expired entries return a miss but stay resident until evicted, so a
/// stale key still counts against capacity and is a natural eviction
/// candidate (its hit counter stops growing).
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl MemoryCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
            }),
            max_size,
        }
    }

    /// Evict the entry with the lowest hit count; ties broken by insertion
    /// order. Caller must hold the lock and have verified the map is full.
    fn evict_one(inner: &mut Inner) {
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.hits, e.seq))
            .map(|(k, _)| k.clone());
        if let Some(key) = victim {
            tracing::debug!(key = %key, "L1 evicting least-frequently-used entry");
            inner.entries.remove(&key);
        }
    }
}

impl CacheLayer for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let inner = &mut *guard;
        match inner.entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.hits += 1;
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            _ => {
                inner.misses += 1;
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = inner.entries.get_mut(key) {
            // Overwrite in place; the key keeps its frequency history.
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }
        if inner.entries.len() >= self.max_size {
            Self::evict_one(&mut inner);
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                hits: 0,
                seq,
            },
        );
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            level: "L1",
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
            max_size: self.max_size,
        }
    }
}
