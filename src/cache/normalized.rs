//! L3 normalized-key layer.
//!
//! A thin wrapper over an inner layer. Callers reach it with keys built
//! from [`super::normalized_mapping_hash`], so header reorderings of the
//! same MapColumns request land on one entry. The wrapper keeps its own
//! hit/miss counters so normalized traffic is visible separately in stats.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use super::{CacheLayer, CacheStats};

pub struct NormalizedCache {
    inner: Arc<dyn CacheLayer>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NormalizedCache {
    pub fn new(inner: Arc<dyn CacheLayer>) -> Self {
        Self {
            inner,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl CacheLayer for NormalizedCache {
    fn get(&self, key: &str) -> Option<Value> {
        let result = self.inner.get(key);
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.inner.set(key, value, ttl);
    }

    fn clear(&self) {
        self.inner.clear();
    }

    fn stats(&self) -> CacheStats {
        let inner = self.inner.stats();
        CacheStats {
            level: "L3",
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: inner.size,
            max_size: inner.max_size,
        }
    }
}
