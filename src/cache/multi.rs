//! Multi-level cache composing the layer stack.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::{CacheLayer, CacheStats};

/// An ordered stack of cache layers, fastest first.
///
/// `get` probes in order and backfills every earlier layer on a
/// lower-level hit; `set` and `clear` fan out to all layers. A backfill
/// may race a concurrent `set` for the same key; the last write wins.
///
/// The stack is itself a [`CacheLayer`], so an L3 normalized view can
/// wrap it.
pub struct MultiLevelCache {
    layers: Vec<Arc<dyn CacheLayer>>,
    /// TTL applied when promoting a lower-level hit into upper layers.
    backfill_ttl: Duration,
}

impl MultiLevelCache {
    pub fn new(layers: Vec<Arc<dyn CacheLayer>>, backfill_ttl: Duration) -> Self {
        Self {
            layers,
            backfill_ttl,
        }
    }

    /// Stats for every layer, in probe order.
    pub fn stats_per_layer(&self) -> Vec<CacheStats> {
        self.layers.iter().map(|l| l.stats()).collect()
    }
}

impl CacheLayer for MultiLevelCache {
    fn get(&self, key: &str) -> Option<Value> {
        for (i, layer) in self.layers.iter().enumerate() {
            if let Some(value) = layer.get(key) {
                for upper in &self.layers[..i] {
                    upper.set(key, value.clone(), self.backfill_ttl);
                }
                return Some(value);
            }
        }
        None
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) {
        for layer in &self.layers {
            layer.set(key, value.clone(), ttl);
        }
    }

    fn clear(&self) {
        for layer in &self.layers {
            layer.clear();
        }
    }

    fn stats(&self) -> CacheStats {
        let per_layer = self.stats_per_layer();
        CacheStats {
            level: "multi",
            hits: per_layer.iter().map(|s| s.hits).sum(),
            misses: per_layer.iter().map(|s| s.misses).sum(),
            size: per_layer.iter().map(|s| s.size).sum(),
            max_size: per_layer.iter().map(|s| s.max_size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn lower_hit_backfills_upper_layers() {
        let l1 = Arc::new(MemoryCache::new(10));
        let l2 = Arc::new(MemoryCache::new(10));
        l2.set("k", json!("v"), TTL);

        let multi = MultiLevelCache::new(vec![l1.clone(), l2.clone()], TTL);
        assert_eq!(multi.get("k"), Some(json!("v")));

        // L1 now answers without consulting L2.
        let l2_hits_before = l2.stats().hits;
        assert_eq!(l1.get("k"), Some(json!("v")));
        assert_eq!(l2.stats().hits, l2_hits_before);
    }

    #[test]
    fn set_writes_every_layer() {
        let l1 = Arc::new(MemoryCache::new(10));
        let l2 = Arc::new(MemoryCache::new(10));
        let multi = MultiLevelCache::new(vec![l1.clone(), l2.clone()], TTL);

        multi.set("k", json!(1), TTL);
        assert_eq!(l1.get("k"), Some(json!(1)));
        assert_eq!(l2.get("k"), Some(json!(1)));
    }

    #[test]
    fn miss_when_all_layers_miss() {
        let multi = MultiLevelCache::new(
            vec![
                Arc::new(MemoryCache::new(10)) as Arc<dyn CacheLayer>,
                Arc::new(MemoryCache::new(10)),
            ],
            TTL,
        );
        assert!(multi.get("absent").is_none());
    }

    #[test]
    fn clear_fans_out() {
        let l1 = Arc::new(MemoryCache::new(10));
        let l2 = Arc::new(MemoryCache::new(10));
        let multi = MultiLevelCache::new(vec![l1.clone(), l2.clone()], TTL);

        multi.set("k", json!(1), TTL);
        multi.clear();
        assert!(l1.get("k").is_none());
        assert!(l2.get("k").is_none());
    }

    #[test]
    fn per_layer_stats_keep_probe_order() {
        let multi = MultiLevelCache::new(
            vec![
                Arc::new(MemoryCache::new(5)) as Arc<dyn CacheLayer>,
                Arc::new(MemoryCache::new(50)),
            ],
            TTL,
        );
        let stats = multi.stats_per_layer();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].max_size, 5);
        assert_eq!(stats[1].max_size, 50);

        let aggregate = multi.stats();
        assert_eq!(aggregate.level, "multi");
        assert_eq!(aggregate.max_size, 55);
    }
}
