use std::num::NonZeroUsize;

use lru::LruCache;
use tracing::trace;

use crate::{cbv::Cbv, geometry::Rect, storage::Shard, storage::ShardId};

type Key = (ShardId, [u64; 4], u8);

/// Bounded LRU of rectangle retrievals, keyed by shard, rect and scale.
pub struct RectCache {
    entries: LruCache<Key, Cbv>,
    hits: u64,
    misses: u64,
}

impl RectCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Features of `shard` in `rect`, from the cache when possible.
    pub fn get(&mut self, shard: &dyn Shard, rect: &Rect, scale: u8) -> Cbv {
        let key = (shard.info().id, rect.key(), scale);
        if let Some(cbv) = self.entries.get(&key) {
            self.hits += 1;
            return cbv.clone();
        }
        self.misses += 1;
        let cbv = shard.retrieve_in_rect(rect, scale);
        trace!(shard = key.0, scale, "rect cache miss");
        self.entries.put(key, cbv.clone());
        cbv
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::Point,
        memory::{MemoryShard, MemoryShardData},
        model::SearchType,
        storage::{FeatureRecord, ShardInfo},
    };

    fn shard(id: ShardId) -> MemoryShard {
        let info =
            ShardInfo::country(id, "Test", Rect::new(0.0, 0.0, 10.0, 10.0));
        let poi = |id, at| FeatureRecord::new(id, SearchType::Poi, at);
        MemoryShard::new(
            MemoryShardData::new(info)
                .with_feature(poi(1, Point::new(1.0, 1.0)))
                .with_feature(poi(2, Point::new(8.0, 8.0))),
        )
    }

    #[test]
    fn repeated_rects_hit_the_cache() {
        let shard = shard(1);
        let mut cache = RectCache::new(NonZeroUsize::new(2).unwrap());
        let rect = Rect::new(0.0, 0.0, 5.0, 5.0);

        assert_eq!(cache.get(&shard, &rect, 17), Cbv::from_ids([1]));
        assert_eq!(cache.get(&shard, &rect, 17), Cbv::from_ids([1]));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.get(&shard, &rect, 16);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn capacity_is_bounded() {
        let shard = shard(1);
        let mut cache = RectCache::new(NonZeroUsize::new(1).unwrap());
        cache.get(&shard, &Rect::new(0.0, 0.0, 5.0, 5.0), 17);
        cache.get(&shard, &Rect::new(5.0, 5.0, 10.0, 10.0), 17);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn shards_do_not_share_entries() {
        let a = shard(1);
        let b = shard(2);
        let mut cache = RectCache::new(NonZeroUsize::new(4).unwrap());
        let rect = Rect::new(0.0, 0.0, 5.0, 5.0);
        cache.get(&a, &rect, 17);
        cache.get(&b, &rect, 17);
        assert_eq!(cache.misses(), 2);
    }
}
