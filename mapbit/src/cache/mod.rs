//! Identity caches keyed by entity and primary key.
//!
//! Caches are an optimization only: lookups that fail for any reason are misses, writes that fail are
//! logged and dropped.

pub mod backing;
pub mod null;
pub mod reference;

pub use null::NullCache;
pub use reference::{CacheConfig, ReferenceCache, StrongCache, WeakCache};

use crate::entity::Entity;
use crate::meta::EntityMeta;
use crate::settings::{CacheKind, CacheSettings};
use crate::value::Key;
use std::any::TypeId;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub trait EntityCache: Send + Sync {
    /// Never returns an instance of another type than `meta` describes.
    fn get(&self, meta: &Arc<EntityMeta>, key: &Key) -> Option<Arc<dyn Entity>>;

    fn put(&self, meta: &Arc<EntityMeta>, key: Key, value: Arc<dyn Entity>) -> bool;

    fn remove(&self, meta: &Arc<EntityMeta>, key: &Key) -> bool;

    /// Partial hits only, missing keys are absent from the result.
    fn find(&self, meta: &Arc<EntityMeta>, keys: &[Key]) -> HashMap<Key, Arc<dyn Entity>> {
        keys.iter().filter_map(|k| self.get(meta, k).map(|v| (k.clone(), v))).collect()
    }

    fn clear(&self);

    /// Entity types currently holding a partition.
    fn type_ids(&self) -> Vec<TypeId>;
}

pub fn from_settings(settings: &CacheSettings) -> Arc<dyn EntityCache> {
    let config = CacheConfig {
        weak_keys: settings.weak_keys,
        concurrent: settings.concurrent,
        lru_capacity: None,
        purge_interval: settings.purge_interval,
    };
    match settings.kind {
        CacheKind::Strong => Arc::new(StrongCache::new(config)),
        CacheKind::Weak => Arc::new(WeakCache::new(config)),
        CacheKind::Lru => match NonZeroUsize::new(settings.lru_capacity) {
            Some(capacity) => Arc::new(StrongCache::new(CacheConfig { lru_capacity: Some(capacity), ..config })),
            None => {
                crate::warn!("lru cache with zero capacity, caching disabled");
                Arc::new(NullCache)
            }
        },
        CacheKind::None => Arc::new(NullCache),
    }
}
