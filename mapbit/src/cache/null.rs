use crate::cache::EntityCache;
use crate::entity::Entity;
use crate::meta::EntityMeta;
use crate::value::Key;
use std::any::TypeId;
use std::sync::Arc;

/// Caching disabled, every lookup misses.
#[derive(Default, Debug)]
pub struct NullCache;

impl EntityCache for NullCache {
    fn get(&self, _meta: &Arc<EntityMeta>, _key: &Key) -> Option<Arc<dyn Entity>> {
        None
    }

    fn put(&self, _meta: &Arc<EntityMeta>, _key: Key, _value: Arc<dyn Entity>) -> bool {
        false
    }

    fn remove(&self, _meta: &Arc<EntityMeta>, _key: &Key) -> bool {
        false
    }

    fn clear(&self) {}

    fn type_ids(&self) -> Vec<TypeId> {
        Vec::new()
    }
}
