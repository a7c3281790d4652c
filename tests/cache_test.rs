mod common;

use common::*;
use mapbit::cache::CacheConfig;
use mapbit::*;
use rand::seq::SliceRandom;
use std::num::NonZeroUsize;
use std::sync::Arc;

fn dog_meta() -> Arc<EntityMeta> {
    registry().entity("Dog").unwrap().clone()
}

#[test]
fn weak_cache_sweeps_reclaimed_entries() {
    let cache = WeakCache::new(CacheConfig { purge_interval: 500, ..Default::default() });
    let meta = dog_meta();
    let mut held: Vec<(i64, Arc<dyn Entity>)> = (0..1000)
        .map(|id| {
            let entry: Arc<dyn Entity> = Arc::new(Dog { id, ..dog("rex") });
            assert!(cache.put(&meta, Key::from(id), entry.clone()));
            (id, entry)
        })
        .collect();
    assert_eq!(cache.live_len(), 1000);

    held.shuffle(&mut rand::rng());
    held.truncate(100);
    assert_eq!(cache.raw_len(), 1000);
    assert_eq!(cache.live_len(), 100);

    for id in 1000..1500 {
        let entry: Arc<dyn Entity> = Arc::new(Dog { id, ..dog("max") });
        cache.put(&meta, Key::from(id), entry.clone());
        held.push((id, entry));
    }
    assert_eq!(cache.raw_len(), cache.live_len());
    assert_eq!(cache.live_len(), 600);
    for (id, _) in &held {
        assert!(cache.get(&meta, &Key::from(*id)).is_some());
    }
}

#[test]
fn bounded_strong_cache_evicts_least_recently_used() {
    let cache = StrongCache::new(CacheConfig { lru_capacity: NonZeroUsize::new(2), ..Default::default() });
    let meta = dog_meta();
    for id in 1..=2 {
        cache.put(&meta, Key::from(id), Arc::new(Dog { id, ..dog("rex") }));
    }
    assert!(cache.get(&meta, &Key::from(1)).is_some());
    cache.put(&meta, Key::from(3), Arc::new(Dog { id: 3, ..dog("rex") }));
    assert!(cache.get(&meta, &Key::from(1)).is_some());
    assert!(cache.get(&meta, &Key::from(2)).is_none());
    assert!(cache.get(&meta, &Key::from(3)).is_some());
}

#[test]
fn null_cache_forces_every_read_to_the_store() {
    let store = CountingStore::default();
    let settings = EngineSettings { cache: mapbit::settings::CacheSettings { kind: CacheKind::None, ..Default::default() }, ..Default::default() };
    let engine = Engine::new(registry(), Arc::new(store.clone()), settings);
    let manager = engine.manager().unwrap();
    let rex = manager.save(dog("rex")).unwrap();
    let first = manager.get::<Dog>(rex.id).unwrap().unwrap();
    let second = manager.get::<Dog>(rex.id).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(store.row_loads(), 2);
}
