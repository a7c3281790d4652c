use crate::cache::backing::Backing;
use crate::cache::EntityCache;
use crate::entity::Entity;
use crate::error::PersistenceError;
use crate::meta::EntityMeta;
use crate::value::Key;
use crossbeam::sync::ShardedLock;
use log::debug;
use std::any::TypeId;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// How a cache entry holds on to its instance.
pub trait Slot: Clone + Send + Sync + 'static {
    /// Entries may go stale and need sweeping.
    const WEAK: bool;
    fn hold(value: &Arc<dyn Entity>) -> Self;
    fn upgrade(&self) -> Option<Arc<dyn Entity>>;
    fn is_live(&self) -> bool;
}

#[derive(Clone)]
pub struct Strong(Arc<dyn Entity>);

impl Slot for Strong {
    const WEAK: bool = false;

    fn hold(value: &Arc<dyn Entity>) -> Self {
        Strong(value.clone())
    }

    fn upgrade(&self) -> Option<Arc<dyn Entity>> {
        Some(self.0.clone())
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[derive(Clone)]
pub struct WeakSlot(Weak<dyn Entity>);

impl Slot for WeakSlot {
    const WEAK: bool = true;

    fn hold(value: &Arc<dyn Entity>) -> Self {
        WeakSlot(Arc::downgrade(value))
    }

    fn upgrade(&self) -> Option<Arc<dyn Entity>> {
        self.0.upgrade()
    }

    fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Partitions hold their entity metadata weakly.
    pub weak_keys: bool,
    pub concurrent: bool,
    pub lru_capacity: Option<NonZeroUsize>,
    /// Mutating operations between two sweeps of a weak cache.
    pub purge_interval: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { weak_keys: false, concurrent: false, lru_capacity: None, purge_interval: 500 }
    }
}

enum Owner {
    Strong(Arc<EntityMeta>),
    Weak(Weak<EntityMeta>),
}

impl Owner {
    fn owns(&self, meta: &EntityMeta) -> bool {
        match self {
            Owner::Strong(m) => m.type_id() == meta.type_id(),
            Owner::Weak(w) => w.upgrade().is_some_and(|m| m.type_id() == meta.type_id()),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Owner::Strong(_) => true,
            Owner::Weak(w) => w.strong_count() > 0,
        }
    }
}

struct Partition<S> {
    owner: Owner,
    entries: Arc<Backing<S>>,
}

/// Identity cache partitioned per entity, strong or weak depending on the slot.
pub struct ReferenceCache<S> {
    config: CacheConfig,
    partitions: ShardedLock<HashMap<String, Partition<S>>>,
    operations: AtomicUsize,
    purging: Mutex<()>,
}

pub type StrongCache = ReferenceCache<Strong>;
pub type WeakCache = ReferenceCache<WeakSlot>;

impl<S: Slot> ReferenceCache<S> {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, partitions: ShardedLock::new(HashMap::new()), operations: AtomicUsize::new(0), purging: Mutex::new(()) }
    }

    fn backing(&self) -> Backing<S> {
        match (self.config.lru_capacity, self.config.concurrent) {
            (Some(capacity), _) => Backing::lru(capacity),
            (None, true) => Backing::sharded(),
            (None, false) => Backing::locked(),
        }
    }

    fn partition(&self, meta: &Arc<EntityMeta>, create: bool) -> Result<Option<Arc<Backing<S>>>, PersistenceError> {
        if let Some(p) = self.partitions.read()?.get(meta.name()) {
            if p.owner.owns(meta) {
                return Ok(Some(p.entries.clone()));
            }
        }
        if !create {
            return Ok(None);
        }
        let mut partitions = self.partitions.write()?;
        if let Some(p) = partitions.get(meta.name()) {
            if p.owner.owns(meta) {
                return Ok(Some(p.entries.clone()));
            }
        }
        let owner = if self.config.weak_keys { Owner::Weak(Arc::downgrade(meta)) } else { Owner::Strong(meta.clone()) };
        let entries = Arc::new(self.backing());
        partitions.insert(meta.name().to_string(), Partition { owner, entries: entries.clone() });
        Ok(Some(entries))
    }

    fn lookup(&self, meta: &Arc<EntityMeta>, key: &Key) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        let Some(entries) = self.partition(meta, false)? else { return Ok(None) };
        let Some(slot) = entries.get(key)? else { return Ok(None) };
        match slot.upgrade() {
            Some(value) if meta.is_instance(value.as_ref()) => Ok(Some(value)),
            Some(value) => {
                crate::warn!("cache entry {}#{} holds a {}, treating it as a miss", meta.name(), key, value.type_name());
                Ok(None)
            }
            None => {
                debug!("cache entry {}#{} was reclaimed", meta.name(), key);
                entries.remove(key)?;
                Ok(None)
            }
        }
    }

    fn mutated(&self) {
        if S::WEAK {
            let n = self.operations.fetch_add(1, Ordering::AcqRel) + 1;
            if n % self.config.purge_interval.max(1) == 0 {
                self.purge();
            }
        }
    }

    /// Drops reclaimed entries, a sweep already in progress makes this a no-op.
    pub fn purge(&self) -> usize {
        let Ok(_sweep) = self.purging.try_lock() else { return 0 };
        let swept = (|| -> Result<usize, PersistenceError> {
            let mut partitions = self.partitions.write()?;
            partitions.retain(|_, p| p.owner.is_live());
            let mut removed = 0;
            for partition in partitions.values() {
                removed += partition.entries.retain(|s| s.is_live())?;
            }
            Ok(removed)
        })();
        match swept {
            Ok(removed) => {
                debug!("cache purge removed {removed} stale entries");
                removed
            }
            Err(e) => {
                crate::warn!("cache purge failed: {e}");
                0
            }
        }
    }

    /// Entries including reclaimed ones not yet swept.
    pub fn raw_len(&self) -> usize {
        self.total(|_| true)
    }

    pub fn live_len(&self) -> usize {
        self.total(|s| s.is_live())
    }

    fn total(&self, accept: impl Fn(&S) -> bool + Copy) -> usize {
        match self.partitions.read() {
            Ok(partitions) => partitions.values().map(|p| p.entries.count(accept).unwrap_or(0)).sum(),
            Err(_) => 0,
        }
    }

    fn soft<T: Default>(&self, op: &str, result: Result<T, PersistenceError>) -> T {
        result.unwrap_or_else(|e| {
            crate::warn!("cache {op} failed, ignoring: {e}");
            T::default()
        })
    }
}

impl<S: Slot> EntityCache for ReferenceCache<S> {
    fn get(&self, meta: &Arc<EntityMeta>, key: &Key) -> Option<Arc<dyn Entity>> {
        let hit = self.soft("get", self.lookup(meta, key));
        debug!("cache {} {}#{}", if hit.is_some() { "hit" } else { "miss" }, meta.name(), key);
        hit
    }

    fn put(&self, meta: &Arc<EntityMeta>, key: Key, value: Arc<dyn Entity>) -> bool {
        if !meta.is_instance(value.as_ref()) {
            crate::warn!("refusing to cache a {} under {}", value.type_name(), meta.name());
            return false;
        }
        let stored = self.soft("put", self.partition(meta, true).and_then(|entries| match entries {
            Some(entries) => entries.insert(key, S::hold(&value)).map(|_| true),
            None => Ok(false),
        }));
        self.mutated();
        stored
    }

    fn remove(&self, meta: &Arc<EntityMeta>, key: &Key) -> bool {
        let removed = self.soft("remove", self.partition(meta, false).and_then(|entries| match entries {
            Some(entries) => entries.remove(key),
            None => Ok(false),
        }));
        self.mutated();
        removed
    }

    fn clear(&self) {
        match self.partitions.write() {
            Ok(mut partitions) => partitions.clear(),
            Err(e) => crate::warn!("cache clear failed: {e}"),
        }
    }

    fn type_ids(&self) -> Vec<TypeId> {
        match self.partitions.read() {
            Ok(partitions) => partitions
                .values()
                .filter_map(|p| match &p.owner {
                    Owner::Strong(m) => Some(m.type_id()),
                    Owner::Weak(w) => w.upgrade().map(|m| m.type_id()),
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
