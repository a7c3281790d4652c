use crate::error::PersistenceError;
use crate::value::Key;
use crossbeam::sync::ShardedLock;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Map behind one cache partition.
pub enum Backing<V> {
    Locked(Mutex<HashMap<Key, V>>),
    /// Read-mostly map, readers do not contend.
    Sharded(ShardedLock<HashMap<Key, V>>),
    Lru(Mutex<LruCache<Key, V>>),
}

impl<V: Clone> Backing<V> {
    pub fn locked() -> Self {
        Backing::Locked(Mutex::new(HashMap::new()))
    }

    pub fn sharded() -> Self {
        Backing::Sharded(ShardedLock::new(HashMap::new()))
    }

    pub fn lru(capacity: NonZeroUsize) -> Self {
        Backing::Lru(Mutex::new(LruCache::new(capacity)))
    }

    pub fn get(&self, key: &Key) -> Result<Option<V>, PersistenceError> {
        Ok(match self {
            Backing::Locked(m) => m.lock()?.get(key).cloned(),
            Backing::Sharded(m) => m.read()?.get(key).cloned(),
            Backing::Lru(m) => m.lock()?.get(key).cloned(),
        })
    }

    pub fn insert(&self, key: Key, value: V) -> Result<(), PersistenceError> {
        match self {
            Backing::Locked(m) => {
                m.lock()?.insert(key, value);
            }
            Backing::Sharded(m) => {
                m.write()?.insert(key, value);
            }
            Backing::Lru(m) => {
                m.lock()?.put(key, value);
            }
        }
        Ok(())
    }

    pub fn remove(&self, key: &Key) -> Result<bool, PersistenceError> {
        Ok(match self {
            Backing::Locked(m) => m.lock()?.remove(key).is_some(),
            Backing::Sharded(m) => m.write()?.remove(key).is_some(),
            Backing::Lru(m) => m.lock()?.pop(key).is_some(),
        })
    }

    /// Keeps only the entries `keep` accepts, returns how many were dropped.
    pub fn retain(&self, keep: impl Fn(&V) -> bool) -> Result<usize, PersistenceError> {
        Ok(match self {
            Backing::Locked(m) => {
                let mut map = m.lock()?;
                let before = map.len();
                map.retain(|_, v| keep(v));
                before - map.len()
            }
            Backing::Sharded(m) => {
                let mut map = m.write()?;
                let before = map.len();
                map.retain(|_, v| keep(v));
                before - map.len()
            }
            Backing::Lru(m) => {
                let mut cache = m.lock()?;
                let stale: Vec<Key> = cache.iter().filter(|(_, v)| !keep(v)).map(|(k, _)| k.clone()).collect();
                for key in &stale {
                    cache.pop(key);
                }
                stale.len()
            }
        })
    }

    pub fn count(&self, accept: impl Fn(&V) -> bool) -> Result<usize, PersistenceError> {
        Ok(match self {
            Backing::Locked(m) => m.lock()?.values().filter(|v| accept(v)).count(),
            Backing::Sharded(m) => m.read()?.values().filter(|v| accept(v)).count(),
            Backing::Lru(m) => m.lock()?.iter().filter(|(_, v)| accept(v)).count(),
        })
    }

    pub fn len(&self) -> Result<usize, PersistenceError> {
        self.count(|_| true)
    }

    pub fn clear(&self) -> Result<(), PersistenceError> {
        match self {
            Backing::Locked(m) => m.lock()?.clear(),
            Backing::Sharded(m) => m.write()?.clear(),
            Backing::Lru(m) => m.lock()?.clear(),
        }
        Ok(())
    }
}
