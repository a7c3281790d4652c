//! The per-request view of the engine: identity cache in front, one backend handler behind.

pub mod holder;

pub use holder::{ColumnLoader, EntityLoader, KeySetLoader, KeySource, QueryLoader, SessionHolderFactory};

use crate::cache::EntityCache;
use crate::entity::Entity;
use crate::error::{PersistenceError, ResultExt};
use crate::meta::{ColumnMeta, EntityContext, EntityMeta, MetaRegistry, TableMeta};
use crate::persist::{DataHandler, DataHolderFactory, DataStore, EntityBuilder, EntityPersistence};
use crate::value::{ColumnData, Key, Value};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Begin/commit/rollback of the batched writes of one session.
pub trait UnitOfWork: Send + Sync {
    fn pending_work(&self) -> bool;
    fn begin_work(&self) -> Result<(), PersistenceError>;
    fn commit_work(&self) -> Result<(), PersistenceError>;
    fn rollback_work(&self) -> Result<(), PersistenceError>;
}

pub trait Session: UnitOfWork {
    fn registry(&self) -> &MetaRegistry;

    fn get(&self, context: &EntityContext, key: &Key) -> Result<Option<Arc<dyn Entity>>, PersistenceError>;

    /// Found instances in the order of `keys`, missing ones are skipped.
    fn get_many(&self, context: &EntityContext, keys: &[Key]) -> Result<Vec<Arc<dyn Entity>>, PersistenceError>;

    fn exists(&self, context: &EntityContext, key: &Key) -> Result<bool, PersistenceError>;

    fn find_by(&self, context: &EntityContext, column: &str, value: &Value) -> Result<Vec<Arc<dyn Entity>>, PersistenceError>;

    fn query(&self, context: &EntityContext, name: &str, params: &ColumnData) -> Result<Vec<Arc<dyn Entity>>, PersistenceError>;

    /// Writes the instance and returns the shared handle now held by the identity cache.
    fn save(&self, meta: &Arc<EntityMeta>, instance: Box<dyn Entity>) -> Result<Arc<dyn Entity>, PersistenceError>;

    fn delete(&self, meta: &Arc<EntityMeta>, instance: &dyn Entity) -> Result<bool, PersistenceError>;

    fn load_column(&self, meta: &Arc<EntityMeta>, table: &str, column: &str, keys: &ColumnData) -> Result<Value, PersistenceError>;

    fn load_collection(&self, meta: &Arc<EntityMeta>, table: &str, column: &str, keys: &ColumnData) -> Result<Vec<Value>, PersistenceError>;
}

/// Default [`Session`] over a [`DataStore`].
pub struct EntitySession {
    registry: Arc<MetaRegistry>,
    cache: Arc<dyn EntityCache>,
    handler: Box<dyn DataHandler>,
    factory: Arc<dyn DataHolderFactory>,
    touched: Mutex<Vec<(Arc<EntityMeta>, Key)>>,
}

impl EntitySession {
    pub fn open(registry: Arc<MetaRegistry>, cache: Arc<dyn EntityCache>, store: &dyn DataStore) -> Result<Arc<Self>, PersistenceError> {
        let handler = store.open().context("opening session")?;
        Ok(Arc::new_cyclic(|me: &Weak<EntitySession>| {
            let session: Weak<dyn Session> = me.clone();
            EntitySession { registry, cache, handler, factory: store.holder_factory(session), touched: Mutex::new(Vec::new()) }
        }))
    }

    pub fn cache(&self) -> &Arc<dyn EntityCache> {
        &self.cache
    }

    fn normalize(&self, context: &EntityContext, key: &Key) -> Option<Key> {
        let normalized = context.id_accessor().normalize(key);
        if normalized.is_none() {
            crate::warn!("{key} is not a key of {}", context.name());
        }
        normalized
    }

    fn cached(&self, context: &EntityContext, key: &Key) -> Option<Arc<dyn Entity>> {
        context.entities().iter().find_map(|meta| self.cache.get(meta, key))
    }

    /// Cache writes made during pending work are undone on rollback.
    fn remember(&self, meta: &Arc<EntityMeta>, key: Key, instance: Arc<dyn Entity>) {
        if self.cache.put(meta, key.clone(), instance) && self.handler.pending_work() {
            match self.touched.lock() {
                Ok(mut touched) => touched.push((meta.clone(), key)),
                Err(e) => crate::warn!("cannot track cached {}#{key}: {e}", meta.name()),
            }
        }
    }

    /// Builds an instance out of a row unless the cache already holds one with the same identity.
    fn materialize(&self, context: &EntityContext, row: &ColumnData) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        let Some(meta) = context.find_entity(row) else {
            crate::warn!("row of {} has no matching entity, skipped", context.name());
            return Ok(None);
        };
        if let Some(hit) = meta.id_accessor().from_data(row).and_then(|key| self.cache.get(meta, &key)) {
            return Ok(Some(hit));
        }
        let builder = EntityBuilder::new(&self.registry, self.factory.as_ref());
        let Some((meta, instance)) = builder.build(context, row)? else { return Ok(None) };
        let instance: Arc<dyn Entity> = Arc::from(instance);
        if let Some(key) = meta.id_accessor().from_data(row) {
            self.remember(&meta, key, instance.clone());
        }
        Ok(Some(instance))
    }

    fn materialize_all(&self, context: &EntityContext, rows: Vec<ColumnData>) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(instance) = self.materialize(context, &row)? {
                found.push(instance);
            }
        }
        Ok(found)
    }

    fn load(&self, context: &EntityContext, key: &Key) -> Result<Option<ColumnData>, PersistenceError> {
        self.handler
            .load(context, &context.id_accessor().from_key(key))
            .with_context(|| format!("loading {}#{key}", context.name()))
    }
}

impl UnitOfWork for EntitySession {
    fn pending_work(&self) -> bool {
        self.handler.pending_work()
    }

    fn begin_work(&self) -> Result<(), PersistenceError> {
        self.handler.begin_work()?;
        self.touched.lock()?.clear();
        Ok(())
    }

    fn commit_work(&self) -> Result<(), PersistenceError> {
        self.handler.commit_work()?;
        self.touched.lock()?.clear();
        Ok(())
    }

    fn rollback_work(&self) -> Result<(), PersistenceError> {
        let result = self.handler.rollback_work();
        let touched: Vec<_> = self.touched.lock()?.drain(..).collect();
        for (meta, key) in &touched {
            self.cache.remove(meta, key);
        }
        debug!("rollback evicted {} cached entries", touched.len());
        result
    }
}

impl Session for EntitySession {
    fn registry(&self) -> &MetaRegistry {
        &self.registry
    }

    fn get(&self, context: &EntityContext, key: &Key) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        let Some(key) = self.normalize(context, key) else { return Ok(None) };
        if let Some(hit) = self.cached(context, &key) {
            return Ok(Some(hit));
        }
        match self.load(context, &key)? {
            Some(row) => self.materialize(context, &row).with_context(|| format!("building {}#{key}", context.name())),
            None => Ok(None),
        }
    }

    fn get_many(&self, context: &EntityContext, keys: &[Key]) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        let keys: Vec<Key> = keys.iter().filter_map(|k| self.normalize(context, k)).collect();
        let mut hits: HashMap<Key, Arc<dyn Entity>> = HashMap::new();
        for meta in context.entities() {
            hits.extend(self.cache.find(meta, &keys));
        }
        debug!("{} of {} {} keys cached", hits.len(), keys.len(), context.name());
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(hit) = hits.get(&key) {
                found.push(hit.clone());
            } else if let Some(row) = self.load(context, &key)? {
                if let Some(instance) = self.materialize(context, &row)? {
                    hits.insert(key, instance.clone());
                    found.push(instance);
                }
            }
        }
        Ok(found)
    }

    fn exists(&self, context: &EntityContext, key: &Key) -> Result<bool, PersistenceError> {
        let Some(key) = self.normalize(context, key) else { return Ok(false) };
        if self.cached(context, &key).is_some() {
            return Ok(true);
        }
        let Some(row) = self.load(context, &key)? else { return Ok(false) };
        if context.find_entity(&row).is_none() {
            crate::warn!("row {}#{key} has no matching entity, reported as absent", context.name());
            return Ok(false);
        }
        Ok(true)
    }

    fn find_by(&self, context: &EntityContext, column: &str, value: &Value) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        let rows = self
            .handler
            .find_by(context, column, value)
            .with_context(|| format!("finding {} by {column} = {value}", context.name()))?;
        self.materialize_all(context, rows)
    }

    fn query(&self, context: &EntityContext, name: &str, params: &ColumnData) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        let rows = self.handler.query(context, name, params).with_context(|| format!("query {name} on {}", context.name()))?;
        self.materialize_all(context, rows)
    }

    fn save(&self, meta: &Arc<EntityMeta>, mut instance: Box<dyn Entity>) -> Result<Arc<dyn Entity>, PersistenceError> {
        EntityPersistence::new(&self.registry).save(meta, instance.as_mut(), self.handler.as_ref())?;
        let key = meta
            .id_accessor()
            .from_entity(instance.as_ref())?
            .ok_or_else(|| PersistenceError::access(meta.name(), meta.id_accessor().columns().join(","), "no key after save"))?;
        let instance: Arc<dyn Entity> = Arc::from(instance);
        self.remember(meta, key, instance.clone());
        Ok(instance)
    }

    fn delete(&self, meta: &Arc<EntityMeta>, instance: &dyn Entity) -> Result<bool, PersistenceError> {
        let deleted = EntityPersistence::new(&self.registry).delete(meta, instance, self.handler.as_ref())?;
        if let Some(key) = meta.id_accessor().from_entity(instance)? {
            self.cache.remove(meta, &key);
        }
        Ok(deleted)
    }

    fn load_column(&self, meta: &Arc<EntityMeta>, table: &str, column: &str, keys: &ColumnData) -> Result<Value, PersistenceError> {
        let (table, column) = resolve(meta, table, column)?;
        self.handler.load_column(meta, table, column, keys).with_context(|| format!("loading {}.{}", meta.name(), column.name()))
    }

    fn load_collection(&self, meta: &Arc<EntityMeta>, table: &str, column: &str, keys: &ColumnData) -> Result<Vec<Value>, PersistenceError> {
        let (table, column) = resolve(meta, table, column)?;
        self.handler
            .load_collection(meta, table, column, keys)
            .with_context(|| format!("loading {}.{}", meta.name(), column.name()))
    }
}

fn resolve<'m>(
    meta: &'m EntityMeta,
    table: &str,
    column: &str,
) -> Result<(&'m TableMeta, &'m ColumnMeta), PersistenceError> {
    let table = meta
        .find_table(table)
        .ok_or_else(|| PersistenceError::NotFound(format!("{} has no table {table}", meta.name())))?;
    let column = table
        .column(column)
        .ok_or_else(|| PersistenceError::NotFound(format!("{} has no column {column}", table.name())))?;
    Ok((table, column.as_ref()))
}
