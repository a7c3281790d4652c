use crate::cache::{self, EntityCache};
use crate::entity::{downcast_arc, downcast_box, Entity};
use crate::error::PersistenceError;
use crate::meta::{EntityContext, EntityMeta, MetaRegistry};
use crate::persist::{CounterStore, DataStore, EntityBuilder, TableGenerator};
use crate::session::{EntitySession, Session};
use crate::settings::EngineSettings;
use crate::txn::{Transaction, Transactional};
use crate::value::{ColumnData, IntoValue, Key};
use crate::logger;
use std::sync::Arc;

/// Process-level owner of metadata, backend and the shared identity cache.
pub struct Engine {
    registry: Arc<MetaRegistry>,
    store: Arc<dyn DataStore>,
    cache: Arc<dyn EntityCache>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(registry: MetaRegistry, store: Arc<dyn DataStore>, settings: EngineSettings) -> Self {
        logger::set_level(settings.logging.level);
        let cache = cache::from_settings(&settings.cache);
        crate::info!(
            "engine ready with {} entities and {} hierarchies, {:?} cache",
            registry.entities().count(),
            registry.hierarchies().count(),
            settings.cache.kind
        );
        Self { registry: Arc::new(registry), store, cache, settings }
    }

    pub fn registry(&self) -> &Arc<MetaRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn EntityCache> {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Counter-backed generator honoring the configured retry budget.
    pub fn table_generator(&self, counter: impl Into<String>, store: Arc<dyn CounterStore>) -> TableGenerator {
        TableGenerator::new(counter, store).with_retry_budget(self.settings.id_generation.retry_budget)
    }

    /// A manager over a fresh session.
    pub fn manager(&self) -> Result<EntityManager, PersistenceError> {
        let session = EntitySession::open(self.registry.clone(), self.cache.clone(), self.store.as_ref())?;
        Ok(EntityManager { registry: self.registry.clone(), session })
    }
}

/// Typed entry point of one session.
pub struct EntityManager {
    registry: Arc<MetaRegistry>,
    session: Arc<EntitySession>,
}

impl EntityManager {
    pub fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    fn meta_of<T: Entity>(&self) -> Result<&Arc<EntityMeta>, PersistenceError> {
        let context = self.registry.context_of::<T>()?;
        context
            .entity_for(std::any::TypeId::of::<T>())
            .ok_or_else(|| PersistenceError::NotFound(format!("{} is not a mapped entity", std::any::type_name::<T>())))
    }

    fn context(&self, name: &str) -> Result<&Arc<EntityContext>, PersistenceError> {
        self.registry.context(name)
    }

    pub fn get<T: Entity>(&self, key: impl Into<Key>) -> Result<Option<Arc<T>>, PersistenceError> {
        let context = self.registry.context_of::<T>()?;
        self.session.get(context, &key.into())?.map(downcast_arc).transpose()
    }

    /// Lookup by entity or hierarchy name, a hierarchy yields whichever member the row holds.
    pub fn get_in(&self, name: &str, key: impl Into<Key>) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        self.session.get(self.context(name)?, &key.into())
    }

    pub fn get_all<T: Entity>(&self, keys: &[Key]) -> Result<Vec<Arc<T>>, PersistenceError> {
        let context = self.registry.context_of::<T>()?;
        self.session.get_many(context, keys)?.into_iter().map(downcast_arc).collect()
    }

    pub fn exists<T: Entity>(&self, key: impl Into<Key>) -> Result<bool, PersistenceError> {
        self.session.exists(self.registry.context_of::<T>()?, &key.into())
    }

    pub fn exists_in(&self, name: &str, key: impl Into<Key>) -> Result<bool, PersistenceError> {
        self.session.exists(self.context(name)?, &key.into())
    }

    /// Generates missing keys, writes every table and returns the cached instance.
    pub fn save<T: Entity>(&self, entity: T) -> Result<Arc<T>, PersistenceError> {
        let meta = self.meta_of::<T>()?;
        downcast_arc(self.session.save(meta, Box::new(entity))?)
    }

    /// Saves an erased instance as whichever member of `name` it is.
    pub fn save_in(&self, name: &str, entity: Box<dyn Entity>) -> Result<Arc<dyn Entity>, PersistenceError> {
        let context = self.context(name)?;
        let meta = context
            .entity_of(entity.as_ref())
            .ok_or_else(|| PersistenceError::NoMatchingEntity(format!("{} is not a member of {name}", entity.type_name())))?
            .clone();
        self.session.save(&meta, entity)
    }

    pub fn delete<T: Entity>(&self, entity: &T) -> Result<bool, PersistenceError> {
        self.session.delete(self.meta_of::<T>()?, entity)
    }

    pub fn find_by<T: Entity>(&self, column: &str, value: impl IntoValue) -> Result<Vec<Arc<T>>, PersistenceError> {
        let context = self.registry.context_of::<T>()?;
        self.session.find_by(context, column, &value.into_value())?.into_iter().map(downcast_arc).collect()
    }

    /// Runs a query registered with the backend.
    pub fn query<T: Entity>(&self, name: &str, params: &ColumnData) -> Result<Vec<Arc<T>>, PersistenceError> {
        let context = self.registry.context_of::<T>()?;
        self.session.query(context, name, params)?.into_iter().map(downcast_arc).collect()
    }

    pub fn query_in(&self, target: &str, name: &str, params: &ColumnData) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        self.session.query(self.context(target)?, name, params)
    }

    /// An owned copy not shared with the identity cache, lazy fields stay lazy.
    pub fn detach<T: Entity>(&self, entity: &T) -> Result<T, PersistenceError> {
        let copy = EntityBuilder::copy(self.meta_of::<T>()?, entity)?;
        downcast_box::<T>(copy).map(|boxed| *boxed)
    }
}

impl Transactional for EntityManager {
    fn begin_transaction(&self) -> Result<Transaction<'_>, PersistenceError> {
        Transaction::begin(self.session.as_ref())
    }
}
