use crate::access::DataHolder;
use crate::entity::Entity;
use crate::error::PersistenceError;
use crate::lazy::{Lazy, Loader};
use crate::meta::{ColumnKind, ColumnMeta, EntityContext, EntityMeta, TableMeta};
use crate::persist::DataHolderFactory;
use crate::session::Session;
use crate::value::{ColumnData, Key, Value};
use log::debug;
use std::sync::{Arc, Weak};

fn attach(session: &Weak<dyn Session>) -> Result<Arc<dyn Session>, PersistenceError> {
    session.upgrade().ok_or(PersistenceError::SessionClosed)
}

/// One scalar or scalar collection column not read with the row.
pub struct ColumnLoader {
    session: Weak<dyn Session>,
    meta: Arc<EntityMeta>,
    table: String,
    column: String,
    collection: bool,
    keys: ColumnData,
}

impl Loader<Value> for ColumnLoader {
    fn load(&self) -> Result<Value, PersistenceError> {
        let session = attach(&self.session)?;
        debug!("fetching {}.{} for {:?}", self.meta.name(), self.column, self.keys);
        if self.collection {
            Ok(Value::List(session.load_collection(&self.meta, &self.table, &self.column, &self.keys)?))
        } else {
            session.load_column(&self.meta, &self.table, &self.column, &self.keys)
        }
    }
}

/// Target of a single association.
pub struct EntityLoader {
    session: Weak<dyn Session>,
    target: Arc<EntityContext>,
    key: Key,
}

impl EntityLoader {
    pub fn new(session: Weak<dyn Session>, target: Arc<EntityContext>, key: Key) -> Self {
        Self { session, target, key }
    }
}

impl Loader<Option<Arc<dyn Entity>>> for EntityLoader {
    fn load(&self) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        debug!("fetching {}#{}", self.target.name(), self.key);
        attach(&self.session)?.get(&self.target, &self.key)
    }
}

/// Where a [`KeySetLoader`] takes its keys from.
pub enum KeySource {
    Fixed(Vec<Key>),
    /// Stored members of a join-collection column.
    JoinTable { meta: Arc<EntityMeta>, table: String, column: String, keys: ColumnData },
}

/// Collection resolved key by key through the session, cached members are not fetched again.
pub struct KeySetLoader {
    session: Weak<dyn Session>,
    target: Arc<EntityContext>,
    source: KeySource,
}

impl KeySetLoader {
    pub fn new(session: Weak<dyn Session>, target: Arc<EntityContext>, source: KeySource) -> Self {
        Self { session, target, source }
    }
}

impl Loader<Vec<Arc<dyn Entity>>> for KeySetLoader {
    fn load(&self) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        let session = attach(&self.session)?;
        let keys = match &self.source {
            KeySource::Fixed(keys) => keys.clone(),
            KeySource::JoinTable { meta, table, column, keys } => session
                .load_collection(meta, table, column, keys)?
                .iter()
                .filter_map(|value| {
                    let key = self.target.id_accessor().from_value(value);
                    if key.is_none() {
                        crate::warn!("{}.{column} member {value} is not a key of {}", meta.name(), self.target.name());
                    }
                    key
                })
                .collect(),
        };
        debug!("fetching {} {} members", keys.len(), self.target.name());
        session.get_many(&self.target, &keys)
    }
}

/// Collection of every target whose `column` holds `value`.
pub struct QueryLoader {
    session: Weak<dyn Session>,
    target: Arc<EntityContext>,
    column: String,
    value: Value,
}

impl QueryLoader {
    pub fn new(session: Weak<dyn Session>, target: Arc<EntityContext>, column: impl Into<String>, value: Value) -> Self {
        Self { session, target, column: column.into(), value }
    }
}

impl Loader<Vec<Arc<dyn Entity>>> for QueryLoader {
    fn load(&self) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        debug!("fetching {} where {} = {}", self.target.name(), self.column, self.value);
        attach(&self.session)?.find_by(&self.target, &self.column, &self.value)
    }
}

/// Holders whose loaders resolve through a session, which they do not keep alive.
pub struct SessionHolderFactory {
    session: Weak<dyn Session>,
}

impl SessionHolderFactory {
    pub fn new(session: Weak<dyn Session>) -> Self {
        Self { session }
    }
}

impl DataHolderFactory for SessionHolderFactory {
    fn create_lazy(&self, meta: &Arc<EntityMeta>, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Option<DataHolder> {
        let collection = match column.kind() {
            ColumnKind::Plain => false,
            ColumnKind::Collection { .. } => true,
            _ => return None,
        };
        let loader = ColumnLoader {
            session: self.session.clone(),
            meta: meta.clone(),
            table: table.name().to_string(),
            column: column.name().to_string(),
            collection,
            keys: keys.clone(),
        };
        Some(DataHolder::Lazy(Lazy::new(Arc::new(loader))))
    }

    fn create_join_column(&self, _meta: &Arc<EntityMeta>, _column: &ColumnMeta, target: &Arc<EntityContext>, key: Key) -> Option<DataHolder> {
        let loader = EntityLoader::new(self.session.clone(), target.clone(), key.clone());
        Some(DataHolder::Reference { key, cell: Lazy::new(Arc::new(loader)) })
    }

    fn create_join_collection(
        &self,
        meta: &Arc<EntityMeta>,
        table: &TableMeta,
        column: &ColumnMeta,
        target: &Arc<EntityContext>,
        keys: &ColumnData,
    ) -> Option<DataHolder> {
        let source = KeySource::JoinTable {
            meta: meta.clone(),
            table: table.name().to_string(),
            column: column.name().to_string(),
            keys: keys.clone(),
        };
        let loader = KeySetLoader::new(self.session.clone(), target.clone(), source);
        Some(DataHolder::Collection(Lazy::new(Arc::new(loader))))
    }

    fn create_mapped_column(
        &self,
        _meta: &Arc<EntityMeta>,
        _column: &ColumnMeta,
        target: &Arc<EntityContext>,
        mapped_by: &str,
        owner: &Key,
    ) -> Option<DataHolder> {
        let loader = QueryLoader::new(self.session.clone(), target.clone(), mapped_by, owner.to_value());
        Some(DataHolder::Collection(Lazy::new(Arc::new(loader))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holders_outliving_their_session_fail_on_access() {
        let session: Weak<dyn Session> = Weak::<crate::session::EntitySession>::new();
        let factory = SessionHolderFactory::new(session);
        let target = dummy_context();
        let meta = target.entities()[0].clone();
        let column = ColumnMeta::plain("id", crate::value::ValueType::Int, crate::access::field(|t: &Tag| &t.id, |t: &mut Tag| &mut t.id));
        match factory.create_mapped_column(&meta, &column, &target, "owner", &Key::from(1)) {
            Some(DataHolder::Collection(lazy)) => {
                assert!(matches!(lazy.get(), Err(PersistenceError::SessionClosed)));
                assert!(!lazy.is_loaded());
            }
            other => panic!("unexpected holder {other:?}"),
        }
        match factory.create_join_column(&meta, &column, &target, Key::from(2)) {
            Some(DataHolder::Reference { key, cell }) => {
                assert_eq!(key, Key::from(2));
                assert!(matches!(cell.get(), Err(PersistenceError::SessionClosed)));
            }
            other => panic!("unexpected holder {other:?}"),
        }
    }

    #[derive(Debug, Default)]
    struct Tag { id: i64 }
    crate::impl_entity!(Tag);

    fn dummy_context() -> Arc<EntityContext> {
        use crate::access::field;
        use crate::value::ValueType;
        let meta = EntityMeta::builder::<Tag>("Tag")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|t: &Tag| &t.id, |t: &mut Tag| &mut t.id)).primary_key())
            .build()
            .unwrap();
        Arc::new(EntityContext::single(meta))
    }
}
