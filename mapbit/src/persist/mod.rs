//! Turning instances into column data and back, and the storage collaborator interfaces this relies on.

pub mod builder;
pub mod idgen;
pub mod persistence;

pub use builder::EntityBuilder;
pub use idgen::{IdGenerator, SequenceGenerator, TableGenerator, UuidGenerator};
pub use persistence::EntityPersistence;

use crate::access::DataHolder;
use crate::error::PersistenceError;
use crate::meta::{ColumnMeta, EntityContext, EntityMeta, TableMeta};
use crate::session::{Session, SessionHolderFactory};
use crate::value::{ColumnData, Key, Value};
use std::sync::{Arc, Weak};

/// Storage I/O of one session, implemented per backend.
///
/// Rows are addressed by the primary-key columns of the table they live in.
pub trait DataHandler: Send + Sync {
    /// Writes one row. Null values mean the column is cleared.
    fn save(&self, meta: &EntityMeta, table: &TableMeta, data: ColumnData) -> Result<bool, PersistenceError>;

    /// Makes the stored members of `column` equal to `items`.
    fn save_collection(
        &self,
        meta: &EntityMeta,
        table: &TableMeta,
        keys: ColumnData,
        column: &ColumnMeta,
        items: Vec<Value>,
    ) -> Result<bool, PersistenceError>;

    fn delete(&self, meta: &EntityMeta, table: &TableMeta, keys: ColumnData) -> Result<bool, PersistenceError>;

    /// Eager columns of every primary table of the context, `None` when no row exists.
    fn load(&self, context: &EntityContext, keys: &ColumnData) -> Result<Option<ColumnData>, PersistenceError>;

    fn load_column(&self, meta: &EntityMeta, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Result<Value, PersistenceError>;

    fn load_collection(
        &self,
        meta: &EntityMeta,
        table: &TableMeta,
        column: &ColumnMeta,
        keys: &ColumnData,
    ) -> Result<Vec<Value>, PersistenceError>;

    /// Rows whose `column` holds `value`, shaped like [`DataHandler::load`].
    fn find_by(&self, context: &EntityContext, column: &str, value: &Value) -> Result<Vec<ColumnData>, PersistenceError>;

    fn query(&self, context: &EntityContext, name: &str, params: &ColumnData) -> Result<Vec<ColumnData>, PersistenceError>;

    fn pending_work(&self) -> bool;
    fn begin_work(&self) -> Result<(), PersistenceError>;
    fn commit_work(&self) -> Result<(), PersistenceError>;
    fn rollback_work(&self) -> Result<(), PersistenceError>;
}

/// Creates the holders the builder assigns to columns that are not read with the row.
///
/// Returning `None` leaves the field unset.
pub trait DataHolderFactory: Send + Sync {
    fn create_static(&self, value: Value) -> DataHolder {
        DataHolder::Static(value)
    }

    fn create_lazy(&self, meta: &Arc<EntityMeta>, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Option<DataHolder>;

    fn create_join_column(
        &self,
        meta: &Arc<EntityMeta>,
        column: &ColumnMeta,
        target: &Arc<EntityContext>,
        key: Key,
    ) -> Option<DataHolder>;

    fn create_join_collection(
        &self,
        meta: &Arc<EntityMeta>,
        table: &TableMeta,
        column: &ColumnMeta,
        target: &Arc<EntityContext>,
        keys: &ColumnData,
    ) -> Option<DataHolder>;

    fn create_mapped_column(
        &self,
        meta: &Arc<EntityMeta>,
        column: &ColumnMeta,
        target: &Arc<EntityContext>,
        mapped_by: &str,
        owner: &Key,
    ) -> Option<DataHolder>;
}

/// A backend: hands out one handler per session.
pub trait DataStore: Send + Sync {
    fn open(&self) -> Result<Box<dyn DataHandler>, PersistenceError>;

    fn holder_factory(&self, session: Weak<dyn Session>) -> Arc<dyn DataHolderFactory> {
        Arc::new(SessionHolderFactory::new(session))
    }
}

/// Named counters advanced with compare-and-set, backing [`TableGenerator`].
pub trait CounterStore: Send + Sync {
    fn current(&self, counter: &str) -> Result<Option<i64>, PersistenceError>;

    /// Sets `counter` to `next` only if it still holds `expected`.
    fn compare_and_set(&self, counter: &str, expected: Option<i64>, next: i64) -> Result<bool, PersistenceError>;
}
