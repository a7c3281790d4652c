//! mapbit maps typed domain objects onto rows of pluggable backing stores.
//!
//! Entities are described once by [`EntityMeta`], either on their own or as members of a discriminated
//! hierarchy, and registered in a [`MetaRegistry`]. Sessions read through an identity cache, build
//! instances whose associations and lazy columns resolve at most once on first access, and fan writes out
//! over the tables of an entity inside an optional unit of work.
//!
//! Storage itself is a collaborator behind [`DataStore`] and [`DataHandler`]. [`memory::MemoryStore`] is
//! the in-process reference implementation.

pub mod access;
pub mod cache;
pub mod entity;
pub mod error;
pub mod lazy;
pub mod logger;
pub mod manager;
pub mod memory;
pub mod meta;
pub mod persist;
pub mod retry;
pub mod session;
pub mod settings;
pub mod txn;
pub mod value;

pub use access::{field, lazy_field, list, reference, ColumnAccessor, DataHolder, EntityRef, FieldValue, IdAccessor};
pub use cache::{EntityCache, NullCache, StrongCache, WeakCache};
pub use entity::{downcast_arc, downcast_box, Entity};
pub use error::{PersistenceError, ResultExt};
pub use lazy::{Lazy, LazyData, LazyList, LazyRef, LoadState, Loader};
pub use manager::{Engine, EntityManager};
pub use meta::{ColumnKind, ColumnMeta, EntityContext, EntityMeta, MetaRegistry, TableMeta};
pub use persist::{
    CounterStore, DataHandler, DataHolderFactory, DataStore, EntityBuilder, EntityPersistence, IdGenerator, SequenceGenerator,
    TableGenerator, UuidGenerator,
};
pub use session::{EntitySession, Session, UnitOfWork};
pub use settings::{CacheKind, EngineSettings};
pub use txn::{Transaction, TransactionState, Transactional};
pub use value::{ColumnData, ColumnValue, IntoValue, Key, Value, ValueType};

pub use chrono;
pub use uuid;
