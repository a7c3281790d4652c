//! Reading and writing one logical property of an entity without knowing how it is stored.
//!
//! Accessors are plain adapters built per mapped field when metadata is assembled. They never touch a
//! backend: anything that needs a fetch arrives already wrapped in a [`DataHolder`].

pub mod field;
pub mod id;

pub use field::{field, lazy_field, list, reference, FieldAccessor, LazyFieldAccessor, ListAccessor, RefAccessor};
pub use id::{CompositeIdAccessor, HierarchyIdAccessor, IdAccessor, NullIdAccessor, SimpleIdAccessor};

use crate::entity::Entity;
use crate::error::PersistenceError;
use crate::lazy::Lazy;
use crate::value::{Key, Value};
use std::fmt;
use std::sync::Arc;

/// Target of an association as the orchestrator sees it.
#[derive(Clone)]
pub enum EntityRef {
    Key(Key),
    Instance(Arc<dyn Entity>),
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Key(key) => write!(f, "EntityRef::Key({key})"),
            EntityRef::Instance(e) => write!(f, "EntityRef::Instance({})", e.type_name()),
        }
    }
}

/// What a column accessor reads out of an instance.
#[derive(Clone, Debug)]
pub enum FieldValue {
    Scalar(Value),
    Ref(Option<EntityRef>),
    Refs(Vec<EntityRef>),
}

impl FieldValue {
    pub fn scalar(self) -> Option<Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

/// Value handed to [`ColumnAccessor::set_value`], either present or resolved on first access.
pub enum DataHolder {
    Static(Value),
    Lazy(Lazy<Value>),
    Reference { key: Key, cell: Lazy<Option<Arc<dyn Entity>>> },
    Collection(Lazy<Vec<Arc<dyn Entity>>>),
}

impl DataHolder {
    pub fn kind(&self) -> &'static str {
        match self {
            DataHolder::Static(_) => "static",
            DataHolder::Lazy(_) => "lazy",
            DataHolder::Reference { .. } => "reference",
            DataHolder::Collection(_) => "collection",
        }
    }
}

impl fmt::Debug for DataHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataHolder::Static(v) => f.debug_tuple("DataHolder::Static").field(v).finish(),
            DataHolder::Lazy(l) => write!(f, "DataHolder::Lazy({:?})", l.state()),
            DataHolder::Reference { key, cell } => write!(f, "DataHolder::Reference({key}, {:?})", cell.state()),
            DataHolder::Collection(l) => write!(f, "DataHolder::Collection({:?})", l.state()),
        }
    }
}

/// Gets and sets one property of an erased entity.
///
/// Errors name the entity but leave the property blank, [`ColumnMeta`](crate::meta::ColumnMeta) fills it in.
pub trait ColumnAccessor: Send + Sync {
    fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError>;

    /// Returns whether the property was assigned.
    fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError>;

    /// May force a lazy unit.
    fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError>;

    /// Never forces a lazy unit.
    fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError>;

    /// Copies the property without forcing it, unloaded units are duplicated.
    fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError>;
}
