use crate::access::EntityRef;
use crate::entity::{downcast_arc, Entity};
use crate::error::PersistenceError;
use crate::lazy::{Lazy, LoadState};
use crate::value::Key;
use std::fmt;
use std::sync::Arc;

/// Single association to another entity.
///
/// `Key` references an entity by identity only (useful when saving without loading the target),
/// `Deferred` is the placeholder wired by the builder: its key is known, the target is fetched on `get`.
pub enum LazyRef<T> {
    Empty,
    Key(Key),
    Instance(Arc<T>),
    Deferred { key: Key, cell: Lazy<Option<Arc<dyn Entity>>> },
}

impl<T: Entity> LazyRef<T> {
    pub fn to(key: impl Into<Key>) -> Self {
        LazyRef::Key(key.into())
    }

    pub fn instance(target: Arc<T>) -> Self {
        LazyRef::Instance(target)
    }

    pub fn deferred(key: Key, cell: Lazy<Option<Arc<dyn Entity>>>) -> Self {
        LazyRef::Deferred { key, cell }
    }

    /// Resolves the target, fetching it on first access.
    pub fn get(&self) -> Result<Option<Arc<T>>, PersistenceError> {
        match self.get_erased()? {
            Some(target) => downcast_arc::<T>(target).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves the target without narrowing it, needed when the target is a hierarchy member.
    pub fn get_erased(&self) -> Result<Option<Arc<dyn Entity>>, PersistenceError> {
        match self {
            LazyRef::Empty => Ok(None),
            LazyRef::Instance(target) => Ok(Some(target.clone() as Arc<dyn Entity>)),
            LazyRef::Key(key) => Err(PersistenceError::NotFound(format!("reference {key} is not attached to a session"))),
            LazyRef::Deferred { cell, .. } => Ok(cell.get()?.clone()),
        }
    }

    pub fn key(&self) -> Option<&Key> {
        match self {
            LazyRef::Key(key) | LazyRef::Deferred { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            LazyRef::Empty => true,
            LazyRef::Deferred { cell, .. } => matches!(cell.peek(), Some(None)),
            _ => false,
        }
    }

    /// False only for a placeholder whose target has not been fetched yet.
    pub fn is_loaded(&self) -> bool {
        match self {
            LazyRef::Deferred { cell, .. } => cell.is_loaded(),
            _ => true,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, LazyRef::Deferred { .. })
    }

    pub fn state(&self) -> LoadState {
        match self {
            LazyRef::Deferred { cell, .. } => cell.state(),
            _ => LoadState::Loaded,
        }
    }

    /// What the orchestrator stores: the instance when one is at hand, else the key.
    pub fn entity_ref(&self) -> Option<EntityRef> {
        match self {
            LazyRef::Empty => None,
            LazyRef::Key(key) => Some(EntityRef::Key(key.clone())),
            LazyRef::Instance(target) => Some(EntityRef::Instance(target.clone() as Arc<dyn Entity>)),
            LazyRef::Deferred { key, cell } => match cell.peek() {
                Some(None) => None,
                _ => Some(EntityRef::Key(key.clone())),
            },
        }
    }

    pub fn duplicate(&self) -> Self {
        match self {
            LazyRef::Empty => LazyRef::Empty,
            LazyRef::Key(key) => LazyRef::Key(key.clone()),
            LazyRef::Instance(target) => LazyRef::Instance(target.clone()),
            LazyRef::Deferred { key, cell } => LazyRef::Deferred { key: key.clone(), cell: cell.duplicate() },
        }
    }
}

impl<T> Default for LazyRef<T> {
    fn default() -> Self {
        LazyRef::Empty
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyRef::Empty => write!(f, "LazyRef::Empty"),
            LazyRef::Key(key) => write!(f, "LazyRef::Key({key})"),
            LazyRef::Instance(target) => f.debug_tuple("LazyRef::Instance").field(target).finish(),
            LazyRef::Deferred { key, cell } => write!(f, "LazyRef::Deferred({key}, {:?})", cell.state()),
        }
    }
}
