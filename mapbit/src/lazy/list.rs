use crate::access::EntityRef;
use crate::entity::{downcast_arc, Entity};
use crate::error::PersistenceError;
use crate::lazy::{Lazy, LoadState};
use std::fmt;
use std::sync::Arc;

/// Collection of associated entities, either set explicitly or resolved on first access.
pub enum LazyList<T> {
    Items(Vec<Arc<T>>),
    Deferred(Lazy<Vec<Arc<dyn Entity>>>),
}

impl<T: Entity> LazyList<T> {
    pub fn new(items: Vec<Arc<T>>) -> Self {
        LazyList::Items(items)
    }

    pub fn deferred(cell: Lazy<Vec<Arc<dyn Entity>>>) -> Self {
        LazyList::Deferred(cell)
    }

    pub fn get(&self) -> Result<Vec<Arc<T>>, PersistenceError> {
        match self {
            LazyList::Items(items) => Ok(items.clone()),
            LazyList::Deferred(cell) => cell.get()?.iter().cloned().map(downcast_arc::<T>).collect(),
        }
    }

    pub fn get_erased(&self) -> Result<Vec<Arc<dyn Entity>>, PersistenceError> {
        match self {
            LazyList::Items(items) => Ok(items.iter().map(|i| i.clone() as Arc<dyn Entity>).collect()),
            LazyList::Deferred(cell) => Ok(cell.get()?.clone()),
        }
    }

    pub fn push(&mut self, item: Arc<T>) -> Result<(), PersistenceError> {
        let mut items = self.get()?;
        items.push(item);
        *self = LazyList::Items(items);
        Ok(())
    }

    /// Forces the fetch.
    pub fn is_empty(&self) -> Result<bool, PersistenceError> {
        match self {
            LazyList::Items(items) => Ok(items.is_empty()),
            LazyList::Deferred(cell) => Ok(cell.get()?.is_empty()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            LazyList::Items(_) => true,
            LazyList::Deferred(cell) => cell.is_loaded(),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, LazyList::Deferred(_))
    }

    pub fn state(&self) -> LoadState {
        match self {
            LazyList::Items(_) => LoadState::Loaded,
            LazyList::Deferred(cell) => cell.state(),
        }
    }

    /// Members already at hand, `None` while a placeholder is unresolved.
    pub fn entity_refs(&self) -> Option<Vec<EntityRef>> {
        match self {
            LazyList::Items(items) => Some(items.iter().map(|i| EntityRef::Instance(i.clone() as Arc<dyn Entity>)).collect()),
            LazyList::Deferred(cell) => cell.peek().map(|items| items.iter().map(|i| EntityRef::Instance(i.clone())).collect()),
        }
    }

    pub fn duplicate(&self) -> Self {
        match self {
            LazyList::Items(items) => LazyList::Items(items.clone()),
            LazyList::Deferred(cell) => LazyList::Deferred(cell.duplicate()),
        }
    }
}

impl<T> Default for LazyList<T> {
    fn default() -> Self {
        LazyList::Items(Vec::new())
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyList::Items(items) => f.debug_tuple("LazyList::Items").field(items).finish(),
            LazyList::Deferred(cell) => write!(f, "LazyList::Deferred({:?})", cell.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Tag(&'static str);
    #[derive(Debug)]
    struct Other;
    crate::impl_entity!(Tag, Other);

    #[test]
    fn deferred_list_resolves_and_appends() {
        let mut tags: LazyList<Tag> = LazyList::deferred(Lazy::from_fn(|| {
            Ok(vec![Arc::new(Tag("good")) as Arc<dyn Entity>, Arc::new(Tag("boy")) as Arc<dyn Entity>])
        }));
        assert!(tags.entity_refs().is_none());
        assert!(!tags.is_empty().unwrap());
        tags.push(Arc::new(Tag("fluffy"))).unwrap();
        let names: Vec<_> = tags.get().unwrap().iter().map(|t| t.0).collect();
        assert_eq!(names, vec!["good", "boy", "fluffy"]);
        assert!(!tags.is_proxy());
    }

    #[test]
    fn wrong_member_type_is_an_error() {
        let tags: LazyList<Tag> = LazyList::deferred(Lazy::loaded(vec![Arc::new(Other) as Arc<dyn Entity>]));
        assert!(tags.get().is_err());
        assert_eq!(tags.get_erased().unwrap().len(), 1);
    }
}
