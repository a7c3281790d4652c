use crate::error::PersistenceError;
use crate::lazy::{Lazy, LoadState};
use crate::value::{ColumnValue, Value};
use std::any::type_name;
use std::fmt;

/// Single lazily loaded column value.
pub enum LazyData<V> {
    Value(V),
    Deferred(Lazy<Value>),
}

impl<V: ColumnValue + Clone> LazyData<V> {
    pub fn new(value: V) -> Self {
        LazyData::Value(value)
    }

    pub fn deferred(lazy: Lazy<Value>) -> Self {
        LazyData::Deferred(lazy)
    }

    /// Resolves the value, fetching it on first access. A fetched value of the wrong type is an access error.
    pub fn get(&self) -> Result<V, PersistenceError> {
        match self {
            LazyData::Value(v) => Ok(v.clone()),
            LazyData::Deferred(lazy) => {
                V::from_value(lazy.get()?.clone()).map_err(|e| PersistenceError::access(type_name::<V>(), "", e))
            }
        }
    }

    pub fn set(&mut self, value: V) {
        *self = LazyData::Value(value);
    }

    /// Forces the fetch.
    pub fn is_empty(&self) -> Result<bool, PersistenceError> {
        Ok(self.get()?.to_value().is_empty())
    }

    pub fn is_loaded(&self) -> bool {
        match self {
            LazyData::Value(_) => true,
            LazyData::Deferred(lazy) => lazy.is_loaded(),
        }
    }

    pub fn state(&self) -> LoadState {
        match self {
            LazyData::Value(_) => LoadState::Loaded,
            LazyData::Deferred(lazy) => lazy.state(),
        }
    }

    /// Resolved value without triggering a fetch.
    pub fn peek(&self) -> Option<Value> {
        match self {
            LazyData::Value(v) => Some(v.to_value()),
            LazyData::Deferred(lazy) => lazy.peek().cloned(),
        }
    }

    pub fn duplicate(&self) -> Self {
        match self {
            LazyData::Value(v) => LazyData::Value(v.clone()),
            LazyData::Deferred(lazy) => LazyData::Deferred(lazy.duplicate()),
        }
    }
}

impl<V: Default> Default for LazyData<V> {
    fn default() -> Self {
        LazyData::Value(V::default())
    }
}

impl<V: Clone> Clone for LazyData<V> {
    fn clone(&self) -> Self {
        match self {
            LazyData::Value(v) => LazyData::Value(v.clone()),
            LazyData::Deferred(lazy) => LazyData::Deferred(lazy.clone()),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for LazyData<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyData::Value(v) => f.debug_tuple("LazyData").field(v).finish(),
            LazyData::Deferred(lazy) => f.debug_tuple("LazyData").field(lazy).finish(),
        }
    }
}
