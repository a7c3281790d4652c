//! In-process reference backend.
//!
//! Tables are hash maps keyed by the primary-key values of each row, in table column order. Writes are
//! applied immediately and undone on rollback, so concurrent sessions see each other's pending work.

use crate::error::PersistenceError;
use crate::meta::{ColumnMeta, EntityContext, EntityMeta, TableMeta};
use crate::persist::{CounterStore, DataHandler, DataStore};
use crate::value::{ColumnData, Key, Value};
use crossbeam::sync::ShardedLock;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

type RowKey = Vec<Value>;

/// Named query predicate, called with a stored row and the query parameters.
pub type Predicate = Arc<dyn Fn(&ColumnData, &ColumnData) -> bool + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    rows: HashMap<String, HashMap<RowKey, ColumnData>>,
    collections: HashMap<(String, String), HashMap<RowKey, Vec<Value>>>,
    counters: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    queries: Arc<ShardedLock<HashMap<String, Predicate>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_query<F>(&self, name: impl Into<String>, predicate: F) -> Result<(), PersistenceError>
    where
        F: Fn(&ColumnData, &ColumnData) -> bool + Send + Sync + 'static,
    {
        self.queries.write()?.insert(name.into(), Arc::new(predicate));
        Ok(())
    }

    /// Stored rows of `table` in no particular order.
    pub fn rows(&self, table: &str) -> Result<Vec<ColumnData>, PersistenceError> {
        Ok(self.state.lock()?.rows.get(table).map(|rows| rows.values().cloned().collect()).unwrap_or_default())
    }

    /// Stored members of `column` for the row identified by `key`, key values in table column order.
    pub fn collection(&self, table: &str, column: &str, key: &[Value]) -> Result<Vec<Value>, PersistenceError> {
        let state = self.state.lock()?;
        Ok(state
            .collections
            .get(&(table.to_string(), column.to_string()))
            .and_then(|members| members.get(key))
            .cloned()
            .unwrap_or_default())
    }
}

impl DataStore for MemoryStore {
    fn open(&self) -> Result<Box<dyn DataHandler>, PersistenceError> {
        Ok(Box::new(MemoryHandler { state: self.state.clone(), queries: self.queries.clone(), work: Mutex::new(None) }))
    }
}

impl CounterStore for MemoryStore {
    fn current(&self, counter: &str) -> Result<Option<i64>, PersistenceError> {
        Ok(self.state.lock()?.counters.get(counter).copied())
    }

    fn compare_and_set(&self, counter: &str, expected: Option<i64>, next: i64) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock()?;
        if state.counters.get(counter).copied() != expected {
            return Ok(false);
        }
        state.counters.insert(counter.to_string(), next);
        Ok(true)
    }
}

enum Undo {
    Row { table: String, key: RowKey, previous: Option<ColumnData> },
    Collection { table: String, column: String, key: RowKey, previous: Option<Vec<Value>> },
}

pub struct MemoryHandler {
    state: Arc<Mutex<MemoryState>>,
    queries: Arc<ShardedLock<HashMap<String, Predicate>>>,
    work: Mutex<Option<Vec<Undo>>>,
}

fn row_key(table: &TableMeta, data: &ColumnData) -> Result<RowKey, PersistenceError> {
    table
        .primary_keys()
        .map(|c| {
            data.get(c.name())
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| PersistenceError::Backend(format!("{} row without key column {}", table.name(), c.name())))
        })
        .collect()
}

/// Eager columns of `table`, absent values as null.
fn project(table: &TableMeta, row: &ColumnData) -> ColumnData {
    table
        .columns()
        .filter(|c| c.is_eager())
        .map(|c| (c.name().to_string(), row.get(c.name()).cloned().unwrap_or(Value::Null)))
        .collect()
}

impl MemoryHandler {
    fn record(&self, undo: Undo) -> Result<(), PersistenceError> {
        if let Some(log) = self.work.lock()?.as_mut() {
            log.push(undo);
        }
        Ok(())
    }

    /// Rows are merged across the primary tables of one member only. A key stored by more than one
    /// member of a hierarchy is ambiguous and yields nothing.
    fn load_locked(&self, state: &MemoryState, context: &EntityContext, keys: &ColumnData) -> Option<ColumnData> {
        let mut claimed: Vec<ColumnData> = Vec::new();
        let mut unclaimed: Vec<ColumnData> = Vec::new();
        for meta in context.entities() {
            let mut found: Option<ColumnData> = None;
            for table in meta.primary_tables() {
                let Ok(key) = row_key(table, keys) else { continue };
                if let Some(row) = state.rows.get(table.name()).and_then(|rows| rows.get(&key)) {
                    found.get_or_insert_with(ColumnData::new).merge(project(table, row));
                }
            }
            let Some(row) = found else { continue };
            let owned = context.find_entity(&row).is_some_and(|m| Arc::ptr_eq(m, meta));
            let bucket = if owned { &mut claimed } else { &mut unclaimed };
            if !bucket.contains(&row) {
                bucket.push(row);
            }
        }
        let candidates = if claimed.is_empty() { unclaimed } else { claimed };
        match candidates.len() {
            0 => None,
            1 => candidates.into_iter().next(),
            n => {
                crate::warn!("{n} members of {} hold a row under {:?}, none returned", context.name(), keys);
                None
            }
        }
    }

    /// Full rows of every primary-table row accepted by `accept`.
    fn scan(&self, context: &EntityContext, accept: impl Fn(&ColumnData) -> bool) -> Result<Vec<ColumnData>, PersistenceError> {
        let state = self.state.lock()?;
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for table in context.primary_tables() {
            let Some(rows) = state.rows.get(table.name()) else { continue };
            for row in rows.values().filter(|row| accept(row)) {
                match context.id_accessor().from_data(row) {
                    Some(key) => {
                        if seen.insert(key.clone()) {
                            let keys = context.id_accessor().from_key(&key);
                            found.extend(self.load_locked(&state, context, &keys));
                        }
                    }
                    None => found.push(project(table, row)),
                }
            }
        }
        Ok(found)
    }
}

impl DataHandler for MemoryHandler {
    fn save(&self, meta: &EntityMeta, table: &TableMeta, data: ColumnData) -> Result<bool, PersistenceError> {
        let key = row_key(table, &data)?;
        let mut state = self.state.lock()?;
        let rows = state.rows.entry(table.name().to_string()).or_default();
        let previous = rows.get(&key).cloned();
        let mut row = previous.clone().unwrap_or_default();
        for (column, value) in data {
            if value.is_null() {
                row.remove(&column);
            } else {
                row.insert(column, value);
            }
        }
        let changed = previous.as_ref() != Some(&row);
        rows.insert(key.clone(), row);
        drop(state);
        if changed {
            debug!("{} row {:?} of {} written", table.name(), key, meta.name());
            self.record(Undo::Row { table: table.name().to_string(), key, previous })?;
        }
        Ok(changed)
    }

    fn save_collection(
        &self,
        meta: &EntityMeta,
        table: &TableMeta,
        keys: ColumnData,
        column: &ColumnMeta,
        items: Vec<Value>,
    ) -> Result<bool, PersistenceError> {
        let key = row_key(table, &keys)?;
        let mut state = self.state.lock()?;
        let members = state.collections.entry((table.name().to_string(), column.name().to_string())).or_default();
        let previous = members.get(&key).cloned();
        let stored = previous.clone().unwrap_or_default();
        let added = items.iter().filter(|item| !stored.contains(item)).count();
        let removed = stored.iter().filter(|item| !items.contains(item)).count();
        if added == 0 && removed == 0 && stored.len() == items.len() {
            return Ok(false);
        }
        members.insert(key.clone(), items);
        drop(state);
        debug!("{}.{} of {:?}: {added} added, {removed} removed", meta.name(), column.name(), key);
        self.record(Undo::Collection { table: table.name().to_string(), column: column.name().to_string(), key, previous })?;
        Ok(true)
    }

    fn delete(&self, meta: &EntityMeta, table: &TableMeta, keys: ColumnData) -> Result<bool, PersistenceError> {
        let key = row_key(table, &keys)?;
        let mut undo = Vec::new();
        let mut state = self.state.lock()?;
        if let Some(previous) = state.rows.get_mut(table.name()).and_then(|rows| rows.remove(&key)) {
            undo.push(Undo::Row { table: table.name().to_string(), key: key.clone(), previous: Some(previous) });
        }
        for column in table.collection_columns() {
            let slot = (table.name().to_string(), column.name().to_string());
            if let Some(previous) = state.collections.get_mut(&slot).and_then(|members| members.remove(&key)) {
                undo.push(Undo::Collection { table: slot.0, column: slot.1, key: key.clone(), previous: Some(previous) });
            }
        }
        drop(state);
        let deleted = !undo.is_empty();
        if deleted {
            debug!("{} row {:?} of {} deleted", table.name(), key, meta.name());
        }
        for entry in undo {
            self.record(entry)?;
        }
        Ok(deleted)
    }

    fn load(&self, context: &EntityContext, keys: &ColumnData) -> Result<Option<ColumnData>, PersistenceError> {
        let state = self.state.lock()?;
        Ok(self.load_locked(&state, context, keys))
    }

    fn load_column(&self, _meta: &EntityMeta, table: &TableMeta, column: &ColumnMeta, keys: &ColumnData) -> Result<Value, PersistenceError> {
        let key = row_key(table, keys)?;
        let state = self.state.lock()?;
        Ok(state
            .rows
            .get(table.name())
            .and_then(|rows| rows.get(&key))
            .and_then(|row| row.get(column.name()))
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn load_collection(
        &self,
        _meta: &EntityMeta,
        table: &TableMeta,
        column: &ColumnMeta,
        keys: &ColumnData,
    ) -> Result<Vec<Value>, PersistenceError> {
        let key = row_key(table, keys)?;
        let state = self.state.lock()?;
        Ok(state
            .collections
            .get(&(table.name().to_string(), column.name().to_string()))
            .and_then(|members| members.get(&key))
            .cloned()
            .unwrap_or_default())
    }

    fn find_by(&self, context: &EntityContext, column: &str, value: &Value) -> Result<Vec<ColumnData>, PersistenceError> {
        self.scan(context, |row| row.get(column) == Some(value))
    }

    fn query(&self, context: &EntityContext, name: &str, params: &ColumnData) -> Result<Vec<ColumnData>, PersistenceError> {
        let predicate = self
            .queries
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(format!("no query named {name}")))?;
        self.scan(context, |row| predicate(row, params))
    }

    fn pending_work(&self) -> bool {
        self.work.lock().map(|work| work.is_some()).unwrap_or(false)
    }

    fn begin_work(&self) -> Result<(), PersistenceError> {
        let mut work = self.work.lock()?;
        if work.is_some() {
            return Err(PersistenceError::Backend("work already pending".into()));
        }
        *work = Some(Vec::new());
        Ok(())
    }

    fn commit_work(&self) -> Result<(), PersistenceError> {
        let log = self.work.lock()?.take().ok_or_else(|| PersistenceError::Backend("no pending work".into()))?;
        debug!("committed {} writes", log.len());
        Ok(())
    }

    fn rollback_work(&self) -> Result<(), PersistenceError> {
        let log = self.work.lock()?.take().ok_or_else(|| PersistenceError::Backend("no pending work".into()))?;
        let mut state = self.state.lock()?;
        debug!("rolling back {} writes", log.len());
        for undo in log.into_iter().rev() {
            match undo {
                Undo::Row { table, key, previous } => {
                    let rows = state.rows.entry(table).or_default();
                    match previous {
                        Some(row) => rows.insert(key, row),
                        None => rows.remove(&key),
                    };
                }
                Undo::Collection { table, column, key, previous } => {
                    let members = state.collections.entry((table, column)).or_default();
                    match previous {
                        Some(items) => members.insert(key, items),
                        None => members.remove(&key),
                    };
                }
            }
        }
        Ok(())
    }
}

impl MemoryStore {
    /// Keys of `table` as stored, for inspecting rows written under a composite key.
    pub fn keys(&self, table: &TableMeta) -> Result<Vec<Key>, PersistenceError> {
        let columns: Vec<String> = table.primary_keys().map(|c| c.name().to_string()).collect();
        let state = self.state.lock()?;
        Ok(state
            .rows
            .get(table.name())
            .map(|rows| {
                rows.keys()
                    .map(|values| match values.as_slice() {
                        [single] => Key::Simple(single.clone()),
                        _ => Key::Composite(columns.iter().cloned().zip(values.iter().cloned()).collect()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::field;
    use crate::value::ValueType;

    #[derive(Debug, Default)]
    struct Dog { id: i64, name: String, tags: Vec<String> }
    crate::impl_entity!(Dog);

    fn meta() -> Arc<EntityMeta> {
        EntityMeta::builder::<Dog>("Dog")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
            .column(ColumnMeta::plain("name", ValueType::Text, field(|d: &Dog| &d.name, |d: &mut Dog| &mut d.name)))
            .column(ColumnMeta::collection("tags", ValueType::Text, field(|d: &Dog| &d.tags, |d: &mut Dog| &mut d.tags)))
            .build()
            .unwrap()
    }

    #[test]
    fn null_clears_a_stored_column() {
        let meta = meta();
        let table = meta.find_table("dog").unwrap();
        let handler = MemoryStore::new().open().unwrap();
        assert!(handler.save(&meta, table, ColumnData::new().with("id", 1).with("name", "rex")).unwrap());
        assert!(!handler.save(&meta, table, ColumnData::new().with("id", 1).with("name", "rex")).unwrap());
        assert!(handler.save(&meta, table, ColumnData::new().with("id", 1).with("name", Value::Null)).unwrap());
        let context = EntityContext::single(meta.clone());
        let row = handler.load(&context, &ColumnData::new().with("id", 1)).unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&Value::Null));
    }

    #[test]
    fn collection_saves_report_changes_only() {
        let meta = meta();
        let table = meta.find_table("dog_tags").unwrap();
        let column = meta.column("tags").unwrap();
        let store = MemoryStore::new();
        let handler = store.open().unwrap();
        let keys = ColumnData::new().with("id", 1);
        let items = vec![Value::Text("good".into()), Value::Text("loud".into())];
        assert!(handler.save_collection(&meta, table, keys.clone(), column, items.clone()).unwrap());
        assert!(!handler.save_collection(&meta, table, keys.clone(), column, items).unwrap());
        assert!(handler.save_collection(&meta, table, keys.clone(), column, vec![Value::Text("good".into())]).unwrap());
        assert_eq!(store.collection("dog_tags", "tags", &[Value::Int(1)]).unwrap(), vec![Value::Text("good".into())]);
    }

    #[test]
    fn rollback_restores_previous_state() {
        let meta = meta();
        let table = meta.find_table("dog").unwrap();
        let store = MemoryStore::new();
        let handler = store.open().unwrap();
        handler.save(&meta, table, ColumnData::new().with("id", 1).with("name", "rex")).unwrap();
        handler.begin_work().unwrap();
        assert!(handler.pending_work());
        assert!(handler.begin_work().is_err());
        handler.save(&meta, table, ColumnData::new().with("id", 1).with("name", "max")).unwrap();
        handler.save(&meta, table, ColumnData::new().with("id", 2).with("name", "bo")).unwrap();
        handler.delete(&meta, table, ColumnData::new().with("id", 1)).unwrap();
        handler.rollback_work().unwrap();
        assert!(!handler.pending_work());
        assert_eq!(store.rows("dog").unwrap(), vec![ColumnData::new().with("id", 1).with("name", "rex")]);
        assert_eq!(store.keys(table).unwrap(), vec![Key::from(1)]);
    }

    #[test]
    fn counters_compare_and_set() {
        let store = MemoryStore::new();
        assert!(store.compare_and_set("dogs", None, 1).unwrap());
        assert!(!store.compare_and_set("dogs", None, 1).unwrap());
        assert!(store.compare_and_set("dogs", Some(1), 2).unwrap());
        assert_eq!(store.current("dogs").unwrap(), Some(2));
    }

    #[test]
    fn unknown_query_is_not_found() {
        let store = MemoryStore::new();
        let handler = store.open().unwrap();
        let context = EntityContext::single(meta());
        assert!(matches!(handler.query(&context, "loud", &ColumnData::new()), Err(PersistenceError::NotFound(_))));
        store.register_query("named", |row, params| row.get("name") == params.get("name")).unwrap();
        handler.save(&meta(), context.find_table("dog").unwrap(), ColumnData::new().with("id", 4).with("name", "rex")).unwrap();
        assert_eq!(handler.query(&context, "named", &ColumnData::new().with("name", "rex")).unwrap().len(), 1);
    }
}
