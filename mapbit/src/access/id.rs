use crate::access::{ColumnAccessor, FieldValue};
use crate::entity::{entity_type_id, Entity};
use crate::error::PersistenceError;
use crate::value::{ColumnData, Key, Value};
use std::any::TypeId;
use std::sync::Arc;

/// Converts between an entity's identity and its key columns.
pub trait IdAccessor: Send + Sync {
    fn columns(&self) -> &[String];

    /// `None` while any key property is still unassigned.
    fn from_entity(&self, entity: &dyn Entity) -> Result<Option<Key>, PersistenceError>;

    fn from_key(&self, key: &Key) -> ColumnData;

    /// Picks the key columns out of a full row.
    fn from_data(&self, data: &ColumnData) -> Option<Key>;

    /// Accepts only data holding exactly the key columns.
    fn to_key(&self, data: &ColumnData) -> Option<Key>;

    /// Key from its storable form, see [`Key::to_value`].
    fn from_value(&self, value: &Value) -> Option<Key>;

    /// Canonical form of a caller supplied key, composite parts in column order.
    fn normalize(&self, key: &Key) -> Option<Key> {
        self.to_key(&self.from_key(key))
    }
}

fn scalar(value: FieldValue) -> Option<Value> {
    value.scalar().filter(|v| !v.is_unassigned())
}

pub struct SimpleIdAccessor {
    columns: Vec<String>,
    accessor: Arc<dyn ColumnAccessor>,
}

impl SimpleIdAccessor {
    pub fn new(column: impl Into<String>, accessor: Arc<dyn ColumnAccessor>) -> Self {
        Self { columns: vec![column.into()], accessor }
    }

    fn column(&self) -> &str {
        &self.columns[0]
    }
}

impl IdAccessor for SimpleIdAccessor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn from_entity(&self, entity: &dyn Entity) -> Result<Option<Key>, PersistenceError> {
        Ok(scalar(self.accessor.get_value(entity)?).map(Key::Simple))
    }

    fn from_key(&self, key: &Key) -> ColumnData {
        let mut data = ColumnData::new();
        match key {
            Key::Simple(v) => {
                data.insert(self.column(), v.clone());
            }
            Key::Composite(parts) => {
                if let Some((_, v)) = parts.iter().find(|(name, _)| name == self.column()) {
                    data.insert(self.column(), v.clone());
                }
            }
        }
        data
    }

    fn from_data(&self, data: &ColumnData) -> Option<Key> {
        data.get(self.column()).filter(|v| !v.is_empty()).cloned().map(Key::Simple)
    }

    fn to_key(&self, data: &ColumnData) -> Option<Key> {
        if data.len() != 1 {
            return None;
        }
        self.from_data(data)
    }

    fn from_value(&self, value: &Value) -> Option<Key> {
        Some(value.clone()).filter(|v| !v.is_empty()).map(Key::Simple)
    }
}

/// Aggregate key over several primary-key properties.
pub struct CompositeIdAccessor {
    columns: Vec<String>,
    accessors: Vec<Arc<dyn ColumnAccessor>>,
}

impl CompositeIdAccessor {
    pub fn new(parts: Vec<(String, Arc<dyn ColumnAccessor>)>) -> Self {
        let (columns, accessors) = parts.into_iter().unzip();
        Self { columns, accessors }
    }
}

impl IdAccessor for CompositeIdAccessor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn from_entity(&self, entity: &dyn Entity) -> Result<Option<Key>, PersistenceError> {
        let mut parts = Vec::with_capacity(self.columns.len());
        for (column, accessor) in self.columns.iter().zip(&self.accessors) {
            match scalar(accessor.get_value(entity)?) {
                Some(v) => parts.push((column.clone(), v)),
                None => return Ok(None),
            }
        }
        Ok(Some(Key::Composite(parts)))
    }

    fn from_key(&self, key: &Key) -> ColumnData {
        match key {
            Key::Composite(parts) => parts
                .iter()
                .filter(|(name, _)| self.columns.contains(name))
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect(),
            Key::Simple(Value::List(values)) if values.len() == self.columns.len() => {
                self.columns.iter().cloned().zip(values.iter().cloned()).collect()
            }
            Key::Simple(_) => ColumnData::new(),
        }
    }

    fn from_data(&self, data: &ColumnData) -> Option<Key> {
        let parts = self
            .columns
            .iter()
            .map(|c| data.get(c).filter(|v| !v.is_empty()).map(|v| (c.clone(), v.clone())))
            .collect::<Option<Vec<_>>>()?;
        Some(Key::Composite(parts))
    }

    fn to_key(&self, data: &ColumnData) -> Option<Key> {
        if data.len() != self.columns.len() {
            return None;
        }
        self.from_data(data)
    }

    fn from_value(&self, value: &Value) -> Option<Key> {
        let values = value.as_list()?;
        if values.len() != self.columns.len() || values.iter().any(Value::is_empty) {
            return None;
        }
        Some(Key::Composite(self.columns.iter().cloned().zip(values.iter().cloned()).collect()))
    }
}

/// No usable identity, every conversion comes back empty.
#[derive(Default)]
pub struct NullIdAccessor;

impl IdAccessor for NullIdAccessor {
    fn columns(&self) -> &[String] {
        &[]
    }

    fn from_entity(&self, _entity: &dyn Entity) -> Result<Option<Key>, PersistenceError> {
        Ok(None)
    }

    fn from_key(&self, _key: &Key) -> ColumnData {
        ColumnData::new()
    }

    fn from_data(&self, _data: &ColumnData) -> Option<Key> {
        None
    }

    fn to_key(&self, _data: &ColumnData) -> Option<Key> {
        None
    }

    fn from_value(&self, _value: &Value) -> Option<Key> {
        None
    }
}

/// Identity of a hierarchy whose members share their key columns.
///
/// Reading an instance dispatches to the accessor of its concrete member.
pub struct HierarchyIdAccessor {
    shared: Arc<dyn IdAccessor>,
    members: Vec<(TypeId, Arc<dyn IdAccessor>)>,
}

impl HierarchyIdAccessor {
    pub fn new(shared: Arc<dyn IdAccessor>, members: Vec<(TypeId, Arc<dyn IdAccessor>)>) -> Self {
        Self { shared, members }
    }
}

impl IdAccessor for HierarchyIdAccessor {
    fn columns(&self) -> &[String] {
        self.shared.columns()
    }

    fn from_entity(&self, entity: &dyn Entity) -> Result<Option<Key>, PersistenceError> {
        let type_id = entity_type_id(entity);
        match self.members.iter().find(|(t, _)| *t == type_id) {
            Some((_, accessor)) => accessor.from_entity(entity),
            None => Err(PersistenceError::access(entity.type_name(), "", "instance is not a member of the hierarchy")),
        }
    }

    fn from_key(&self, key: &Key) -> ColumnData {
        self.shared.from_key(key)
    }

    fn from_data(&self, data: &ColumnData) -> Option<Key> {
        self.shared.from_data(data)
    }

    fn to_key(&self, data: &ColumnData) -> Option<Key> {
        self.shared.to_key(data)
    }

    fn from_value(&self, value: &Value) -> Option<Key> {
        self.shared.from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::field;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct Badge { id: Uuid, name: String, level: i64 }
    crate::impl_entity!(Badge);

    fn badge_id() -> CompositeIdAccessor {
        CompositeIdAccessor::new(vec![
            ("id".to_string(), field(|b: &Badge| &b.id, |b: &mut Badge| &mut b.id)),
            ("name".to_string(), field(|b: &Badge| &b.name, |b: &mut Badge| &mut b.name)),
        ])
    }

    #[test]
    fn composite_key_round_trips_through_column_data() {
        let ids = badge_id();
        let key = Key::composite([("id", Value::Uuid(Uuid::new_v4())), ("name", Value::Text("foo".into()))]);
        let data = ids.from_key(&key);
        assert_eq!(data.len(), 2);
        assert_eq!(ids.to_key(&data), Some(key.clone()));
        assert_eq!(ids.from_value(&key.to_value()), Some(key));
    }

    #[test]
    fn composite_key_requires_every_part() {
        let ids = badge_id();
        let mut badge = Badge { id: Uuid::new_v4(), ..Default::default() };
        assert_eq!(ids.from_entity(&badge).unwrap(), None);
        badge.name = "gold".into();
        let key = ids.from_entity(&badge).unwrap().unwrap();
        assert_eq!(ids.from_data(&ids.from_key(&key).with("level", 3)), Some(key.clone()));
        assert_eq!(ids.to_key(&ids.from_key(&key).with("level", 3)), None);
    }

    #[test]
    fn normalize_orders_composite_parts() {
        let ids = badge_id();
        let id = Uuid::new_v4();
        let shuffled = Key::composite([("name", Value::Text("foo".into())), ("id", Value::Uuid(id))]);
        let canonical = Key::composite([("id", Value::Uuid(id)), ("name", Value::Text("foo".into()))]);
        assert_eq!(ids.normalize(&shuffled), Some(canonical));
    }

    #[test]
    fn simple_and_null_accessors() {
        let simple = SimpleIdAccessor::new("level", field(|b: &Badge| &b.level, |b: &mut Badge| &mut b.level));
        let badge = Badge { level: 4, ..Default::default() };
        assert_eq!(simple.from_entity(&badge).unwrap(), Some(Key::from(4i64)));
        assert_eq!(simple.from_value(&Value::Null), None);
        let none = NullIdAccessor;
        assert_eq!(none.from_entity(&badge).unwrap(), None);
        assert!(none.from_key(&Key::from(1)).is_empty());
        assert_eq!(none.normalize(&Key::from(1)), None);
    }
}
