use crate::access::{DataHolder, EntityRef, FieldValue};
use crate::entity::Entity;
use crate::error::{PersistenceError, ResultExt};
use crate::meta::{ColumnKind, ColumnMeta, EntityMeta, MetaRegistry, TableMeta};
use crate::persist::DataHandler;
use crate::value::{ColumnData, Key, Value};
use log::debug;

/// Save and delete fan-out of one instance over its tables.
pub struct EntityPersistence<'r> {
    registry: &'r MetaRegistry,
}

impl<'r> EntityPersistence<'r> {
    pub fn new(registry: &'r MetaRegistry) -> Self {
        Self { registry }
    }

    /// Generates missing keys, then writes every table. Returns whether the backend reported a change.
    pub fn save(&self, meta: &EntityMeta, instance: &mut dyn Entity, handler: &dyn DataHandler) -> Result<bool, PersistenceError> {
        self.generate_ids(meta, instance)?;
        let mut changed = false;
        for table in meta.tables() {
            if table.is_join() && table.collection_columns().next().is_some() {
                let keys = self.key_data(meta, table, instance)?;
                for column in table.collection_columns() {
                    if !column.is_loaded(instance)? {
                        debug!("{}.{} never loaded, left untouched", meta.name(), column.name());
                        continue;
                    }
                    let items = self.collection_items(column, instance)?;
                    changed |= handler
                        .save_collection(meta, table, keys.clone(), column, items)
                        .with_context(|| format!("saving {}.{} into {}", meta.name(), column.name(), table.name()))?;
                }
            } else {
                let data = self.column_data(meta, table, instance)?;
                changed |= handler
                    .save(meta, table, data)
                    .with_context(|| format!("saving {} into {}", meta.name(), table.name()))?;
            }
        }
        Ok(changed)
    }

    /// Removes join tables first, then primary tables.
    pub fn delete(&self, meta: &EntityMeta, instance: &dyn Entity, handler: &dyn DataHandler) -> Result<bool, PersistenceError> {
        let mut changed = false;
        for table in meta.join_tables().chain(meta.primary_tables()) {
            let keys = self.key_data(meta, table, instance)?;
            changed |= handler
                .delete(meta, table, keys)
                .with_context(|| format!("deleting {} from {}", meta.name(), table.name()))?;
        }
        Ok(changed)
    }

    fn generate_ids(&self, meta: &EntityMeta, instance: &mut dyn Entity) -> Result<(), PersistenceError> {
        for (name, generator) in meta.generators() {
            let Some(column) = meta.column(name) else { continue };
            if column.get_value(instance)?.scalar().is_none_or(|v| v.is_unassigned()) {
                let key = generator.generate(meta).with_context(|| format!("generating {}.{}", meta.name(), name))?;
                debug!("generated {key} for {}.{}", meta.name(), name);
                column.set_value(instance, DataHolder::Static(key.to_value()))?;
            }
        }
        Ok(())
    }

    /// Row of `table`: keys always, other columns only once loaded. Mapped columns are owned elsewhere.
    pub fn column_data(&self, meta: &EntityMeta, table: &TableMeta, instance: &dyn Entity) -> Result<ColumnData, PersistenceError> {
        let mut data = ColumnData::new();
        for column in table.columns() {
            match column.kind() {
                ColumnKind::Mapped { .. } => continue,
                ColumnKind::Discriminator => {
                    if let Some((_, value)) = meta.discriminator() {
                        data.insert(column.name(), value.clone());
                    }
                    continue;
                }
                _ => {}
            }
            if !column.is_primary_key() && !column.is_loaded(instance)? {
                continue;
            }
            let value = self.resolve(column, column.get_value(instance)?)?;
            data.insert(column.name(), value);
        }
        Ok(data)
    }

    fn key_data(&self, meta: &EntityMeta, table: &TableMeta, instance: &dyn Entity) -> Result<ColumnData, PersistenceError> {
        let key = self.key_of(meta, instance)?;
        Ok(meta.id_accessor().from_key(&key).into_iter().filter(|(c, _)| table.contains(c)).collect())
    }

    fn key_of(&self, meta: &EntityMeta, instance: &dyn Entity) -> Result<Key, PersistenceError> {
        meta.id_accessor().from_entity(instance)?.ok_or_else(|| {
            PersistenceError::access(meta.name(), meta.id_accessor().columns().join(","), "identifier is empty")
        })
    }

    fn collection_items(&self, column: &ColumnMeta, instance: &dyn Entity) -> Result<Vec<Value>, PersistenceError> {
        match self.resolve(column, column.get_value(instance)?)? {
            Value::List(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(PersistenceError::access(
                "",
                column.property_name(),
                format!("collection column holds a {}", other.type_name()),
            )),
        }
    }

    fn resolve(&self, column: &ColumnMeta, value: FieldValue) -> Result<Value, PersistenceError> {
        match value {
            FieldValue::Scalar(v) => Ok(v),
            FieldValue::Ref(None) => Ok(Value::Null),
            FieldValue::Ref(Some(reference)) => self.join_value(column, reference),
            FieldValue::Refs(references) => references
                .into_iter()
                .map(|r| self.join_value(column, r))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
        }
    }

    /// Stored form of an association: the target's key.
    fn join_value(&self, column: &ColumnMeta, reference: EntityRef) -> Result<Value, PersistenceError> {
        match reference {
            EntityRef::Key(key) => Ok(key.to_value()),
            EntityRef::Instance(target) => {
                let target_meta = self.registry.meta_of(target.as_ref())?;
                let key = target_meta.id_accessor().from_entity(target.as_ref())?.ok_or_else(|| {
                    PersistenceError::access(
                        "",
                        column.property_name(),
                        format!("referenced {} has no identifier, save it first", target_meta.name()),
                    )
                })?;
                Ok(key.to_value())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{field, lazy_field, list, reference};
    use crate::lazy::{Lazy, LazyData, LazyList, LazyRef};
    use crate::meta::{ColumnMeta, EntityContext};
    use crate::persist::SequenceGenerator;
    use crate::value::ValueType;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Owner { id: i64, name: String }
    #[derive(Debug, Default)]
    struct Dog { id: i64, bio: LazyData<String>, tags: Vec<String>, owner: LazyRef<Owner>, pals: LazyList<Dog> }
    crate::impl_entity!(Owner, Dog);

    #[derive(Default)]
    struct Recorder {
        rows: Mutex<Vec<(String, ColumnData)>>,
        collections: Mutex<Vec<(String, ColumnData, Vec<Value>)>>,
        deletes: Mutex<Vec<String>>,
    }

    impl DataHandler for Recorder {
        fn save(&self, _meta: &EntityMeta, table: &TableMeta, data: ColumnData) -> Result<bool, PersistenceError> {
            self.rows.lock()?.push((table.name().to_string(), data));
            Ok(true)
        }
        fn save_collection(&self, _meta: &EntityMeta, table: &TableMeta, keys: ColumnData, _column: &ColumnMeta, items: Vec<Value>) -> Result<bool, PersistenceError> {
            self.collections.lock()?.push((table.name().to_string(), keys, items));
            Ok(true)
        }
        fn delete(&self, _meta: &EntityMeta, table: &TableMeta, _keys: ColumnData) -> Result<bool, PersistenceError> {
            self.deletes.lock()?.push(table.name().to_string());
            Ok(true)
        }
        fn load(&self, _context: &EntityContext, _keys: &ColumnData) -> Result<Option<ColumnData>, PersistenceError> {
            Ok(None)
        }
        fn load_column(&self, _meta: &EntityMeta, _table: &TableMeta, _column: &ColumnMeta, _keys: &ColumnData) -> Result<Value, PersistenceError> {
            Ok(Value::Null)
        }
        fn load_collection(&self, _meta: &EntityMeta, _table: &TableMeta, _column: &ColumnMeta, _keys: &ColumnData) -> Result<Vec<Value>, PersistenceError> {
            Ok(Vec::new())
        }
        fn find_by(&self, _context: &EntityContext, _column: &str, _value: &Value) -> Result<Vec<ColumnData>, PersistenceError> {
            Ok(Vec::new())
        }
        fn query(&self, _context: &EntityContext, _name: &str, _params: &ColumnData) -> Result<Vec<ColumnData>, PersistenceError> {
            Ok(Vec::new())
        }
        fn pending_work(&self) -> bool {
            false
        }
        fn begin_work(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn commit_work(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
        fn rollback_work(&self) -> Result<(), PersistenceError> {
            Ok(())
        }
    }

    fn registry() -> MetaRegistry {
        let owner = EntityMeta::builder::<Owner>("Owner")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|o: &Owner| &o.id, |o: &mut Owner| &mut o.id)).primary_key())
            .column(ColumnMeta::plain("name", ValueType::Text, field(|o: &Owner| &o.name, |o: &mut Owner| &mut o.name)))
            .build()
            .unwrap();
        let dog = EntityMeta::builder::<Dog>("Dog")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
            .column(ColumnMeta::plain("bio", ValueType::Text, lazy_field(|d: &Dog| &d.bio, |d: &mut Dog| &mut d.bio)).lazy())
            .column(ColumnMeta::collection("tags", ValueType::Text, field(|d: &Dog| &d.tags, |d: &mut Dog| &mut d.tags)))
            .column(ColumnMeta::join("owner", "Owner", reference(|d: &Dog| &d.owner, |d: &mut Dog| &mut d.owner)))
            .column(ColumnMeta::join_collection("pals", "Dog", list(|d: &Dog| &d.pals, |d: &mut Dog| &mut d.pals)))
            .generator("id", Arc::new(SequenceGenerator::starting_at(100)))
            .build()
            .unwrap();
        MetaRegistry::builder().entity(owner).entity(dog).build().unwrap()
    }

    #[test]
    fn save_generates_ids_and_fans_out_over_tables() {
        let registry = registry();
        let meta = registry.entity("Dog").unwrap().clone();
        let handler = Recorder::default();
        let ann = Arc::new(Owner { id: 7, name: "ann".into() });
        let mut rex = Dog {
            tags: vec!["good".into()],
            owner: LazyRef::instance(ann),
            pals: LazyList::new(vec![Arc::new(Dog { id: 3, ..Default::default() })]),
            bio: LazyData::deferred(Lazy::from_fn(|| Ok(Value::Text("never read".into())))),
            ..Default::default()
        };
        EntityPersistence::new(&registry).save(&meta, &mut rex, &handler).unwrap();
        assert_eq!(rex.id, 100);

        let rows = handler.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        let (table, row) = &rows[0];
        assert_eq!(table, "dog");
        assert_eq!(row.get("id"), Some(&Value::Int(100)));
        assert_eq!(row.get("owner"), Some(&Value::Int(7)));
        assert!(!row.contains("bio"), "unloaded lazy column must not be written");

        let collections = handler.collections.lock().unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].0, "dog_tags");
        assert_eq!(collections[0].1, ColumnData::new().with("id", 100i64));
        assert_eq!(collections[1].2, vec![Value::Int(3)]);
    }

    #[test]
    fn unsaved_reference_is_rejected() {
        let registry = registry();
        let meta = registry.entity("Dog").unwrap().clone();
        let mut rex = Dog { owner: LazyRef::instance(Arc::new(Owner::default())), ..Default::default() };
        let err = EntityPersistence::new(&registry).save(&meta, &mut rex, &Recorder::default()).unwrap_err();
        assert!(err.to_string().contains("save it first"));
    }

    #[test]
    fn null_values_are_kept_and_deletes_start_with_join_tables() {
        let registry = registry();
        let meta = registry.entity("Dog").unwrap().clone();
        let handler = Recorder::default();
        let rex = Dog { id: 5, ..Default::default() };
        let data = EntityPersistence::new(&registry).column_data(&meta, meta.find_table("dog").unwrap(), &rex).unwrap();
        assert_eq!(data.get("owner"), Some(&Value::Null));
        EntityPersistence::new(&registry).delete(&meta, &rex, &handler).unwrap();
        assert_eq!(*handler.deletes.lock().unwrap(), vec!["dog_tags", "dog_pals", "dog"]);
    }
}
