use crate::access::DataHolder;
use crate::entity::Entity;
use crate::error::PersistenceError;
use crate::meta::{ColumnKind, ColumnMeta, EntityContext, EntityMeta, MetaRegistry};
use crate::persist::DataHolderFactory;
use crate::value::{ColumnData, Key};
use std::sync::Arc;

/// Materializes instances from column data, wiring lazy units for whatever the row did not carry.
pub struct EntityBuilder<'a> {
    registry: &'a MetaRegistry,
    factory: &'a dyn DataHolderFactory,
}

impl<'a> EntityBuilder<'a> {
    pub fn new(registry: &'a MetaRegistry, factory: &'a dyn DataHolderFactory) -> Self {
        Self { registry, factory }
    }

    /// `None` when the row matches no member of the context.
    pub fn build(
        &self,
        context: &EntityContext,
        data: &ColumnData,
    ) -> Result<Option<(Arc<EntityMeta>, Box<dyn Entity>)>, PersistenceError> {
        let Some(meta) = context.find_entity(data) else {
            crate::warn!(
                "row of {} matches no entity, discriminator `{}` is {:?}",
                context.name(),
                context.discriminator_column().unwrap_or_default(),
                context.discriminator_column().and_then(|c| data.get(c))
            );
            return Ok(None);
        };
        let mut instance = meta.instantiate();

        for column in meta.columns().filter(|c| c.accessor().is_some()) {
            if matches!(column.kind(), ColumnKind::Plain | ColumnKind::Collection { .. }) {
                if let Some(value) = data.get(column.name()) {
                    column.set_value(instance.as_mut(), self.factory.create_static(value.clone()))?;
                }
            }
        }

        let key = meta.id_accessor().from_data(data).ok_or_else(|| {
            PersistenceError::access(meta.name(), meta.id_accessor().columns().join(","), "row carries no identifier")
        })?;
        let keys = meta.id_accessor().from_key(&key);

        for column in meta.columns().filter(|c| c.accessor().is_some()) {
            let holder = match column.kind() {
                ColumnKind::Plain | ColumnKind::Collection { .. } => {
                    if data.contains(column.name()) {
                        continue;
                    }
                    let Some(table) = meta.table_of(column.name()) else { continue };
                    let table_keys = keys.clone().into_iter().filter(|(c, _)| table.contains(c)).collect();
                    self.factory.create_lazy(meta, table, column, &table_keys)
                }
                ColumnKind::Join { target } => match data.get(column.name()) {
                    None => continue,
                    Some(value) if value.is_null() => Some(self.factory.create_static(value.clone())),
                    Some(value) => {
                        let target = self.registry.context(target)?;
                        match target.id_accessor().from_value(value) {
                            Some(target_key) => self.factory.create_join_column(meta, column, target, target_key),
                            None => {
                                crate::warn!("{}.{} holds {value}, not a key of {}", meta.name(), column.name(), target.name());
                                None
                            }
                        }
                    }
                },
                ColumnKind::JoinCollection { target } => {
                    let target = self.registry.context(target)?;
                    let Some(table) = meta.table_of(column.name()) else { continue };
                    let table_keys = keys.clone().into_iter().filter(|(c, _)| table.contains(c)).collect();
                    self.factory.create_join_collection(meta, table, column, target, &table_keys)
                }
                ColumnKind::Mapped { target, mapped_by } => {
                    let target = self.registry.context(target)?;
                    self.factory.create_mapped_column(meta, column, target, mapped_by, &key)
                }
                ColumnKind::Discriminator => continue,
            };
            self.assign(meta, column, &key, instance.as_mut(), holder)?;
        }
        Ok(Some((meta.clone(), instance)))
    }

    fn assign(
        &self,
        meta: &EntityMeta,
        column: &ColumnMeta,
        key: &Key,
        instance: &mut dyn Entity,
        holder: Option<DataHolder>,
    ) -> Result<(), PersistenceError> {
        match holder {
            Some(holder) => column.set_value(instance, holder).map(|_| ()),
            None => {
                crate::warn!("no holder for {}#{}.{}, field left unset", meta.name(), key, column.name());
                Ok(())
            }
        }
    }

    /// Field-wise copy, unloaded lazy units are duplicated rather than forced.
    pub fn copy(meta: &EntityMeta, source: &dyn Entity) -> Result<Box<dyn Entity>, PersistenceError> {
        if !meta.is_instance(source) {
            return Err(PersistenceError::NoMatchingEntity(format!("{} is not a {}", source.type_name(), meta.name())));
        }
        let mut target = meta.instantiate();
        for column in meta.columns() {
            column.copy(source, target.as_mut())?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{field, lazy_field, reference};
    use crate::entity::downcast_box;
    use crate::lazy::{Lazy, LazyData, LazyRef};
    use crate::meta::TableMeta;
    use crate::value::{Value, ValueType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Owner { id: i64 }
    #[derive(Debug, Default)]
    struct Dog { id: i64, name: String, bio: LazyData<String>, owner: LazyRef<Owner> }
    crate::impl_entity!(Owner, Dog);

    #[derive(Default)]
    struct Factory {
        fetches: Arc<AtomicUsize>,
        refuse: bool,
    }

    impl DataHolderFactory for Factory {
        fn create_lazy(&self, _meta: &Arc<EntityMeta>, _table: &TableMeta, column: &ColumnMeta, _keys: &ColumnData) -> Option<DataHolder> {
            if self.refuse {
                return None;
            }
            let fetches = self.fetches.clone();
            let name = column.name().to_string();
            Some(DataHolder::Lazy(Lazy::from_fn(move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Text(format!("lazy {name}")))
            })))
        }
        fn create_join_column(&self, _meta: &Arc<EntityMeta>, _column: &ColumnMeta, _target: &Arc<EntityContext>, key: Key) -> Option<DataHolder> {
            let id = match &key {
                Key::Simple(Value::Int(i)) => *i,
                _ => 0,
            };
            Some(DataHolder::Reference { key, cell: Lazy::from_fn(move || Ok(Some(Arc::new(Owner { id }) as Arc<dyn Entity>))) })
        }
        fn create_join_collection(&self, _: &Arc<EntityMeta>, _: &TableMeta, _: &ColumnMeta, _: &Arc<EntityContext>, _: &ColumnData) -> Option<DataHolder> {
            None
        }
        fn create_mapped_column(&self, _: &Arc<EntityMeta>, _: &ColumnMeta, _: &Arc<EntityContext>, _: &str, _: &Key) -> Option<DataHolder> {
            None
        }
    }

    fn registry() -> MetaRegistry {
        let owner = EntityMeta::builder::<Owner>("Owner")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|o: &Owner| &o.id, |o: &mut Owner| &mut o.id)).primary_key())
            .build()
            .unwrap();
        let dog = EntityMeta::builder::<Dog>("Dog")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
            .column(ColumnMeta::plain("name", ValueType::Text, field(|d: &Dog| &d.name, |d: &mut Dog| &mut d.name)))
            .column(ColumnMeta::plain("bio", ValueType::Text, lazy_field(|d: &Dog| &d.bio, |d: &mut Dog| &mut d.bio)).lazy())
            .column(ColumnMeta::join("owner", "Owner", reference(|d: &Dog| &d.owner, |d: &mut Dog| &mut d.owner)))
            .build()
            .unwrap();
        MetaRegistry::builder().entity(owner).entity(dog).build().unwrap()
    }

    #[test]
    fn builds_with_lazy_placeholders() {
        let registry = registry();
        let factory = Factory::default();
        let context = registry.context("Dog").unwrap();
        let row = ColumnData::new().with("id", 1).with("name", "rex").with("owner", 9);
        let (meta, dog) = EntityBuilder::new(&registry, &factory).build(context, &row).unwrap().unwrap();
        assert_eq!(meta.name(), "Dog");
        let dog = downcast_box::<Dog>(dog).unwrap();
        assert_eq!(dog.name, "rex");
        assert!(!dog.bio.is_loaded());
        assert!(dog.owner.is_proxy() && !dog.owner.is_loaded());
        assert_eq!(factory.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(dog.bio.get().unwrap(), "lazy bio");
        assert_eq!(dog.owner.get().unwrap().unwrap().id, 9);
        assert_eq!(factory.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_identifier_is_a_hard_error() {
        let registry = registry();
        let factory = Factory::default();
        let row = ColumnData::new().with("name", "rex");
        let err = EntityBuilder::new(&registry, &factory).build(registry.context("Dog").unwrap(), &row).unwrap_err();
        assert!(matches!(err, PersistenceError::Access { .. }));
    }

    #[test]
    fn refused_holder_leaves_field_unset() {
        let registry = registry();
        let factory = Factory { refuse: true, ..Default::default() };
        let row = ColumnData::new().with("id", 1).with("owner", Value::Null);
        let (_, dog) = EntityBuilder::new(&registry, &factory).build(registry.context("Dog").unwrap(), &row).unwrap().unwrap();
        let dog = downcast_box::<Dog>(dog).unwrap();
        assert!(dog.bio.is_loaded());
        assert!(dog.owner.is_empty());
    }

    #[test]
    fn copy_duplicates_unloaded_units() {
        let registry = registry();
        let factory = Factory::default();
        let row = ColumnData::new().with("id", 1).with("name", "rex").with("owner", 9);
        let (meta, dog) = EntityBuilder::new(&registry, &factory).build(registry.context("Dog").unwrap(), &row).unwrap().unwrap();
        let copy = downcast_box::<Dog>(EntityBuilder::copy(&meta, dog.as_ref()).unwrap()).unwrap();
        assert_eq!(copy.name, "rex");
        assert_eq!(copy.bio.get().unwrap(), "lazy bio");
        assert_eq!(factory.fetches.load(Ordering::SeqCst), 1);
        assert!(EntityBuilder::copy(&meta, &Owner::default()).is_err());
    }
}
