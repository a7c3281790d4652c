use crate::access::{CompositeIdAccessor, IdAccessor, SimpleIdAccessor};
use crate::entity::{entity_type_id, Entity};
use crate::error::PersistenceError;
use crate::meta::{ColumnKind, ColumnMeta, TableMeta};
use crate::persist::IdGenerator;
use crate::value::{IntoValue, Value};
use std::any::{type_name, TypeId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// One mapped type: its columns, tables, identity and key generation.
pub struct EntityMeta {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    columns: Vec<Arc<ColumnMeta>>,
    tables: Vec<TableMeta>,
    generators: BTreeMap<String, Arc<dyn IdGenerator>>,
    id_accessor: Arc<dyn IdAccessor>,
    discriminator: Option<(String, Value)>,
    instantiate: fn() -> Box<dyn Entity>,
}

impl EntityMeta {
    pub fn builder<E: Entity + Default>(name: impl Into<String>) -> EntityMetaBuilder<E> {
        EntityMetaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_instance(&self, entity: &dyn Entity) -> bool {
        entity_type_id(entity) == self.type_id
    }

    pub fn columns(&self) -> impl Iterator<Item = &Arc<ColumnMeta>> {
        self.columns.iter()
    }

    pub fn column(&self, name: &str) -> Option<&Arc<ColumnMeta>> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &Arc<ColumnMeta>> {
        self.columns.iter().filter(|c| c.is_primary_key())
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    pub fn find_table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// Table a column is stored in, `None` for mapped columns.
    pub fn table_of(&self, column: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.contains(column))
    }

    pub fn primary_tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter().filter(|t| !t.is_join())
    }

    pub fn join_tables(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter().filter(|t| t.is_join())
    }

    pub fn generators(&self) -> impl Iterator<Item = (&String, &Arc<dyn IdGenerator>)> {
        self.generators.iter()
    }

    pub fn id_accessor(&self) -> &Arc<dyn IdAccessor> {
        &self.id_accessor
    }

    pub fn discriminator(&self) -> Option<(&str, &Value)> {
        self.discriminator.as_ref().map(|(c, v)| (c.as_str(), v))
    }

    /// Bare instance every column is then assigned onto.
    pub fn instantiate(&self) -> Box<dyn Entity> {
        (self.instantiate)()
    }
}

impl PartialEq for EntityMeta {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityMeta {}

impl PartialOrd for EntityMeta {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityMeta {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Debug for EntityMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMeta")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("columns", &self.columns.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("tables", &self.tables.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("discriminator", &self.discriminator)
            .finish()
    }
}

fn new_instance<E: Entity + Default>() -> Box<dyn Entity> {
    Box::new(E::default())
}

struct TableLayout {
    name: String,
    join: bool,
    columns: Vec<String>,
}

/// Assembles and validates an [`EntityMeta`] for `E`.
pub struct EntityMetaBuilder<E> {
    name: String,
    columns: Vec<ColumnMeta>,
    tables: Vec<TableLayout>,
    generators: Vec<(String, Arc<dyn IdGenerator>)>,
    discriminator: Option<(String, Value)>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity + Default> EntityMetaBuilder<E> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            tables: Vec::new(),
            generators: Vec::new(),
            discriminator: None,
            _entity: PhantomData,
        }
    }

    pub fn column(mut self, column: ColumnMeta) -> Self {
        self.columns.push(column);
        self
    }

    pub fn table(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.tables.push(TableLayout { name: name.into(), join: false, columns: columns.iter().map(|c| c.to_string()).collect() });
        self
    }

    pub fn join_table(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        self.tables.push(TableLayout { name: name.into(), join: true, columns: columns.iter().map(|c| c.to_string()).collect() });
        self
    }

    pub fn generator(mut self, column: impl Into<String>, generator: Arc<dyn IdGenerator>) -> Self {
        self.generators.push((column.into(), generator));
        self
    }

    pub fn discriminator(mut self, column: impl Into<String>, value: impl IntoValue) -> Self {
        self.discriminator = Some((column.into(), value.into_value()));
        self
    }

    fn invalid(&self, message: impl fmt::Display) -> PersistenceError {
        PersistenceError::configuration(format!("entity {}: {message}", self.name))
    }

    /// Primary table named after the entity, one join table per collection column.
    fn derived_tables(&self) -> Vec<TableLayout> {
        let base = self.name.to_lowercase();
        let keys: Vec<String> = self.columns.iter().filter(|c| c.is_primary_key()).map(|c| c.name().to_string()).collect();
        let mut tables = vec![TableLayout {
            name: base.clone(),
            join: false,
            columns: self.columns.iter().filter(|c| c.is_row_column()).map(|c| c.name().to_string()).collect(),
        }];
        for column in self.columns.iter().filter(|c| c.kind().is_collection()) {
            let mut columns = keys.clone();
            columns.push(column.name().to_string());
            tables.push(TableLayout { name: format!("{base}_{}", column.name()), join: true, columns });
        }
        tables
    }

    pub fn build(mut self) -> Result<Arc<EntityMeta>, PersistenceError> {
        if let Some((column, value)) = &self.discriminator {
            if value.is_null() {
                return Err(self.invalid(format!("discriminator `{column}` has no value")));
            }
            match self.columns.iter().find(|c| c.name() == column) {
                Some(c) if *c.kind() != ColumnKind::Discriminator => {
                    return Err(self.invalid(format!("discriminator `{column}` clashes with a mapped column")));
                }
                Some(_) => {}
                None => {
                    let column = ColumnMeta::discriminator(column.clone());
                    self.columns.push(column);
                }
            }
        } else if self.columns.iter().any(|c| *c.kind() == ColumnKind::Discriminator) {
            return Err(self.invalid("discriminator column declared without a value"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name()) {
                return Err(self.invalid(format!("duplicate column `{}`", column.name())));
            }
        }

        let keys: Vec<&ColumnMeta> = self.columns.iter().filter(|c| c.is_primary_key()).collect();
        if keys.is_empty() {
            return Err(self.invalid("no primary key column"));
        }
        if let Some(column) = keys.iter().find(|c| *c.kind() != ColumnKind::Plain || c.is_lazy()) {
            return Err(self.invalid(format!("primary key `{}` must be an eager plain column", column.name())));
        }

        for (column, _) in &self.generators {
            if !keys.iter().any(|k| k.name() == column) {
                return Err(self.invalid(format!("generator targets `{column}` which is not a primary key")));
            }
        }

        let specs = if self.tables.is_empty() { self.derived_tables() } else { std::mem::take(&mut self.tables) };
        if !specs.iter().any(|t| !t.join) {
            return Err(self.invalid("no primary table"));
        }
        for spec in &specs {
            for column in &spec.columns {
                let Some(meta) = self.columns.iter().find(|c| c.name() == column) else {
                    return Err(self.invalid(format!("table {} lists unknown column `{column}`", spec.name)));
                };
                if matches!(meta.kind(), ColumnKind::Mapped { .. }) {
                    return Err(self.invalid(format!("mapped column `{column}` cannot be stored in table {}", spec.name)));
                }
                if meta.kind().is_collection() && !spec.join {
                    return Err(self.invalid(format!("collection `{column}` must live in a join table")));
                }
            }
            if let Some(missing) = keys.iter().find(|k| !spec.columns.iter().any(|c| c == k.name())) {
                return Err(self.invalid(format!("table {} lacks primary key `{}`", spec.name, missing.name())));
            }
        }
        for column in self.columns.iter().filter(|c| !matches!(c.kind(), ColumnKind::Mapped { .. })) {
            if !specs.iter().any(|t| t.columns.iter().any(|c| c == column.name())) {
                return Err(self.invalid(format!("column `{}` is not stored in any table", column.name())));
            }
        }

        let columns: Vec<Arc<ColumnMeta>> = self.columns.into_iter().map(Arc::new).collect();
        let lookup = |name: &str| columns.iter().find(|c| c.name() == name).cloned();
        let tables = specs
            .into_iter()
            .map(|spec| TableMeta::new(spec.name, spec.join, spec.columns.iter().filter_map(|c| lookup(c)).collect()))
            .collect();

        let mut keyed: Vec<(String, Arc<dyn crate::access::ColumnAccessor>)> = Vec::new();
        for column in columns.iter().filter(|c| c.is_primary_key()) {
            let accessor = column.accessor().cloned().ok_or_else(|| {
                PersistenceError::configuration(format!("entity {}: primary key `{}` has no accessor", self.name, column.name()))
            })?;
            keyed.push((column.name().to_string(), accessor));
        }
        let id_accessor: Arc<dyn IdAccessor> = if keyed.len() == 1 {
            let (column, accessor) = keyed.remove(0);
            Arc::new(SimpleIdAccessor::new(column, accessor))
        } else {
            Arc::new(CompositeIdAccessor::new(keyed))
        };

        Ok(Arc::new(EntityMeta {
            name: self.name,
            type_id: TypeId::of::<E>(),
            type_name: type_name::<E>(),
            columns,
            tables,
            generators: self.generators.into_iter().collect(),
            id_accessor,
            discriminator: self.discriminator,
            instantiate: new_instance::<E>,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{field, list};
    use crate::lazy::LazyList;
    use crate::persist::SequenceGenerator;
    use crate::value::ValueType;

    #[derive(Debug, Default)]
    struct Dog { id: i64, name: String, tags: Vec<String>, friends: LazyList<Dog> }
    crate::impl_entity!(Dog);

    fn dog() -> EntityMetaBuilder<Dog> {
        EntityMeta::builder::<Dog>("Dog")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
            .column(ColumnMeta::plain("name", ValueType::Text, field(|d: &Dog| &d.name, |d: &mut Dog| &mut d.name)))
    }

    #[test]
    fn derives_primary_and_join_tables() {
        let meta = dog()
            .column(ColumnMeta::collection("tags", ValueType::Text, field(|d: &Dog| &d.tags, |d: &mut Dog| &mut d.tags)))
            .column(ColumnMeta::join_collection("friends", "Dog", list(|d: &Dog| &d.friends, |d: &mut Dog| &mut d.friends)))
            .generator("id", Arc::new(SequenceGenerator::default()))
            .build()
            .unwrap();
        let names: Vec<_> = meta.tables().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["dog", "dog_tags", "dog_friends"]);
        assert_eq!(meta.join_tables().count(), 2);
        assert_eq!(meta.find_table("dog_tags").unwrap().primary_keys().count(), 1);
        assert_eq!(meta.id_accessor().columns(), &["id".to_string()]);
        assert!(meta.is_instance(meta.instantiate().as_ref()));
        assert_eq!(meta.generators().count(), 1);
    }

    #[test]
    fn rejects_malformed_metadata() {
        let no_key = EntityMeta::builder::<Dog>("Dog")
            .column(ColumnMeta::plain("name", ValueType::Text, field(|d: &Dog| &d.name, |d: &mut Dog| &mut d.name)))
            .build();
        assert!(matches!(no_key, Err(PersistenceError::Configuration(_))));

        let bad_generator = dog().generator("name", Arc::new(SequenceGenerator::default())).build();
        assert!(bad_generator.is_err());

        let collection_in_primary = dog()
            .column(ColumnMeta::collection("tags", ValueType::Text, field(|d: &Dog| &d.tags, |d: &mut Dog| &mut d.tags)))
            .table("dogs", &["id", "name", "tags"])
            .build();
        assert!(collection_in_primary.is_err());

        let unstored = dog().table("dogs", &["id"]).build();
        assert!(unstored.unwrap_err().to_string().contains("`name`"));
    }

    #[test]
    fn discriminator_becomes_a_column() {
        let meta = dog().discriminator("kind", "dog").table("animal", &["id", "name", "kind"]).build().unwrap();
        assert_eq!(meta.discriminator(), Some(("kind", &Value::Text("dog".into()))));
        assert_eq!(*meta.column("kind").unwrap().kind(), ColumnKind::Discriminator);
        assert!(dog().discriminator("kind", Value::Null).build().is_err());
    }

    #[test]
    fn ordered_by_name() {
        let a = EntityMeta::builder::<Dog>("A")
            .column(ColumnMeta::plain("id", ValueType::Int, field(|d: &Dog| &d.id, |d: &mut Dog| &mut d.id)).primary_key())
            .build()
            .unwrap();
        let b = dog().build().unwrap();
        assert!(a < b);
        assert_ne!(a, b);
    }
}
