use crate::access::{ColumnAccessor, DataHolder, FieldValue};
use crate::entity::Entity;
use crate::error::PersistenceError;
use crate::value::ValueType;
use std::fmt;
use std::sync::Arc;

/// Storage shape of a column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Plain,
    /// Scalars kept in a secondary table.
    Collection { element: ValueType },
    /// Key of another entity.
    Join { target: String },
    /// Keys of other entities kept in a secondary table.
    JoinCollection { target: String },
    /// Owned by `target`, whose `mapped_by` column points back here.
    Mapped { target: String, mapped_by: String },
    /// Constant per concrete member of a hierarchy.
    Discriminator,
}

impl ColumnKind {
    pub fn is_association(&self) -> bool {
        matches!(self, ColumnKind::Join { .. } | ColumnKind::JoinCollection { .. } | ColumnKind::Mapped { .. })
    }

    /// Stored as a set of items in a secondary table.
    pub fn is_collection(&self) -> bool {
        matches!(self, ColumnKind::Collection { .. } | ColumnKind::JoinCollection { .. })
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            ColumnKind::Join { target } | ColumnKind::JoinCollection { target } | ColumnKind::Mapped { target, .. } => Some(target),
            _ => None,
        }
    }
}

pub struct ColumnMeta {
    name: String,
    property: String,
    value_type: ValueType,
    primary_key: bool,
    lazy: bool,
    kind: ColumnKind,
    accessor: Option<Arc<dyn ColumnAccessor>>,
}

impl ColumnMeta {
    fn new(name: impl Into<String>, value_type: ValueType, kind: ColumnKind, accessor: Option<Arc<dyn ColumnAccessor>>) -> Self {
        let name = name.into();
        let lazy = kind.is_association();
        Self { property: name.clone(), name, value_type, primary_key: false, lazy, kind, accessor }
    }

    pub fn plain(name: impl Into<String>, value_type: ValueType, accessor: Arc<dyn ColumnAccessor>) -> Self {
        Self::new(name, value_type, ColumnKind::Plain, Some(accessor))
    }

    pub fn collection(name: impl Into<String>, element: ValueType, accessor: Arc<dyn ColumnAccessor>) -> Self {
        let value_type = ValueType::list_of(element.clone());
        Self::new(name, value_type, ColumnKind::Collection { element }, Some(accessor))
    }

    pub fn join(name: impl Into<String>, target: impl Into<String>, accessor: Arc<dyn ColumnAccessor>) -> Self {
        Self::new(name, ValueType::Any, ColumnKind::Join { target: target.into() }, Some(accessor))
    }

    pub fn join_collection(name: impl Into<String>, target: impl Into<String>, accessor: Arc<dyn ColumnAccessor>) -> Self {
        Self::new(name, ValueType::list_of(ValueType::Any), ColumnKind::JoinCollection { target: target.into() }, Some(accessor))
    }

    pub fn mapped(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
        accessor: Arc<dyn ColumnAccessor>,
    ) -> Self {
        let kind = ColumnKind::Mapped { target: target.into(), mapped_by: mapped_by.into() };
        Self::new(name, ValueType::list_of(ValueType::Any), kind, Some(accessor))
    }

    pub fn discriminator(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Text, ColumnKind::Discriminator, None)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Logical property name when it differs from the column name.
    pub fn property(mut self, property: impl Into<String>) -> Self {
        self.property = property.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property_name(&self) -> &str {
        &self.property
    }

    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    /// Value lives in the row of a primary table.
    pub fn is_row_column(&self) -> bool {
        matches!(self.kind, ColumnKind::Plain | ColumnKind::Join { .. } | ColumnKind::Discriminator)
    }

    /// Read together with the row instead of through a lazy unit.
    pub fn is_eager(&self) -> bool {
        self.is_row_column() && (!self.lazy || matches!(self.kind, ColumnKind::Join { .. }))
    }

    pub fn accessor(&self) -> Option<&Arc<dyn ColumnAccessor>> {
        self.accessor.as_ref()
    }

    fn required(&self) -> Result<&Arc<dyn ColumnAccessor>, PersistenceError> {
        self.accessor
            .as_ref()
            .ok_or_else(|| PersistenceError::access("", &self.property, "column is not bound to a field"))
    }

    /// Names this column in accessor errors.
    fn attribute(&self, err: PersistenceError) -> PersistenceError {
        match err {
            PersistenceError::Access { entity, property, message } if property.is_empty() => {
                PersistenceError::Access { entity, property: self.property.clone(), message }
            }
            other => other,
        }
    }

    pub fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError> {
        self.required()?.get_value(entity).map_err(|e| self.attribute(e))
    }

    pub fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError> {
        self.required()?.set_value(entity, holder).map_err(|e| self.attribute(e))
    }

    pub fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        self.required()?.is_empty(entity).map_err(|e| self.attribute(e))
    }

    pub fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        self.required()?.is_loaded(entity).map_err(|e| self.attribute(e))
    }

    pub fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError> {
        match &self.accessor {
            Some(accessor) => accessor.copy(from, to).map_err(|e| self.attribute(e)),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ColumnMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnMeta")
            .field("name", &self.name)
            .field("property", &self.property)
            .field("value_type", &self.value_type)
            .field("primary_key", &self.primary_key)
            .field("lazy", &self.lazy)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{field, lazy_field};
    use crate::lazy::{Lazy, LazyData};
    use crate::value::Value;

    #[derive(Debug, Default)]
    struct Dog { age: i64, weight: LazyData<i64> }
    #[derive(Debug, Default)]
    struct Cat;
    crate::impl_entity!(Dog, Cat);

    #[test]
    fn access_errors_name_the_property() {
        let column = ColumnMeta::plain("dog_age", ValueType::Int, field(|d: &Dog| &d.age, |d: &mut Dog| &mut d.age)).property("age");
        let mut cat = Cat;
        let err = column.set_value(&mut cat, DataHolder::Static(Value::Int(3))).unwrap_err();
        assert!(matches!(err, PersistenceError::Access { ref property, .. } if property == "age"));
        let mut dog = Dog::default();
        let err = column.set_value(&mut dog, DataHolder::Static(Value::Text("old".into()))).unwrap_err();
        assert!(err.to_string().contains("`age`"));
    }

    #[test]
    fn lazy_conversion_errors_name_entity_and_property() {
        let column = ColumnMeta::plain("weight", ValueType::Int, lazy_field(|d: &Dog| &d.weight, |d: &mut Dog| &mut d.weight)).lazy();
        let mut dog = Dog::default();
        column.set_value(&mut dog, DataHolder::Lazy(Lazy::loaded(Value::Text("heavy".into())))).unwrap();
        match column.get_value(&dog).unwrap_err() {
            PersistenceError::Access { entity, property, .. } => {
                assert!(entity.ends_with("Dog"));
                assert_eq!(property, "weight");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn associations_are_lazy() {
        let column = ColumnMeta::discriminator("kind");
        assert!(!column.is_lazy());
        assert!(column.is_eager());
        assert!(column.get_value(&Dog::default()).is_err());
        assert!(ColumnKind::Mapped { target: "Dog".into(), mapped_by: "owner".into() }.is_association());
        assert!(!ColumnKind::Collection { element: ValueType::Text }.is_association());
    }
}
