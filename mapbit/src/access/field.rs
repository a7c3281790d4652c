use crate::access::{ColumnAccessor, DataHolder, EntityRef, FieldValue};
use crate::entity::{downcast_mut, downcast_ref, Entity};
use crate::error::PersistenceError;
use crate::lazy::{LazyData, LazyList, LazyRef};
use crate::value::{ColumnValue, Key, Value};
use std::any::type_name;
use std::sync::Arc;

fn unsupported<E>(holder: &DataHolder, field: &str) -> PersistenceError {
    PersistenceError::access(type_name::<E>(), "", format!("{} holder cannot populate a {field} field", holder.kind()))
}

/// Attributes an access error raised inside a field wrapper to the entity owning the field.
fn owned_by<E>(err: PersistenceError) -> PersistenceError {
    match err {
        PersistenceError::Access { property, message, .. } if property.is_empty() => {
            PersistenceError::access(type_name::<E>(), "", message)
        }
        other => other,
    }
}

fn convert<E, V: ColumnValue>(value: Value) -> Result<V, PersistenceError> {
    V::from_value(value).map_err(|message| PersistenceError::access(type_name::<E>(), "", message))
}

/// Plain field holding a column value (scalar or collection of scalars).
pub struct FieldAccessor<E, V> {
    get: fn(&E) -> &V,
    get_mut: fn(&mut E) -> &mut V,
}

impl<E: Entity, V: ColumnValue + Clone + 'static> ColumnAccessor for FieldAccessor<E, V> {
    fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError> {
        let e = downcast_ref::<E>(entity, "")?;
        Ok(FieldValue::Scalar((self.get)(e).to_value()))
    }

    fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError> {
        let value = match holder {
            DataHolder::Static(v) => v,
            // eager field fed by a lazy unit: resolve right away
            DataHolder::Lazy(lazy) => lazy.get()?.clone(),
            other => return Err(unsupported::<E>(&other, "plain")),
        };
        let converted = convert::<E, V>(value)?;
        *(self.get_mut)(downcast_mut::<E>(entity, "")?) = converted;
        Ok(true)
    }

    fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        Ok((self.get)(downcast_ref::<E>(entity, "")?).to_value().is_empty())
    }

    fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        downcast_ref::<E>(entity, "").map(|_| true)
    }

    fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError> {
        let value = (self.get)(downcast_ref::<E>(from, "")?).clone();
        *(self.get_mut)(downcast_mut::<E>(to, "")?) = value;
        Ok(())
    }
}

/// Field wrapped in [`LazyData`], only resolved when read.
pub struct LazyFieldAccessor<E, V> {
    get: fn(&E) -> &LazyData<V>,
    get_mut: fn(&mut E) -> &mut LazyData<V>,
}

impl<E: Entity, V: ColumnValue + Clone + 'static> ColumnAccessor for LazyFieldAccessor<E, V> {
    fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError> {
        let data = (self.get)(downcast_ref::<E>(entity, "")?);
        Ok(FieldValue::Scalar(data.get().map_err(owned_by::<E>)?.to_value()))
    }

    fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError> {
        let data = match holder {
            DataHolder::Static(v) => LazyData::new(convert::<E, V>(v)?),
            DataHolder::Lazy(lazy) => LazyData::deferred(lazy),
            other => return Err(unsupported::<E>(&other, "lazy value")),
        };
        *(self.get_mut)(downcast_mut::<E>(entity, "")?) = data;
        Ok(true)
    }

    fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        (self.get)(downcast_ref::<E>(entity, "")?).is_empty().map_err(owned_by::<E>)
    }

    fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        Ok((self.get)(downcast_ref::<E>(entity, "")?).is_loaded())
    }

    fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError> {
        let data = (self.get)(downcast_ref::<E>(from, "")?).duplicate();
        *(self.get_mut)(downcast_mut::<E>(to, "")?) = data;
        Ok(())
    }
}

/// Single association held in a [`LazyRef`].
pub struct RefAccessor<E, T> {
    get: fn(&E) -> &LazyRef<T>,
    get_mut: fn(&mut E) -> &mut LazyRef<T>,
}

impl<E: Entity, T: Entity> ColumnAccessor for RefAccessor<E, T> {
    fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError> {
        Ok(FieldValue::Ref((self.get)(downcast_ref::<E>(entity, "")?).entity_ref()))
    }

    fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError> {
        let reference = match holder {
            DataHolder::Static(Value::Null) => LazyRef::Empty,
            DataHolder::Static(v) => LazyRef::Key(Key::Simple(v)),
            DataHolder::Reference { key, cell } => LazyRef::deferred(key, cell),
            other => return Err(unsupported::<E>(&other, "reference")),
        };
        *(self.get_mut)(downcast_mut::<E>(entity, "")?) = reference;
        Ok(true)
    }

    fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        Ok((self.get)(downcast_ref::<E>(entity, "")?).is_empty())
    }

    fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        Ok((self.get)(downcast_ref::<E>(entity, "")?).is_loaded())
    }

    fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError> {
        let reference = (self.get)(downcast_ref::<E>(from, "")?).duplicate();
        *(self.get_mut)(downcast_mut::<E>(to, "")?) = reference;
        Ok(())
    }
}

/// Collection of associated entities held in a [`LazyList`].
pub struct ListAccessor<E, T> {
    get: fn(&E) -> &LazyList<T>,
    get_mut: fn(&mut E) -> &mut LazyList<T>,
}

impl<E: Entity, T: Entity> ColumnAccessor for ListAccessor<E, T> {
    fn get_value(&self, entity: &dyn Entity) -> Result<FieldValue, PersistenceError> {
        let items = (self.get)(downcast_ref::<E>(entity, "")?).get_erased()?;
        Ok(FieldValue::Refs(items.into_iter().map(EntityRef::Instance).collect()))
    }

    fn set_value(&self, entity: &mut dyn Entity, holder: DataHolder) -> Result<bool, PersistenceError> {
        let items = match holder {
            DataHolder::Collection(cell) => LazyList::deferred(cell),
            DataHolder::Static(v) if v.is_empty() => LazyList::default(),
            other => return Err(unsupported::<E>(&other, "collection")),
        };
        *(self.get_mut)(downcast_mut::<E>(entity, "")?) = items;
        Ok(true)
    }

    fn is_empty(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        (self.get)(downcast_ref::<E>(entity, "")?).is_empty()
    }

    fn is_loaded(&self, entity: &dyn Entity) -> Result<bool, PersistenceError> {
        Ok((self.get)(downcast_ref::<E>(entity, "")?).is_loaded())
    }

    fn copy(&self, from: &dyn Entity, to: &mut dyn Entity) -> Result<(), PersistenceError> {
        let items = (self.get)(downcast_ref::<E>(from, "")?).duplicate();
        *(self.get_mut)(downcast_mut::<E>(to, "")?) = items;
        Ok(())
    }
}

pub fn field<E: Entity, V: ColumnValue + Clone + 'static>(
    get: fn(&E) -> &V,
    get_mut: fn(&mut E) -> &mut V,
) -> Arc<dyn ColumnAccessor> {
    Arc::new(FieldAccessor { get, get_mut })
}

pub fn lazy_field<E: Entity, V: ColumnValue + Clone + 'static>(
    get: fn(&E) -> &LazyData<V>,
    get_mut: fn(&mut E) -> &mut LazyData<V>,
) -> Arc<dyn ColumnAccessor> {
    Arc::new(LazyFieldAccessor { get, get_mut })
}

pub fn reference<E: Entity, T: Entity>(
    get: fn(&E) -> &LazyRef<T>,
    get_mut: fn(&mut E) -> &mut LazyRef<T>,
) -> Arc<dyn ColumnAccessor> {
    Arc::new(RefAccessor { get, get_mut })
}

pub fn list<E: Entity, T: Entity>(
    get: fn(&E) -> &LazyList<T>,
    get_mut: fn(&mut E) -> &mut LazyList<T>,
) -> Arc<dyn ColumnAccessor> {
    Arc::new(ListAccessor { get, get_mut })
}
