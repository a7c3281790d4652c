use crate::error::PersistenceError;
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

/// A mapped domain object. Implement it with [`impl_entity!`](crate::impl_entity).
pub trait Entity: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn into_any_box(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    fn type_name(&self) -> &'static str;
}

/// Concrete type of an erased entity, never the type of the pointer holding it.
#[inline]
pub fn entity_type_id(entity: &dyn Entity) -> TypeId {
    entity.as_any().type_id()
}

pub fn downcast_arc<T: Entity>(entity: Arc<dyn Entity>) -> Result<Arc<T>, PersistenceError> {
    let found = entity.type_name();
    entity.into_any_arc().downcast::<T>().map_err(|_| {
        PersistenceError::NoMatchingEntity(format!("expected {}, found {}", std::any::type_name::<T>(), found))
    })
}

pub fn downcast_box<T: Entity>(entity: Box<dyn Entity>) -> Result<Box<T>, PersistenceError> {
    let found = entity.type_name();
    entity.into_any_box().downcast::<T>().map_err(|_| {
        PersistenceError::NoMatchingEntity(format!("expected {}, found {}", std::any::type_name::<T>(), found))
    })
}

pub fn downcast_ref<'a, T: Entity>(entity: &'a dyn Entity, property: &str) -> Result<&'a T, PersistenceError> {
    entity.as_any().downcast_ref::<T>().ok_or_else(|| {
        PersistenceError::access(std::any::type_name::<T>(), property, format!("instance is a {}", entity.type_name()))
    })
}

pub fn downcast_mut<'a, T: Entity>(entity: &'a mut dyn Entity, property: &str) -> Result<&'a mut T, PersistenceError> {
    let found = entity.type_name();
    entity.as_any_mut().downcast_mut::<T>().ok_or_else(|| {
        PersistenceError::access(std::any::type_name::<T>(), property, format!("instance is a {}", found))
    })
}

#[macro_export]
macro_rules! impl_entity {
    ($($t:ty),* $(,)?) => {
        $(
            impl $crate::Entity for $t {
                #[inline]
                fn as_any(&self) -> &dyn std::any::Any { self }
                #[inline]
                fn as_any_mut(&mut self) -> &mut dyn std::any::Any { self }
                #[inline]
                fn into_any_arc(self: std::sync::Arc<Self>) -> std::sync::Arc<dyn std::any::Any + Send + Sync> { self }
                #[inline]
                fn into_any_box(self: Box<Self>) -> Box<dyn std::any::Any + Send + Sync> { self }
                #[inline]
                fn type_name(&self) -> &'static str { std::any::type_name::<$t>() }
            }
        )*
    };
}
