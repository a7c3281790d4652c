use crate::entity::{entity_type_id, Entity};
use crate::error::PersistenceError;
use crate::meta::{ColumnKind, EntityContext, EntityMeta};
use std::any::{type_name, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Every mapped type and hierarchy known to one engine, immutable once built.
#[derive(Debug)]
pub struct MetaRegistry {
    contexts: BTreeMap<String, Arc<EntityContext>>,
    by_type: HashMap<TypeId, Arc<EntityContext>>,
}

impl MetaRegistry {
    pub fn builder() -> MetaRegistryBuilder {
        MetaRegistryBuilder::default()
    }

    /// Entity or hierarchy by name.
    pub fn find(&self, name: &str) -> Option<&Arc<EntityContext>> {
        self.contexts.get(name)
    }

    pub fn context(&self, name: &str) -> Result<&Arc<EntityContext>, PersistenceError> {
        self.find(name).ok_or_else(|| PersistenceError::NotFound(format!("no entity or hierarchy named {name}")))
    }

    pub fn context_for(&self, type_id: TypeId) -> Option<&Arc<EntityContext>> {
        self.by_type.get(&type_id)
    }

    pub fn context_of<T: Entity>(&self) -> Result<&Arc<EntityContext>, PersistenceError> {
        self.context_for(TypeId::of::<T>())
            .ok_or_else(|| PersistenceError::NotFound(format!("{} is not a mapped entity", type_name::<T>())))
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityMeta>> {
        self.find(name).filter(|c| !c.is_hierarchy()).map(|c| &c.entities()[0])
    }

    /// Metadata of an instance's concrete type.
    pub fn meta_of(&self, entity: &dyn Entity) -> Result<&Arc<EntityMeta>, PersistenceError> {
        self.context_for(entity_type_id(entity))
            .map(|c| &c.entities()[0])
            .ok_or_else(|| PersistenceError::NotFound(format!("{} is not a mapped entity", entity.type_name())))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityMeta>> {
        self.contexts.values().filter(|c| !c.is_hierarchy()).map(|c| &c.entities()[0])
    }

    pub fn hierarchies(&self) -> impl Iterator<Item = &Arc<EntityContext>> {
        self.contexts.values().filter(|c| c.is_hierarchy())
    }
}

#[derive(Default)]
pub struct MetaRegistryBuilder {
    entities: Vec<Arc<EntityMeta>>,
    hierarchies: Vec<(String, Vec<String>)>,
}

impl MetaRegistryBuilder {
    pub fn entity(mut self, meta: Arc<EntityMeta>) -> Self {
        self.entities.push(meta);
        self
    }

    pub fn hierarchy(mut self, name: impl Into<String>, members: &[&str]) -> Self {
        self.hierarchies.push((name.into(), members.iter().map(|m| m.to_string()).collect()));
        self
    }

    pub fn build(self) -> Result<MetaRegistry, PersistenceError> {
        if self.entities.is_empty() {
            return Err(PersistenceError::configuration("registry has no entities"));
        }
        let mut contexts = BTreeMap::new();
        let mut by_type = HashMap::new();
        for meta in &self.entities {
            let context = Arc::new(EntityContext::single(meta.clone()));
            if contexts.insert(meta.name().to_string(), context.clone()).is_some() {
                return Err(PersistenceError::configuration(format!("entity {} registered twice", meta.name())));
            }
            if by_type.insert(meta.type_id(), context).is_some() {
                return Err(PersistenceError::configuration(format!("{} mapped by more than one entity", meta.type_name())));
            }
        }
        for (name, members) in self.hierarchies {
            let metas = members
                .iter()
                .map(|m| {
                    contexts.get(m).map(|c: &Arc<EntityContext>| c.entities()[0].clone()).ok_or_else(|| {
                        PersistenceError::configuration(format!("hierarchy {name}: unknown member {m}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if contexts.contains_key(&name) {
                return Err(PersistenceError::configuration(format!("hierarchy {name} clashes with an entity name")));
            }
            let context = EntityContext::hierarchy(name.clone(), metas)?;
            contexts.insert(name, Arc::new(context));
        }

        for meta in &self.entities {
            for column in meta.columns() {
                let Some(target) = column.kind().target() else { continue };
                let Some(context) = contexts.get(target) else {
                    return Err(PersistenceError::configuration(format!(
                        "entity {}: column `{}` targets unknown entity {target}",
                        meta.name(),
                        column.name()
                    )));
                };
                if let ColumnKind::Mapped { mapped_by, .. } = column.kind() {
                    let owned = context.entities().iter().any(|m| {
                        m.column(mapped_by).is_some_and(|c| matches!(c.kind(), ColumnKind::Join { target } if target == meta.name()))
                    });
                    if !owned {
                        return Err(PersistenceError::configuration(format!(
                            "entity {}: `{}` is mapped by {target}.{mapped_by}, which is not a join back to it",
                            meta.name(),
                            column.name()
                        )));
                    }
                }
            }
        }
        Ok(MetaRegistry { contexts, by_type })
    }
}
