use crate::access::{HierarchyIdAccessor, IdAccessor, NullIdAccessor};
use crate::entity::{entity_type_id, Entity};
use crate::error::PersistenceError;
use crate::meta::{ColumnMeta, EntityMeta, TableMeta};
use crate::value::ColumnData;
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

/// Target of a request: one mapped type or a discriminated hierarchy of them.
pub enum EntityContext {
    Single(SingleEntityContext),
    Hierarchy(HierarchyEntityContext),
}

pub struct SingleEntityContext {
    meta: [Arc<EntityMeta>; 1],
}

pub struct HierarchyEntityContext {
    name: String,
    members: Vec<Arc<EntityMeta>>,
    discriminator: String,
    id_accessor: Arc<dyn IdAccessor>,
}

impl EntityContext {
    pub fn single(meta: Arc<EntityMeta>) -> Self {
        EntityContext::Single(SingleEntityContext { meta: [meta] })
    }

    /// Every member must carry a distinct value of the same discriminator column.
    pub fn hierarchy(name: impl Into<String>, mut members: Vec<Arc<EntityMeta>>) -> Result<Self, PersistenceError> {
        let name = name.into();
        let invalid = |message: String| PersistenceError::configuration(format!("hierarchy {name}: {message}"));
        members.sort();
        members.dedup();
        if members.len() < 2 {
            return Err(invalid("needs at least two distinct members".to_string()));
        }
        let mut column: Option<&str> = None;
        let mut values = HashSet::new();
        for member in &members {
            let Some((c, v)) = member.discriminator() else {
                return Err(invalid(format!("member {} has no discriminator", member.name())));
            };
            match column {
                Some(existing) if existing != c => {
                    return Err(invalid(format!("members disagree on discriminator column `{existing}` vs `{c}`")));
                }
                _ => column = Some(c),
            }
            if !values.insert(v.clone()) {
                return Err(invalid(format!("discriminator value {v} used twice")));
            }
        }
        let discriminator = column.map(str::to_string).unwrap_or_default();
        let id_accessor = Self::hierarchy_id(&members);
        Ok(EntityContext::Hierarchy(HierarchyEntityContext { name, members, discriminator, id_accessor }))
    }

    fn hierarchy_id(members: &[Arc<EntityMeta>]) -> Arc<dyn IdAccessor> {
        let first = members[0].id_accessor().clone();
        if members.iter().any(|m| m.id_accessor().columns() != first.columns()) {
            crate::warn!("hierarchy members have different key columns, identity is unavailable");
            return Arc::new(NullIdAccessor);
        }
        let dispatch = members.iter().map(|m| (m.type_id(), m.id_accessor().clone())).collect();
        Arc::new(HierarchyIdAccessor::new(first, dispatch))
    }

    pub fn name(&self) -> &str {
        match self {
            EntityContext::Single(s) => s.meta[0].name(),
            EntityContext::Hierarchy(h) => &h.name,
        }
    }

    pub fn is_hierarchy(&self) -> bool {
        matches!(self, EntityContext::Hierarchy(_))
    }

    pub fn id_accessor(&self) -> &Arc<dyn IdAccessor> {
        match self {
            EntityContext::Single(s) => s.meta[0].id_accessor(),
            EntityContext::Hierarchy(h) => &h.id_accessor,
        }
    }

    pub fn entities(&self) -> &[Arc<EntityMeta>] {
        match self {
            EntityContext::Single(s) => &s.meta,
            EntityContext::Hierarchy(h) => &h.members,
        }
    }

    pub fn discriminator_column(&self) -> Option<&str> {
        match self {
            EntityContext::Single(s) => s.meta[0].discriminator().map(|(c, _)| c),
            EntityContext::Hierarchy(h) => Some(&h.discriminator),
        }
    }

    fn tables(&self, join: bool) -> Vec<&TableMeta> {
        let mut seen = HashSet::new();
        self.entities()
            .iter()
            .flat_map(|m| m.tables().iter())
            .filter(|t| t.is_join() == join && seen.insert(t.name()))
            .collect()
    }

    /// Distinct by name across members.
    pub fn primary_tables(&self) -> Vec<&TableMeta> {
        self.tables(false)
    }

    pub fn secondary_tables(&self) -> Vec<&TableMeta> {
        self.tables(true)
    }

    pub fn find_table(&self, name: &str) -> Option<&TableMeta> {
        self.entities().iter().find_map(|m| m.find_table(name))
    }

    pub fn primary_keys(&self) -> &[String] {
        self.id_accessor().columns()
    }

    /// Distinct by name across members.
    pub fn columns(&self) -> Vec<&Arc<ColumnMeta>> {
        let mut seen = HashSet::new();
        self.entities().iter().flat_map(|m| m.columns()).filter(|c| seen.insert(c.name())).collect()
    }

    /// Columns read together with the row of a primary table.
    pub fn eager_columns(&self) -> HashSet<&str> {
        self.entities().iter().flat_map(|m| m.columns()).filter(|c| c.is_eager()).map(|c| c.name()).collect()
    }

    pub fn entity_for(&self, type_id: TypeId) -> Option<&Arc<EntityMeta>> {
        self.entities().iter().find(|m| m.type_id() == type_id)
    }

    pub fn entity_of(&self, entity: &dyn Entity) -> Option<&Arc<EntityMeta>> {
        self.entity_for(entity_type_id(entity))
    }

    /// Concrete member a stored row belongs to.
    ///
    /// A hierarchy row needs a discriminator value matching exactly one member, anything else is no match.
    pub fn find_entity(&self, data: &ColumnData) -> Option<&Arc<EntityMeta>> {
        match self {
            EntityContext::Single(s) => Some(&s.meta[0]),
            EntityContext::Hierarchy(h) => {
                let value = data.get(&h.discriminator).filter(|v| !v.is_null())?;
                let mut matching = h.members.iter().filter(|m| m.discriminator().is_some_and(|(_, d)| d == value));
                match (matching.next(), matching.next()) {
                    (Some(member), None) => Some(member),
                    _ => None,
                }
            }
        }
    }
}

impl std::fmt::Debug for EntityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members: Vec<_> = self.entities().iter().map(|m| m.name()).collect();
        match self {
            EntityContext::Single(_) => write!(f, "SingleEntityContext({})", self.name()),
            EntityContext::Hierarchy(h) => write!(f, "HierarchyEntityContext({}, {:?} by `{}`)", h.name, members, h.discriminator),
        }
    }
}
