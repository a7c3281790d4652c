//! Immutable description of how entities are stored.
//!
//! Built once at startup and shared read-only between sessions.

pub mod column;
pub mod context;
pub mod entity;
pub mod registry;
pub mod table;

pub use column::{ColumnKind, ColumnMeta};
pub use context::{EntityContext, HierarchyEntityContext, SingleEntityContext};
pub use entity::{EntityMeta, EntityMetaBuilder};
pub use registry::{MetaRegistry, MetaRegistryBuilder};
pub use table::TableMeta;
