use crate::meta::ColumnMeta;
use std::sync::Arc;

/// Named group of columns stored together.
#[derive(Debug, Clone)]
pub struct TableMeta {
    name: String,
    join: bool,
    columns: Vec<Arc<ColumnMeta>>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>, join: bool, columns: Vec<Arc<ColumnMeta>>) -> Self {
        Self { name: name.into(), join, columns }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Secondary table holding associations or collections.
    pub fn is_join(&self) -> bool {
        self.join
    }

    pub fn columns(&self) -> impl Iterator<Item = &Arc<ColumnMeta>> {
        self.columns.iter()
    }

    pub fn column(&self, name: &str) -> Option<&Arc<ColumnMeta>> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &Arc<ColumnMeta>> {
        self.columns.iter().filter(|c| c.is_primary_key())
    }

    pub fn collection_columns(&self) -> impl Iterator<Item = &Arc<ColumnMeta>> {
        self.columns.iter().filter(|c| c.kind().is_collection())
    }
}
