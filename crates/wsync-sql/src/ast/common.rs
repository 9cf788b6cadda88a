//! Common AST nodes shared by several statements.

use wsync_core::TableId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub project: Option<String>,
    pub dataset: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        Self {
            project: None,
            dataset: None,
            name: name.to_string(),
        }
    }
}

impl From<&TableId> for TableRef {
    fn from(id: &TableId) -> Self {
        Self {
            project: id.project.clone(),
            dataset: Some(id.dataset.clone()),
            name: id.table.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}
