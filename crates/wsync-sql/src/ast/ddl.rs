use wsync_core::{ColumnType, SchemaColumn};

use crate::ast::{common::TableRef, select::Select};

/// Creates the dataset (schema) that holds a table.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSchema {
    pub project: Option<String>,
    pub name: String,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub table: TableRef,
    pub columns: Vec<SchemaColumn>,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableAs {
    pub table: TableRef,
    pub query: Select,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTable {
    pub table: TableRef,
    pub if_exists: bool,
}

/// One alteration per statement so a rejected change stays isolated.
#[derive(Debug, Clone, PartialEq)]
pub struct AlterTable {
    pub table: TableRef,
    pub action: AlterAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn(SchemaColumn),
    AlterColumnType {
        column: String,
        data_type: ColumnType,
    },
}
