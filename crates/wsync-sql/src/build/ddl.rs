use wsync_core::{ColumnType, SchemaColumn};

use crate::ast::{
    common::TableRef,
    ddl::{AlterAction, AlterTable, CreateSchema, CreateTable, DropTable},
};

#[derive(Debug, Clone)]
pub struct CreateSchemaBuilder {
    ast: CreateSchema,
}

impl CreateSchemaBuilder {
    pub fn new(project: Option<&str>, name: &str) -> Self {
        Self {
            ast: CreateSchema {
                project: project.map(String::from),
                name: name.to_string(),
                if_not_exists: false,
            },
        }
    }

    pub fn if_not_exists(mut self) -> Self {
        self.ast.if_not_exists = true;
        self
    }

    pub fn build(self) -> CreateSchema {
        self.ast
    }
}

#[derive(Debug, Clone)]
pub struct CreateTableBuilder {
    ast: CreateTable,
}

impl CreateTableBuilder {
    pub fn new(table: TableRef) -> Self {
        Self {
            ast: CreateTable {
                table,
                columns: Vec::new(),
                if_not_exists: false,
            },
        }
    }

    pub fn column(mut self, name: &str, column_type: ColumnType) -> Self {
        self.ast.columns.push(SchemaColumn::new(name, column_type));
        self
    }

    pub fn columns(mut self, columns: &[SchemaColumn]) -> Self {
        self.ast.columns.extend_from_slice(columns);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.ast.if_not_exists = true;
        self
    }

    pub fn build(self) -> CreateTable {
        self.ast
    }
}

#[derive(Debug, Clone)]
pub struct DropTableBuilder {
    ast: DropTable,
}

impl DropTableBuilder {
    pub fn new(table: TableRef) -> Self {
        Self {
            ast: DropTable {
                table,
                if_exists: false,
            },
        }
    }

    pub fn if_exists(mut self) -> Self {
        self.ast.if_exists = true;
        self
    }

    pub fn build(self) -> DropTable {
        self.ast
    }
}

/// Each alteration finishes the statement; one change per `ALTER TABLE`.
#[derive(Debug, Clone)]
pub struct AlterTableBuilder {
    table: TableRef,
}

impl AlterTableBuilder {
    pub fn new(table: TableRef) -> Self {
        Self { table }
    }

    pub fn add_column(self, name: &str, column_type: ColumnType) -> AlterTable {
        AlterTable {
            table: self.table,
            action: AlterAction::AddColumn(SchemaColumn::new(name, column_type)),
        }
    }

    pub fn alter_column_type(self, column: &str, data_type: ColumnType) -> AlterTable {
        AlterTable {
            table: self.table,
            action: AlterAction::AlterColumnType {
                column: column.to_string(),
                data_type,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_table_builder() {
        let ast = DropTableBuilder::new(TableRef::new("users")).if_exists().build();
        assert!(ast.if_exists);
        assert_eq!(ast.table.name, "users");
    }

    #[test]
    fn create_table_builder_appends_columns() {
        let ast = CreateTableBuilder::new(TableRef::new("t"))
            .column("id", ColumnType::Int64)
            .columns(&[SchemaColumn::new("name", ColumnType::String)])
            .build();
        assert_eq!(ast.columns.len(), 2);
        assert_eq!(ast.columns[1].name, "name");
        assert!(!ast.if_not_exists);
    }
}
