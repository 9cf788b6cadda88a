//! Statement AST.

pub mod common;
pub mod ddl;
pub mod dml;
pub mod expr;
pub mod select;

use crate::ast::{
    ddl::{AlterTable, CreateSchema, CreateTable, CreateTableAs, DropTable},
    dml::{Insert, Update},
    select::Select,
};

/// Any statement the sync engine sends to a warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateSchema(CreateSchema),
    CreateTable(CreateTable),
    CreateTableAs(CreateTableAs),
    DropTable(DropTable),
    AlterTable(AlterTable),
    Insert(Insert),
    Update(Update),
    Select(Select),
}

impl Statement {
    /// Short verb used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::CreateSchema(_) => "create_schema",
            Statement::CreateTable(_) => "create_table",
            Statement::CreateTableAs(_) => "create_table_as",
            Statement::DropTable(_) => "drop_table",
            Statement::AlterTable(_) => "alter_table",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Select(_) => "select",
        }
    }
}

macro_rules! impl_from_statement {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Statement {
                fn from(value: $variant) -> Self {
                    Statement::$variant(value)
                }
            }
        )*
    };
}

impl_from_statement!(
    CreateSchema,
    CreateTable,
    CreateTableAs,
    DropTable,
    AlterTable,
    Insert,
    Update,
    Select,
);
