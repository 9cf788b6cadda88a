//! Warehouse contract and backends.

use async_trait::async_trait;
use thiserror::Error;
use wsync_core::{SchemaColumn, TableId, Value};
use wsync_sql::{
    ast::{common::TableRef, Statement},
    build::{
        ddl::{CreateSchemaBuilder, CreateTableBuilder, DropTableBuilder},
        dml::InsertBuilder,
    },
    value,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryWarehouse;
pub use postgres::PgWarehouse;

/// Upper bound on bound parameters in one `INSERT`.
const MAX_PARAMS_PER_INSERT: usize = 30_000;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("table {0} does not exist")]
    MissingTable(String),
    #[error("table {0} already exists")]
    TableExists(String),
    #[error("column {column} on {table}: {message}")]
    Column {
        table: String,
        column: String,
        message: String,
    },
    #[error("unsupported statement: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Set-based warehouse surface the sync engine relies on. Every statement
/// commits on its own.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &str;

    async fn table_exists(&self, table: &TableId) -> Result<bool, WarehouseError>;

    /// Declared columns in table order.
    async fn columns(&self, table: &TableId) -> Result<Vec<SchemaColumn>, WarehouseError>;

    /// Runs one statement and returns the rows it affected.
    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError>;

    async fn ensure_dataset(&self, table: &TableId) -> Result<(), WarehouseError> {
        let stmt = CreateSchemaBuilder::new(table.project.as_deref(), &table.dataset)
            .if_not_exists()
            .build();
        self.execute(&stmt.into()).await.map(|_| ())
    }

    async fn create_table(
        &self,
        table: &TableId,
        columns: &[SchemaColumn],
    ) -> Result<(), WarehouseError> {
        let stmt = CreateTableBuilder::new(TableRef::from(table))
            .columns(columns)
            .build();
        self.execute(&stmt.into()).await.map(|_| ())
    }

    async fn drop_table(&self, table: &TableId) -> Result<(), WarehouseError> {
        let stmt = DropTableBuilder::new(TableRef::from(table)).if_exists().build();
        self.execute(&stmt.into()).await.map(|_| ())
    }

    /// Appends rows through chunked multi-row `INSERT` statements.
    async fn insert_rows(
        &self,
        table: &TableId,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<u64, WarehouseError> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let chunk_rows = (MAX_PARAMS_PER_INSERT / columns.len()).clamp(1, 1_000);
        let mut inserted = 0;
        for chunk in rows.chunks(chunk_rows) {
            let values: Vec<Vec<_>> = chunk
                .iter()
                .map(|row| row.iter().cloned().map(value).collect())
                .collect();
            let stmt = InsertBuilder::new(TableRef::from(table))
                .columns(columns)
                .values(values)
                .build();
            inserted += self.execute(&stmt.into()).await?;
        }
        Ok(inserted)
    }
}
