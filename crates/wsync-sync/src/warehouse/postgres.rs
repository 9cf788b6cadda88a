use async_trait::async_trait;
use sqlx::{
    postgres::{PgArguments, PgPoolOptions},
    query::Query,
    PgPool, Postgres as PgDb, Row,
};
use tracing::debug;
use wsync_core::{ColumnType, SchemaColumn, TableId, Value};
use wsync_sql::{dialect::Postgres, render, Statement};

use super::{Warehouse, WarehouseError};

/// Postgres backend. A dataset maps to a schema; projects are ignored.
#[derive(Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    /// The pool connects on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }
}

fn bind_value<'q>(query: Query<'q, PgDb, PgArguments>, value: Value) -> Query<'q, PgDb, PgArguments> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(v),
        Value::Int(v) => query.bind(v),
        // Rendered as CAST($n AS NUMERIC).
        Value::Numeric(v) => query.bind(v),
        Value::Float(v) => query.bind(v),
        Value::String(v) => query.bind(v),
        Value::Timestamp(v) => query.bind(v),
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn table_exists(&self, table: &TableId) -> Result<bool, WarehouseError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                  FROM information_schema.tables
                 WHERE table_schema = $1
                   AND table_name = $2
            ) AS present
            "#,
        )
        .bind(&table.dataset)
        .bind(&table.table)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("present")?)
    }

    async fn columns(&self, table: &TableId) -> Result<Vec<SchemaColumn>, WarehouseError> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type
              FROM information_schema.columns
             WHERE table_schema = $1
               AND table_name = $2
             ORDER BY ordinal_position
            "#,
        )
        .bind(&table.dataset)
        .bind(&table.table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(WarehouseError::MissingTable(table.to_string()));
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("column_name")?;
            let data_type: String = row.try_get("data_type")?;
            out.push(SchemaColumn::new(name, ColumnType::parse(&data_type)));
        }
        Ok(out)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let (sql, params) = render(statement, &Postgres);
        debug!(kind = statement.kind(), params = params.len(), %sql, "executing statement");

        let mut query = sqlx::query(&sql);
        for param in params {
            query = bind_value(query, param);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
