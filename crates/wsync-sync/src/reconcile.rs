//! Schema reconciliation: staging is the source of truth, the target is
//! evolved towards it where that is lossless.

use serde::Serialize;
use tracing::{error, info, warn};
use wsync_core::{AuditColumn, ColumnType, SchemaColumn, TableId, Value};
use wsync_sql::{
    ast::{common::TableRef, Statement},
    build::{ddl::AlterTableBuilder, dml::UpdateBuilder},
    col, eq, keys_match, literal,
};

use crate::warehouse::{Warehouse, WarehouseError};

pub const TARGET_ALIAS: &str = "TGT";
pub const SOURCE_ALIAS: &str = "SRC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ColumnChange {
    Add {
        column: SchemaColumn,
    },
    Alter {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
    ComplexAlter {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
    Unchanged {
        column: String,
    },
}

impl ColumnChange {
    pub fn column(&self) -> &str {
        match self {
            ColumnChange::Add { column } => &column.name,
            ColumnChange::Alter { column, .. }
            | ColumnChange::ComplexAlter { column, .. }
            | ColumnChange::Unchanged { column } => column,
        }
    }
}

/// Classifies every staging column against the target, in staging order.
/// Audit columns on either side are ignored.
pub fn diff_schemas(staging: &[SchemaColumn], target: &[SchemaColumn]) -> Vec<ColumnChange> {
    staging
        .iter()
        .filter(|column| !AuditColumn::is_audit(&column.name))
        .map(|column| {
            let existing = target
                .iter()
                .find(|t| t.name == column.name && !AuditColumn::is_audit(&t.name));
            match existing {
                None => ColumnChange::Add {
                    column: column.clone(),
                },
                Some(current) if current.column_type == column.column_type => ColumnChange::Unchanged {
                    column: column.name.clone(),
                },
                Some(current) if current.column_type.can_promote_to(&column.column_type) => {
                    ColumnChange::Alter {
                        column: column.name.clone(),
                        from: current.column_type.clone(),
                        to: column.column_type.clone(),
                    }
                }
                Some(current) => ColumnChange::ComplexAlter {
                    column: column.name.clone(),
                    from: current.column_type.clone(),
                    to: column.column_type.clone(),
                },
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnFailure {
    pub column: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub altered: Vec<String>,
    pub complex: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<ColumnFailure>,
}

impl ReconcileReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// `ALTER TABLE .. ADD COLUMN` followed by back-filling active rows from
/// staging on the unique key.
pub fn add_column_statements(
    staging: &TableId,
    target: &TableId,
    column: &SchemaColumn,
    unique_key: &[String],
) -> Vec<Statement> {
    let add = AlterTableBuilder::new(TableRef::from(target))
        .add_column(&column.name, column.column_type.clone());

    let active = eq(
        col(TARGET_ALIAS, AuditColumn::ActiveFlag.name()),
        literal(Value::Bool(true)),
    );
    let condition = match keys_match(TARGET_ALIAS, SOURCE_ALIAS, unique_key) {
        Some(keys) => wsync_sql::and_all([keys, active]),
        None => Some(active),
    };
    let mut populate = UpdateBuilder::new(TableRef::from(target), Some(TARGET_ALIAS))
        .set(&column.name, col(SOURCE_ALIAS, &column.name))
        .from(TableRef::from(staging), Some(SOURCE_ALIAS));
    if let Some(condition) = condition {
        populate = populate.where_clause(condition);
    }

    vec![add.into(), populate.build().into()]
}

pub fn alter_column_statement(target: &TableId, column: &str, to: &ColumnType) -> Statement {
    AlterTableBuilder::new(TableRef::from(target))
        .alter_column_type(column, to.clone())
        .into()
}

/// Applies every safe schema change. Failures on one column are recorded
/// in the report and never stop the remaining columns.
pub async fn reconcile(
    warehouse: &dyn Warehouse,
    staging: &TableId,
    target: &TableId,
    unique_key: &[String],
) -> Result<ReconcileReport, WarehouseError> {
    let staging_columns = warehouse.columns(staging).await?;
    let target_columns = warehouse.columns(target).await?;

    let mut report = ReconcileReport::default();
    for change in diff_schemas(&staging_columns, &target_columns) {
        match change {
            ColumnChange::Unchanged { column } => report.unchanged.push(column),
            ColumnChange::ComplexAlter { column, from, to } => {
                warn!(
                    target = %target,
                    column = %column,
                    %from,
                    %to,
                    "complex_alter: type change is not a lossless widening; column left unchanged"
                );
                report.complex.push(column);
            }
            ColumnChange::Add { column } => {
                match run_all(warehouse, add_column_statements(staging, target, &column, unique_key)).await {
                    Ok(populated) => {
                        info!(target = %target, column = %column.name, column_type = %column.column_type, populated, "added column");
                        report.added.push(column.name);
                    }
                    Err(err) => record_failure(&mut report, target, column.name, err),
                }
            }
            ColumnChange::Alter { column, from, to } => {
                match warehouse.execute(&alter_column_statement(target, &column, &to)).await {
                    Ok(_) => {
                        info!(target = %target, column = %column, %from, %to, "widened column type");
                        report.altered.push(column);
                    }
                    Err(err) => record_failure(&mut report, target, column, err),
                }
            }
        }
    }
    Ok(report)
}

async fn run_all(warehouse: &dyn Warehouse, statements: Vec<Statement>) -> Result<u64, WarehouseError> {
    let mut last = 0;
    for statement in &statements {
        last = warehouse.execute(statement).await?;
    }
    Ok(last)
}

fn record_failure(report: &mut ReconcileReport, target: &TableId, column: String, err: WarehouseError) {
    error!(target = %target, column = %column, error = %err, "column reconciliation failed; continuing");
    report.failed.push(ColumnFailure {
        column,
        error: err.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{memory::MemTable, MemoryWarehouse};
    use wsync_sql::{dialect::Postgres, render};

    fn c(name: &str, ty: ColumnType) -> SchemaColumn {
        SchemaColumn::new(name, ty)
    }

    #[test]
    fn classifies_each_column_and_ignores_audit_columns() {
        let staging = vec![
            c("id", ColumnType::Int64),
            c("rank", ColumnType::Numeric),
            c("score", ColumnType::Int64),
            c("name", ColumnType::String),
            c("hand", ColumnType::String),
            c(AuditColumn::ActiveFlag.name(), ColumnType::String),
        ];
        let mut target = vec![
            c("id", ColumnType::Int64),
            c("rank", ColumnType::Int64),
            c("score", ColumnType::Numeric),
            c("name", ColumnType::Float64),
        ];
        target.extend(AuditColumn::schema());

        let changes = diff_schemas(&staging, &target);
        assert_eq!(
            changes,
            vec![
                ColumnChange::Unchanged { column: "id".into() },
                ColumnChange::Alter {
                    column: "rank".into(),
                    from: ColumnType::Int64,
                    to: ColumnType::Numeric,
                },
                ColumnChange::ComplexAlter {
                    column: "score".into(),
                    from: ColumnType::Numeric,
                    to: ColumnType::Int64,
                },
                ColumnChange::ComplexAlter {
                    column: "name".into(),
                    from: ColumnType::Float64,
                    to: ColumnType::String,
                },
                ColumnChange::Add {
                    column: c("hand", ColumnType::String),
                },
            ]
        );
    }

    #[test]
    fn add_column_populates_active_rows_on_key() {
        let staging = TableId::new(None, "scratch", "tmp_players");
        let target = TableId::new(None, "sports", "players");
        let statements = add_column_statements(
            &staging,
            &target,
            &c("hand", ColumnType::String),
            &["player_id".to_string()],
        );
        let sql: Vec<String> = statements.iter().map(|s| render(s, &Postgres).0).collect();
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "sports"."players" ADD COLUMN "hand" TEXT"#.to_string(),
                concat!(
                    r#"UPDATE "sports"."players" AS "TGT" SET "hand" = "SRC"."hand" "#,
                    r#"FROM "scratch"."tmp_players" AS "SRC" "#,
                    r#"WHERE (("TGT"."player_id" = "SRC"."player_id") AND ("TGT"."audit_column__active_flag" = TRUE))"#
                )
                .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn a_failing_column_does_not_stop_the_others() {
        let wh = MemoryWarehouse::new();
        let staging = TableId::new(None, "scratch", "tmp_players");
        let target = TableId::new(None, "sports", "players");
        wh.insert_table(
            &staging,
            MemTable {
                columns: vec![
                    c("id", ColumnType::Int64),
                    c("rank", ColumnType::Float64),
                    c("hand", ColumnType::String),
                    c("age", ColumnType::Int64),
                ],
                rows: vec![vec![
                    Value::Int(1),
                    Value::Float(2.5),
                    Value::String("R".into()),
                    Value::Int(30),
                ]],
            },
        );
        let mut target_columns = vec![c("id", ColumnType::Int64), c("rank", ColumnType::Int64)];
        target_columns.extend(AuditColumn::schema());
        let mut row = vec![Value::Int(1), Value::Int(2), Value::Bool(true)];
        row.resize(target_columns.len(), Value::Null);
        wh.insert_table(
            &target,
            MemTable {
                columns: target_columns,
                rows: vec![row],
            },
        );
        wh.reject_alterations_of("hand");

        let report = reconcile(&wh, &staging, &target, &["id".to_string()])
            .await
            .expect("reconcile");

        assert_eq!(report.altered, vec!["rank".to_string()]);
        assert_eq!(report.added, vec!["age".to_string()]);
        assert!(report.has_failures());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].column, "hand");

        let table = wh.table(&target).expect("target");
        let records = table.records();
        assert_eq!(records[0]["rank"], Value::Float(2.0));
        assert_eq!(records[0]["age"], Value::Int(30));
        assert!(table.column_index("hand").is_none());
    }
}
