//! Versioned (SCD Type II) merge of a staging table into its target.
//!
//! A key's history is never rewritten: a changed row expires the active
//! version and inserts a new one, an unchanged row is left alone, and a
//! new key is inserted as the first version.

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use wsync_core::{AuditColumn, ColumnType, RecordType, SchemaColumn, TableId, Value};
use wsync_sql::{
    and_all,
    ast::{
        common::{JoinKind, TableRef},
        expr::{BinaryOperator, Expr},
        Statement,
    },
    binary,
    build::{
        ddl::DropTableBuilder,
        dml::{InsertBuilder, UpdateBuilder},
        select::SelectBuilder,
    },
    col, eq, keys_match, literal, or_all,
};

use crate::reconcile::{SOURCE_ALIAS, TARGET_ALIAS};
use crate::warehouse::{Warehouse, WarehouseError};

pub const COMPARE_ALIAS: &str = "COMPARE";

/// Suffix of the scratch table holding the change set.
pub const CHANGE_SET_SUFFIX: &str = "__update";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("unique key column {0} is missing from staging or target")]
    MissingKeyColumn(String),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Staged rows whose active version differs.
    pub changed: u64,
    pub expired: u64,
    pub inserted_updates: u64,
    pub inserted_new: u64,
}

impl MergeReport {
    pub fn rows_written(&self) -> u64 {
        self.expired + self.inserted_updates + self.inserted_new
    }
}

/// A business column carried by the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeColumn {
    pub name: String,
    pub staging_type: ColumnType,
    pub target_type: ColumnType,
}

impl MergeColumn {
    pub fn same_type(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            staging_type: column_type.clone(),
            target_type: column_type,
        }
    }

    /// Staged value as written into the target column. A value that does
    /// not convert to the target type is written as null.
    fn projected(&self, alias: &str) -> Expr {
        let source = col(alias, &self.name);
        if self.staging_type == self.target_type {
            source
        } else {
            source.safe_cast(self.target_type.clone())
        }
    }
}

/// Staging columns that also exist on the target, in staging order.
pub fn merge_columns(staging: &[SchemaColumn], target: &[SchemaColumn]) -> Vec<MergeColumn> {
    staging
        .iter()
        .filter(|c| !AuditColumn::is_audit(&c.name))
        .filter_map(|c| {
            target.iter().find(|t| t.name == c.name).map(|t| MergeColumn {
                name: c.name.clone(),
                staging_type: c.column_type.clone(),
                target_type: t.column_type.clone(),
            })
        })
        .collect()
}

/// Statements of one merge, in execution order.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub change_set_table: TableId,
    pub drop_change_set: Statement,
    pub build_change_set: Statement,
    pub expire: Statement,
    pub insert_updates: Statement,
    pub insert_new: Statement,
}

impl MergePlan {
    pub fn statements(&self) -> Vec<&Statement> {
        vec![
            &self.drop_change_set,
            &self.build_change_set,
            &self.expire,
            &self.insert_updates,
            &self.insert_new,
            &self.drop_change_set,
        ]
    }
}

fn active_flag(alias: &str) -> Expr {
    eq(
        col(alias, AuditColumn::ActiveFlag.name()),
        literal(Value::Bool(true)),
    )
}

fn insert_column_names(columns: &[MergeColumn]) -> Vec<String> {
    columns
        .iter()
        .map(|c| c.name.clone())
        .chain(
            [
                AuditColumn::ActiveFlag,
                AuditColumn::RecordType,
                AuditColumn::StartDatetime,
                AuditColumn::InsertDatetime,
            ]
            .iter()
            .map(|a| a.name().to_string()),
        )
        .collect()
}

fn versioned_projection(columns: &[MergeColumn], alias: &str, record_type: RecordType) -> Vec<Expr> {
    columns
        .iter()
        .map(|c| c.projected(alias))
        .chain([
            literal(Value::Bool(true)),
            literal(Value::String(record_type.as_str().to_string())),
            Expr::CurrentTimestamp,
            Expr::CurrentTimestamp,
        ])
        .collect()
}

pub fn plan_merge(
    staging: &TableId,
    target: &TableId,
    columns: &[MergeColumn],
    unique_key: &[String],
    recover_orphaned_keys: bool,
) -> Result<MergePlan, MergeError> {
    for key in unique_key {
        if !columns.iter().any(|c| &c.name == key) {
            return Err(MergeError::MissingKeyColumn(key.clone()));
        }
    }
    let first_key = unique_key
        .first()
        .ok_or_else(|| MergeError::MissingKeyColumn("<none>".to_string()))?;

    let change_set_table = staging.with_suffix(CHANGE_SET_SUFFIX);
    let staging_ref = TableRef::from(staging);
    let target_ref = TableRef::from(target);
    let change_set_ref = TableRef::from(&change_set_table);

    let drop_change_set = DropTableBuilder::new(change_set_ref.clone()).if_exists().build().into();

    // Any non-key value, as it would be written, differing as text.
    let differs = or_all(
        columns
            .iter()
            .filter(|c| !unique_key.contains(&c.name))
            .map(|c| {
                binary(
                    c.projected(SOURCE_ALIAS).text_cast(),
                    BinaryOperator::IsDistinctFrom,
                    col(TARGET_ALIAS, &c.name).text_cast(),
                )
            }),
    )
    .unwrap_or_else(|| literal(Value::Bool(false)));

    let staging_match = keys_match(SOURCE_ALIAS, TARGET_ALIAS, unique_key)
        .ok_or_else(|| MergeError::MissingKeyColumn(first_key.clone()))?;

    let change_set_query = SelectBuilder::new()
        .select(columns.iter().map(|c| col(SOURCE_ALIAS, &c.name)).collect())
        .from(staging_ref.clone(), Some(SOURCE_ALIAS))
        .join(JoinKind::Inner, target_ref.clone(), Some(TARGET_ALIAS), staging_match.clone())
        .where_clause(binary(active_flag(TARGET_ALIAS), BinaryOperator::And, differs))
        .build();
    let build_change_set = Statement::CreateTableAs(wsync_sql::ast::ddl::CreateTableAs {
        table: change_set_ref.clone(),
        query: change_set_query,
    });

    let compare_match = keys_match(TARGET_ALIAS, COMPARE_ALIAS, unique_key)
        .ok_or_else(|| MergeError::MissingKeyColumn(first_key.clone()))?;
    let expire = UpdateBuilder::new(target_ref.clone(), Some(TARGET_ALIAS))
        .set(AuditColumn::ActiveFlag.name(), literal(Value::Bool(false)))
        .set(AuditColumn::EndDatetime.name(), Expr::CurrentTimestamp)
        .set(AuditColumn::UpdateDatetime.name(), Expr::CurrentTimestamp)
        .from(change_set_ref.clone(), Some(COMPARE_ALIAS))
        .where_clause(binary(active_flag(TARGET_ALIAS), BinaryOperator::And, compare_match))
        .build()
        .into();

    let insert_columns = insert_column_names(columns);
    let insert_updates = InsertBuilder::new(target_ref.clone())
        .columns(&insert_columns)
        .select(
            SelectBuilder::new()
                .select(versioned_projection(columns, COMPARE_ALIAS, RecordType::Update))
                .from(change_set_ref, Some(COMPARE_ALIAS))
                .build(),
        )
        .build()
        .into();

    let new_key_join = if recover_orphaned_keys {
        binary(staging_match, BinaryOperator::And, active_flag(TARGET_ALIAS))
    } else {
        staging_match
    };
    let insert_new = InsertBuilder::new(target_ref.clone())
        .columns(&insert_columns)
        .select(
            SelectBuilder::new()
                .select(versioned_projection(columns, SOURCE_ALIAS, RecordType::Insert))
                .from(staging_ref, Some(SOURCE_ALIAS))
                .join(JoinKind::Left, target_ref, Some(TARGET_ALIAS), new_key_join)
                .where_clause(col(TARGET_ALIAS, first_key).is_null())
                .build(),
        )
        .build()
        .into();

    Ok(MergePlan {
        change_set_table,
        drop_change_set,
        build_change_set,
        expire,
        insert_updates,
        insert_new,
    })
}

/// Runs the merge. Each statement commits on its own; the change-set table
/// is dropped before and after.
pub async fn merge(
    warehouse: &dyn Warehouse,
    staging: &TableId,
    target: &TableId,
    unique_key: &[String],
    recover_orphaned_keys: bool,
) -> Result<MergeReport, MergeError> {
    let staging_columns = warehouse.columns(staging).await?;
    let target_columns = warehouse.columns(target).await?;
    let columns = merge_columns(&staging_columns, &target_columns);

    for skipped in staging_columns
        .iter()
        .filter(|c| !AuditColumn::is_audit(&c.name) && !columns.iter().any(|m| m.name == c.name))
    {
        warn!(target = %target, column = %skipped.name, "staging column missing on target; not merged");
    }

    let plan = plan_merge(staging, target, &columns, unique_key, recover_orphaned_keys)?;

    warehouse.execute(&plan.drop_change_set).await?;
    let changed = warehouse.execute(&plan.build_change_set).await?;
    let expired = warehouse.execute(&plan.expire).await?;
    let inserted_updates = warehouse.execute(&plan.insert_updates).await?;
    let inserted_new = warehouse.execute(&plan.insert_new).await?;
    warehouse.execute(&plan.drop_change_set).await?;

    let report = MergeReport {
        changed,
        expired,
        inserted_updates,
        inserted_new,
    };
    info!(
        target = %target,
        changed,
        expired,
        inserted_updates,
        inserted_new,
        "merge complete"
    );
    Ok(report)
}

/// `CREATE TABLE target AS SELECT staging.*, <audit columns>` for a first load.
pub fn first_load_statement(staging: &TableId, target: &TableId) -> Statement {
    let now = || Expr::CurrentTimestamp;
    let null_ts = || literal(Value::Null).cast(ColumnType::Timestamp);
    let audit = [
        (AuditColumn::ActiveFlag, literal(Value::Bool(true))),
        (
            AuditColumn::RecordType,
            literal(Value::String(RecordType::Insert.as_str().to_string())),
        ),
        (AuditColumn::StartDatetime, now()),
        (AuditColumn::EndDatetime, null_ts()),
        (AuditColumn::InsertDatetime, now()),
        (AuditColumn::UpdateDatetime, null_ts()),
        (AuditColumn::DeleteDatetime, null_ts()),
    ];

    let mut projection = vec![Expr::Wildcard {
        qualifier: Some(SOURCE_ALIAS.to_string()),
    }];
    projection.extend(audit.into_iter().map(|(column, expr)| expr.alias(column.name())));

    Statement::CreateTableAs(wsync_sql::ast::ddl::CreateTableAs {
        table: TableRef::from(target),
        query: SelectBuilder::new()
            .select(projection)
            .from(TableRef::from(staging), Some(SOURCE_ALIAS))
            .build(),
    })
}

/// Creates the target from staging; every row starts as an active insert.
pub async fn create_target_from_staging(
    warehouse: &dyn Warehouse,
    staging: &TableId,
    target: &TableId,
) -> Result<u64, WarehouseError> {
    warehouse.ensure_dataset(target).await?;
    let rows = warehouse.execute(&first_load_statement(staging, target)).await?;
    info!(target = %target, rows, "created target from staging");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{memory::MemTable, MemoryWarehouse};
    use wsync_sql::{dialect::Postgres, render};

    fn staging() -> TableId {
        TableId::new(None, "scratch", "tmp_players")
    }

    fn target() -> TableId {
        TableId::new(None, "sports", "players")
    }

    fn columns() -> Vec<MergeColumn> {
        vec![
            MergeColumn::same_type("k", ColumnType::Int64),
            MergeColumn::same_type("v", ColumnType::String),
        ]
    }

    #[test]
    fn change_set_compares_non_key_columns_as_text() {
        let plan = plan_merge(&staging(), &target(), &columns(), &["k".to_string()], true).expect("plan");
        let (sql, params) = render(&plan.build_change_set, &Postgres);
        assert!(params.is_empty());
        assert_eq!(
            sql,
            concat!(
                r#"CREATE TABLE "scratch"."tmp_players__update" AS SELECT "SRC"."k", "SRC"."v" "#,
                r#"FROM "scratch"."tmp_players" AS "SRC" "#,
                r#"INNER JOIN "sports"."players" AS "TGT" ON ("SRC"."k" = "TGT"."k") "#,
                r#"WHERE (("TGT"."audit_column__active_flag" = TRUE) AND "#,
                r#"(CAST("SRC"."v" AS TEXT) IS DISTINCT FROM CAST("TGT"."v" AS TEXT)))"#
            )
        );
    }

    #[test]
    fn expire_only_touches_active_rows() {
        let plan = plan_merge(&staging(), &target(), &columns(), &["k".to_string()], true).expect("plan");
        let (sql, _) = render(&plan.expire, &Postgres);
        assert_eq!(
            sql,
            concat!(
                r#"UPDATE "sports"."players" AS "TGT" SET "audit_column__active_flag" = FALSE, "#,
                r#""audit_column__end_datetime_utc" = CURRENT_TIMESTAMP, "#,
                r#""audit_column__update_datetime_utc" = CURRENT_TIMESTAMP "#,
                r#"FROM "scratch"."tmp_players__update" AS "COMPARE" "#,
                r#"WHERE (("TGT"."audit_column__active_flag" = TRUE) AND ("TGT"."k" = "COMPARE"."k"))"#
            )
        );
    }

    #[test]
    fn orphan_recovery_only_changes_the_new_key_join() {
        let keys = ["k".to_string()];
        let recovering = plan_merge(&staging(), &target(), &columns(), &keys, true).expect("plan");
        let strict = plan_merge(&staging(), &target(), &columns(), &keys, false).expect("plan");

        let (recovering_sql, _) = render(&recovering.insert_new, &Postgres);
        let (strict_sql, _) = render(&strict.insert_new, &Postgres);
        assert!(recovering_sql.contains(
            r#"LEFT JOIN "sports"."players" AS "TGT" ON (("SRC"."k" = "TGT"."k") AND ("TGT"."audit_column__active_flag" = TRUE))"#
        ));
        assert!(strict_sql.contains(r#"LEFT JOIN "sports"."players" AS "TGT" ON ("SRC"."k" = "TGT"."k") WHERE"#));
        assert!(strict_sql.ends_with(r#"WHERE ("TGT"."k" IS NULL)"#));
        assert_eq!(
            render(&recovering.insert_updates, &Postgres).0,
            render(&strict.insert_updates, &Postgres).0
        );
    }

    #[test]
    fn key_columns_must_be_merged() {
        let err = plan_merge(&staging(), &target(), &columns(), &["id".to_string()], true);
        assert!(matches!(err, Err(MergeError::MissingKeyColumn(k)) if k == "id"));
    }

    #[test]
    fn mismatched_types_are_cast_to_the_target_type_or_null() {
        let staging_cols = vec![
            SchemaColumn::new("k", ColumnType::Int64),
            SchemaColumn::new("v", ColumnType::String),
            SchemaColumn::new("extra", ColumnType::Bool),
        ];
        let target_cols = vec![
            SchemaColumn::new("k", ColumnType::Int64),
            SchemaColumn::new("v", ColumnType::Float64),
        ];
        let merged = merge_columns(&staging_cols, &target_cols);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[1].projected("SRC"),
            col("SRC", "v").safe_cast(ColumnType::Float64)
        );

        let plan = plan_merge(&staging(), &target(), &merged, &["k".to_string()], true).expect("plan");
        let (sql, _) = render(&plan.insert_updates, &Postgres);
        assert!(sql.contains(
            r#"CASE WHEN CAST("COMPARE"."v" AS TEXT) ~* "#
        ));
        assert!(sql.contains(r#"THEN CAST("COMPARE"."v" AS DOUBLE PRECISION) END"#));
        let (sql, _) = render(&plan.build_change_set, &Postgres);
        assert!(sql.contains(r#"CAST(CASE WHEN CAST("SRC"."v" AS TEXT) ~* "#));
    }

    #[tokio::test]
    async fn values_that_do_not_fit_the_target_type_merge_as_null() {
        let wh = MemoryWarehouse::new();
        wh.insert_table(
            &target(),
            MemTable {
                columns: [
                    SchemaColumn::new("k", ColumnType::Int64),
                    SchemaColumn::new("v", ColumnType::Int64),
                ]
                .into_iter()
                .chain(AuditColumn::schema())
                .collect(),
                rows: vec![[Value::Int(1), Value::Int(3), Value::Bool(true)]
                    .into_iter()
                    .chain(std::iter::repeat(Value::Null).take(AuditColumn::ALL.len() - 1))
                    .collect()],
            },
        );
        wh.insert_table(
            &staging(),
            MemTable {
                columns: vec![
                    SchemaColumn::new("k", ColumnType::Int64),
                    SchemaColumn::new("v", ColumnType::String),
                ],
                rows: vec![
                    vec![Value::Int(1), Value::String("n/a".into())],
                    vec![Value::Int(2), Value::String("8".into())],
                ],
            },
        );

        let report = merge(&wh, &staging(), &target(), &["k".to_string()], true)
            .await
            .expect("merge");
        assert_eq!(report.expired, 1);
        assert_eq!(report.inserted_updates, 1);
        assert_eq!(report.inserted_new, 1);

        let active: Vec<_> = wh
            .table(&target())
            .expect("target")
            .records()
            .into_iter()
            .filter(|r| r[AuditColumn::ActiveFlag.name()] == Value::Bool(true))
            .map(|r| (r["k"].clone(), r["v"].clone()))
            .collect();
        assert_eq!(
            active,
            vec![(Value::Int(1), Value::Null), (Value::Int(2), Value::Int(8))]
        );
        assert!(wh.table(&staging().with_suffix(CHANGE_SET_SUFFIX)).is_none());
    }

    #[tokio::test]
    async fn first_load_marks_every_row_as_an_active_insert() {
        let wh = MemoryWarehouse::new();
        wh.insert_table(
            &staging(),
            MemTable {
                columns: vec![
                    SchemaColumn::new("k", ColumnType::Int64),
                    SchemaColumn::new("v", ColumnType::String),
                ],
                rows: vec![
                    vec![Value::Int(1), Value::String("a".into())],
                    vec![Value::Int(2), Value::Null],
                ],
            },
        );

        let rows = create_target_from_staging(&wh, &staging(), &target())
            .await
            .expect("create");
        assert_eq!(rows, 2);

        let table = wh.table(&target()).expect("target");
        assert_eq!(table.columns.len(), 2 + AuditColumn::ALL.len());
        assert_eq!(
            table.columns[2..].to_vec(),
            AuditColumn::schema()
        );
        for record in table.records() {
            assert_eq!(record[AuditColumn::ActiveFlag.name()], Value::Bool(true));
            assert_eq!(
                record[AuditColumn::RecordType.name()],
                Value::String("insert".into())
            );
            assert!(matches!(record[AuditColumn::StartDatetime.name()], Value::Timestamp(_)));
            assert_eq!(record[AuditColumn::EndDatetime.name()], Value::Null);
        }
    }
}
