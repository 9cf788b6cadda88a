//! In-process warehouse that interprets the statement AST directly.
//!
//! Semantics follow what the merge and reconcile statements need from a
//! real warehouse: three-valued logic for comparisons, inner and left
//! joins, `UPDATE .. FROM` with the first matching source row, and type
//! widening that rejects anything off the promotion lattice.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wsync_core::{ColumnType, SchemaColumn, TableId, Value};
use wsync_sql::ast::{
    common::{JoinKind, TableRef},
    ddl::{AlterAction, AlterTable, CreateSchema, CreateTable, CreateTableAs, DropTable},
    dml::{Insert, InsertSource, Update},
    expr::{BinaryOperator, Expr, Ident},
    select::Select,
    Statement,
};

use super::{Warehouse, WarehouseError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemTable {
    pub columns: Vec<SchemaColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl MemTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Rows keyed by column name.
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| (c.name.clone(), v.clone()))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    schemas: HashSet<String>,
    tables: HashMap<String, MemTable>,
    rejected_columns: HashSet<String>,
    failing_kinds: HashSet<&'static str>,
    log: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<State>,
}

fn table_key(table: &TableRef) -> String {
    format!("{}.{}", table.dataset.as_deref().unwrap_or_default(), table.name)
}

fn schema_key(table: &TableRef) -> String {
    table.dataset.clone().unwrap_or_default()
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, WarehouseError> {
        self.state
            .lock()
            .map_err(|_| WarehouseError::Rejected("memory warehouse lock poisoned".into()))
    }

    /// Copy of a table's current contents.
    pub fn table(&self, id: &TableId) -> Option<MemTable> {
        let state = self.lock().ok()?;
        state.tables.get(&table_key(&TableRef::from(id))).cloned()
    }

    /// Seeds a table (and its dataset) directly.
    pub fn insert_table(&self, id: &TableId, table: MemTable) {
        if let Ok(mut state) = self.lock() {
            let table_ref = TableRef::from(id);
            state.schemas.insert(schema_key(&table_ref));
            state.tables.insert(table_key(&table_ref), table);
        }
    }

    /// Makes every later `ALTER TABLE` touching `column` fail.
    pub fn reject_alterations_of(&self, column: &str) {
        if let Ok(mut state) = self.lock() {
            state.rejected_columns.insert(column.to_string());
        }
    }

    /// Makes every later statement of `kind` (see `Statement::kind`) fail.
    pub fn fail_statements_of_kind(&self, kind: &'static str) {
        if let Ok(mut state) = self.lock() {
            state.failing_kinds.insert(kind);
        }
    }

    /// Statement kinds executed so far, in order.
    pub fn statement_log(&self) -> Vec<&'static str> {
        self.lock().map(|s| s.log.clone()).unwrap_or_default()
    }

    pub fn query(&self, select: &Select) -> Result<MemTable, WarehouseError> {
        let state = self.lock()?;
        run_select(&state, select, Utc::now())
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn table_exists(&self, table: &TableId) -> Result<bool, WarehouseError> {
        let state = self.lock()?;
        Ok(state.tables.contains_key(&table_key(&TableRef::from(table))))
    }

    async fn columns(&self, table: &TableId) -> Result<Vec<SchemaColumn>, WarehouseError> {
        let state = self.lock()?;
        state
            .tables
            .get(&table_key(&TableRef::from(table)))
            .map(|t| t.columns.clone())
            .ok_or_else(|| WarehouseError::MissingTable(table.to_string()))
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, WarehouseError> {
        let mut state = self.lock()?;
        state.log.push(statement.kind());
        if state.failing_kinds.contains(statement.kind()) {
            return Err(WarehouseError::Rejected(format!(
                "{} statements are failing",
                statement.kind()
            )));
        }
        let now = Utc::now();
        match statement {
            Statement::CreateSchema(s) => create_schema(&mut state, s),
            Statement::CreateTable(s) => create_table(&mut state, s),
            Statement::CreateTableAs(s) => create_table_as(&mut state, s, now),
            Statement::DropTable(s) => drop_table(&mut state, s),
            Statement::AlterTable(s) => alter_table(&mut state, s),
            Statement::Insert(s) => insert(&mut state, s, now),
            Statement::Update(s) => update(&mut state, s, now),
            Statement::Select(s) => run_select(&state, s, now).map(|t| t.rows.len() as u64),
        }
    }
}

fn lookup<'s>(state: &'s State, table: &TableRef) -> Result<&'s MemTable, WarehouseError> {
    state
        .tables
        .get(&table_key(table))
        .ok_or_else(|| WarehouseError::MissingTable(table_key(table)))
}

fn create_schema(state: &mut State, stmt: &CreateSchema) -> Result<u64, WarehouseError> {
    if !state.schemas.insert(stmt.name.clone()) && !stmt.if_not_exists {
        return Err(WarehouseError::Rejected(format!(
            "schema {} already exists",
            stmt.name
        )));
    }
    Ok(0)
}

fn require_schema(state: &State, table: &TableRef) -> Result<(), WarehouseError> {
    let schema = schema_key(table);
    if state.schemas.contains(&schema) {
        Ok(())
    } else {
        Err(WarehouseError::Rejected(format!("schema {schema} does not exist")))
    }
}

fn create_table(state: &mut State, stmt: &CreateTable) -> Result<u64, WarehouseError> {
    require_schema(state, &stmt.table)?;
    let key = table_key(&stmt.table);
    if state.tables.contains_key(&key) {
        return if stmt.if_not_exists {
            Ok(0)
        } else {
            Err(WarehouseError::TableExists(key))
        };
    }
    state.tables.insert(
        key,
        MemTable {
            columns: stmt.columns.clone(),
            rows: Vec::new(),
        },
    );
    Ok(0)
}

fn create_table_as(
    state: &mut State,
    stmt: &CreateTableAs,
    now: DateTime<Utc>,
) -> Result<u64, WarehouseError> {
    require_schema(state, &stmt.table)?;
    let key = table_key(&stmt.table);
    if state.tables.contains_key(&key) {
        return Err(WarehouseError::TableExists(key));
    }
    let table = run_select(state, &stmt.query, now)?;
    let rows = table.rows.len() as u64;
    state.tables.insert(key, table);
    Ok(rows)
}

fn drop_table(state: &mut State, stmt: &DropTable) -> Result<u64, WarehouseError> {
    let key = table_key(&stmt.table);
    if state.tables.remove(&key).is_none() && !stmt.if_exists {
        return Err(WarehouseError::MissingTable(key));
    }
    Ok(0)
}

fn alter_table(state: &mut State, stmt: &AlterTable) -> Result<u64, WarehouseError> {
    let key = table_key(&stmt.table);
    let column_name = match &stmt.action {
        AlterAction::AddColumn(column) => column.name.clone(),
        AlterAction::AlterColumnType { column, .. } => column.clone(),
    };
    if state.rejected_columns.contains(&column_name) {
        return Err(WarehouseError::Column {
            table: key,
            column: column_name,
            message: "alteration rejected".into(),
        });
    }

    let table = state
        .tables
        .get_mut(&key)
        .ok_or_else(|| WarehouseError::MissingTable(key.clone()))?;
    let column_error = |message: String| WarehouseError::Column {
        table: key.clone(),
        column: column_name.clone(),
        message,
    };

    match &stmt.action {
        AlterAction::AddColumn(column) => {
            if table.column_index(&column.name).is_some() {
                return Err(column_error("column already exists".into()));
            }
            table.columns.push(column.clone());
            for row in &mut table.rows {
                row.push(Value::Null);
            }
        }
        AlterAction::AlterColumnType { column, data_type } => {
            let idx = table
                .column_index(column)
                .ok_or_else(|| column_error("no such column".into()))?;
            let current = table.columns[idx].column_type.clone();
            if current == *data_type {
                return Ok(0);
            }
            if !current.can_promote_to(data_type) {
                return Err(column_error(format!(
                    "cannot change type from {current} to {data_type}"
                )));
            }
            let mut converted = Vec::with_capacity(table.rows.len());
            for row in &table.rows {
                converted.push(row[idx].coerce(data_type).ok_or_else(|| {
                    column_error(format!("value {:?} does not fit {data_type}", row[idx]))
                })?);
            }
            for (row, value) in table.rows.iter_mut().zip(converted) {
                row[idx] = value;
            }
            table.columns[idx].column_type = data_type.clone();
        }
    }
    Ok(0)
}

fn insert(state: &mut State, stmt: &Insert, now: DateTime<Utc>) -> Result<u64, WarehouseError> {
    let source_rows: Vec<Vec<Value>> = match &stmt.source {
        InsertSource::Values(rows) => rows
            .iter()
            .map(|row| row.iter().map(|e| eval(e, &[], now)).collect())
            .collect::<Result<_, _>>()?,
        InsertSource::Select(select) => run_select(state, select, now)?.rows,
    };

    let key = table_key(&stmt.table);
    let table = state
        .tables
        .get_mut(&key)
        .ok_or_else(|| WarehouseError::MissingTable(key.clone()))?;

    let targets = stmt
        .columns
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| WarehouseError::Column {
                table: key.clone(),
                column: name.clone(),
                message: "no such column".into(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut prepared = Vec::with_capacity(source_rows.len());
    for source in source_rows {
        if source.len() != targets.len() {
            return Err(WarehouseError::Rejected(format!(
                "INSERT has {} target columns but {} values",
                targets.len(),
                source.len()
            )));
        }
        let mut row = vec![Value::Null; table.columns.len()];
        for (&idx, value) in targets.iter().zip(source) {
            row[idx] = store_as(&table.columns[idx], value, &key)?;
        }
        prepared.push(row);
    }

    let inserted = prepared.len() as u64;
    table.rows.extend(prepared);
    Ok(inserted)
}

fn update(state: &mut State, stmt: &Update, now: DateTime<Utc>) -> Result<u64, WarehouseError> {
    let key = table_key(&stmt.table);
    let changes = {
        let target = lookup(state, &stmt.table)?;
        let alias = stmt.alias.as_deref().unwrap_or(&stmt.table.name);
        let from = match &stmt.from {
            Some(from) => Some((
                from.alias.as_deref().unwrap_or(&from.table.name),
                lookup(state, &from.table)?,
            )),
            None => None,
        };

        let assignment_targets = stmt
            .assignments
            .iter()
            .map(|a| {
                target.column_index(&a.column).ok_or_else(|| WarehouseError::Column {
                    table: key.clone(),
                    column: a.column.clone(),
                    message: "no such column".into(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut changes = Vec::new();
        for (i, row) in target.rows.iter().enumerate() {
            let target_binding = Binding {
                alias,
                columns: &target.columns,
                row: Some(row.as_slice()),
            };
            let scope = match from {
                None => {
                    let scope = vec![target_binding];
                    if !matches_filter(stmt.where_clause.as_ref(), &scope, now)? {
                        continue;
                    }
                    scope
                }
                Some((from_alias, from_table)) => {
                    let mut matched = None;
                    for source in &from_table.rows {
                        let scope = vec![
                            target_binding.clone(),
                            Binding {
                                alias: from_alias,
                                columns: &from_table.columns,
                                row: Some(source.as_slice()),
                            },
                        ];
                        if matches_filter(stmt.where_clause.as_ref(), &scope, now)? {
                            matched = Some(scope);
                            break;
                        }
                    }
                    match matched {
                        Some(scope) => scope,
                        None => continue,
                    }
                }
            };

            let mut values = Vec::with_capacity(stmt.assignments.len());
            for (assignment, &idx) in stmt.assignments.iter().zip(&assignment_targets) {
                let value = eval(&assignment.value, &scope, now)?;
                values.push((idx, store_as(&target.columns[idx], value, &key)?));
            }
            changes.push((i, values));
        }
        changes
    };

    let table = state
        .tables
        .get_mut(&key)
        .ok_or_else(|| WarehouseError::MissingTable(key.clone()))?;
    let updated = changes.len() as u64;
    for (i, values) in changes {
        for (idx, value) in values {
            table.rows[i][idx] = value;
        }
    }
    Ok(updated)
}

fn store_as(column: &SchemaColumn, value: Value, table: &str) -> Result<Value, WarehouseError> {
    value
        .coerce(&column.column_type)
        .ok_or_else(|| WarehouseError::Column {
            table: table.to_string(),
            column: column.name.clone(),
            message: format!("value {value:?} does not fit {}", column.column_type),
        })
}

#[derive(Clone)]
struct Binding<'a> {
    alias: &'a str,
    columns: &'a [SchemaColumn],
    /// `None` for the null-extended side of a left join.
    row: Option<&'a [Value]>,
}

impl<'a> Binding<'a> {
    fn get(&self, column: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|c| c.name == column)?;
        Some(
            self.row
                .map(|row| row[idx].clone())
                .unwrap_or(Value::Null),
        )
    }
}

fn resolve(ident: &Ident, scope: &[Binding]) -> Result<Value, WarehouseError> {
    let found = match &ident.qualifier {
        Some(q) => scope
            .iter()
            .find(|b| b.alias == q.as_str())
            .and_then(|b| b.get(&ident.name)),
        None => scope.iter().find_map(|b| b.get(&ident.name)),
    };
    found.ok_or_else(|| {
        WarehouseError::Rejected(format!(
            "unrecognized name {}{}",
            ident
                .qualifier
                .as_ref()
                .map(|q| format!("{q}."))
                .unwrap_or_default(),
            ident.name
        ))
    })
}

fn eval(expr: &Expr, scope: &[Binding], now: DateTime<Utc>) -> Result<Value, WarehouseError> {
    Ok(match expr {
        Expr::Identifier(ident) => resolve(ident, scope)?,
        Expr::Value(v) | Expr::Literal(v) => v.clone(),
        Expr::BinaryOp(op) => {
            let left = eval(&op.left, scope, now)?;
            let right = eval(&op.right, scope, now)?;
            match op.op {
                BinaryOperator::Eq => bool_or_null(sql_equals(&left, &right)),
                BinaryOperator::NotEq => bool_or_null(sql_equals(&left, &right).map(|b| !b)),
                BinaryOperator::IsDistinctFrom => Value::Bool(match (left.is_null(), right.is_null()) {
                    (true, true) => false,
                    (true, false) | (false, true) => true,
                    (false, false) => !loosely_equal(&left, &right),
                }),
                BinaryOperator::And => bool_or_null(match (truth(&left), truth(&right)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }),
                BinaryOperator::Or => bool_or_null(match (truth(&left), truth(&right)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }),
            }
        }
        Expr::IsNull { expr, negated } => Value::Bool(eval(expr, scope, now)?.is_null() != *negated),
        Expr::TextCast(inner) => match eval(inner, scope, now)?.to_text() {
            Some(text) => Value::String(text),
            None => Value::Null,
        },
        Expr::Cast { expr, data_type } => {
            let value = eval(expr, scope, now)?;
            value.coerce(data_type).ok_or_else(|| {
                WarehouseError::Rejected(format!("cannot cast {value:?} to {data_type}"))
            })?
        }
        Expr::SafeCast { expr, data_type } => eval(expr, scope, now)?
            .coerce(data_type)
            .unwrap_or(Value::Null),
        Expr::CurrentTimestamp => Value::Timestamp(now),
        Expr::Alias { expr, .. } => eval(expr, scope, now)?,
        Expr::Wildcard { .. } => {
            return Err(WarehouseError::Unsupported("wildcard outside projection".into()))
        }
    })
}

fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn bool_or_null(value: Option<bool>) -> Value {
    value.map(Value::Bool).unwrap_or(Value::Null)
}

fn sql_equals(left: &Value, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        None
    } else {
        Some(loosely_equal(left, right))
    }
}

fn is_numeric(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Numeric(_))
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
        _ if is_numeric(left) && is_numeric(right) => left.as_f64() == right.as_f64(),
        _ => left.to_text() == right.to_text(),
    }
}

fn matches_filter(
    filter: Option<&Expr>,
    scope: &[Binding],
    now: DateTime<Utc>,
) -> Result<bool, WarehouseError> {
    match filter {
        None => Ok(true),
        Some(expr) => Ok(truth(&eval(expr, scope, now)?) == Some(true)),
    }
}

fn run_select(state: &State, select: &Select, now: DateTime<Utc>) -> Result<MemTable, WarehouseError> {
    let from = select
        .from
        .as_ref()
        .ok_or_else(|| WarehouseError::Unsupported("SELECT without FROM".into()))?;

    let mut sources: Vec<(&str, &MemTable)> = vec![(
        from.alias.as_deref().unwrap_or(&from.table.name),
        lookup(state, &from.table)?,
    )];
    let mut tuples: Vec<Vec<Option<usize>>> =
        (0..sources[0].1.rows.len()).map(|i| vec![Some(i)]).collect();

    for join in &select.joins {
        let joined = lookup(state, &join.table)?;
        sources.push((join.alias.as_deref().unwrap_or(&join.table.name), joined));

        let mut next = Vec::new();
        for tuple in tuples {
            let mut matched = false;
            for j in 0..joined.rows.len() {
                let mut candidate = tuple.clone();
                candidate.push(Some(j));
                if matches_filter(Some(&join.on), &bindings(&sources, &candidate), now)? {
                    next.push(candidate);
                    matched = true;
                }
            }
            if !matched && join.kind == JoinKind::Left {
                let mut extended = tuple;
                extended.push(None);
                next.push(extended);
            }
        }
        tuples = next;
    }

    let projection = project(&select.columns, &sources)?;
    let mut out = MemTable {
        columns: projection
            .iter()
            .map(|(name, ty, _)| SchemaColumn::new(name.clone(), ty.clone()))
            .collect(),
        rows: Vec::new(),
    };

    for tuple in &tuples {
        let scope = bindings(&sources, tuple);
        if !matches_filter(select.where_clause.as_ref(), &scope, now)? {
            continue;
        }
        let row = projection
            .iter()
            .map(|(_, _, expr)| eval(expr, &scope, now))
            .collect::<Result<Vec<_>, _>>()?;
        out.rows.push(row);
    }
    Ok(out)
}

fn bindings<'a>(sources: &[(&'a str, &'a MemTable)], tuple: &[Option<usize>]) -> Vec<Binding<'a>> {
    sources
        .iter()
        .zip(tuple)
        .map(|(&(alias, table), idx)| Binding {
            alias,
            columns: &table.columns,
            row: idx.map(|i| table.rows[i].as_slice()),
        })
        .collect()
}

/// Output columns as `(name, type, expression)`, with wildcards expanded.
fn project(
    columns: &[Expr],
    sources: &[(&str, &MemTable)],
) -> Result<Vec<(String, ColumnType, Expr)>, WarehouseError> {
    let mut out = Vec::new();
    for expr in columns {
        match expr {
            Expr::Wildcard { qualifier } => {
                for (alias, table) in sources {
                    if qualifier.as_deref().is_some_and(|q| q != *alias) {
                        continue;
                    }
                    for column in &table.columns {
                        out.push((
                            column.name.clone(),
                            column.column_type.clone(),
                            Expr::Identifier(Ident {
                                qualifier: Some(alias.to_string()),
                                name: column.name.clone(),
                            }),
                        ));
                    }
                }
            }
            Expr::Alias { expr: inner, alias } => {
                out.push((alias.clone(), infer_type(inner, sources), (**inner).clone()));
            }
            Expr::Identifier(ident) => {
                out.push((ident.name.clone(), infer_type(expr, sources), expr.clone()));
            }
            other => out.push(("?column?".into(), infer_type(other, sources), other.clone())),
        }
    }
    Ok(out)
}

fn infer_type(expr: &Expr, sources: &[(&str, &MemTable)]) -> ColumnType {
    match expr {
        Expr::Identifier(ident) => sources
            .iter()
            .filter(|(alias, _)| ident.qualifier.as_deref().map_or(true, |q| q == *alias))
            .find_map(|(_, table)| {
                table
                    .columns
                    .iter()
                    .find(|c| c.name == ident.name)
                    .map(|c| c.column_type.clone())
            })
            .unwrap_or(ColumnType::String),
        Expr::Value(v) | Expr::Literal(v) => match v {
            Value::Bool(_) => ColumnType::Bool,
            Value::Int(_) => ColumnType::Int64,
            Value::Numeric(_) => ColumnType::Numeric,
            Value::Float(_) => ColumnType::Float64,
            Value::Timestamp(_) => ColumnType::Timestamp,
            Value::String(_) | Value::Null => ColumnType::String,
        },
        Expr::Cast { data_type, .. } | Expr::SafeCast { data_type, .. } => data_type.clone(),
        Expr::CurrentTimestamp => ColumnType::Timestamp,
        Expr::BinaryOp(_) | Expr::IsNull { .. } => ColumnType::Bool,
        Expr::Alias { expr, .. } => infer_type(expr, sources),
        Expr::TextCast(_) | Expr::Wildcard { .. } => ColumnType::String,
    }
}
