//! Core domain model for wsync: values, column types, staged records and audit columns.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

pub const CRATE_NAME: &str = "wsync-core";

/// Fully qualified warehouse table identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    #[serde(default)]
    pub project: Option<String>,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(project: Option<&str>, dataset: &str, table: &str) -> Self {
        Self {
            project: project.map(str::to_string),
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    /// Sibling table in the same dataset, e.g. `tmp__players__update`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: format!("{}{}", self.table, suffix),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.project {
            Some(project) => write!(f, "{}.{}.{}", project, self.dataset, self.table),
            None => write!(f, "{}.{}", self.dataset, self.table),
        }
    }
}

/// Declared column type, named after the warehouse's canonical type names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int64,
    Numeric,
    Float64,
    String,
    Timestamp,
    Other(String),
}

impl ColumnType {
    pub fn name(&self) -> &str {
        match self {
            ColumnType::Bool => "BOOL",
            ColumnType::Int64 => "INT64",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Float64 => "FLOAT64",
            ColumnType::String => "STRING",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Other(name) => name,
        }
    }

    /// Parses canonical names as well as the names Postgres reports in
    /// `information_schema.columns.data_type`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => ColumnType::Bool,
            "int64" | "int" | "integer" | "bigint" | "smallint" => ColumnType::Int64,
            "numeric" | "decimal" | "bignumeric" => ColumnType::Numeric,
            "float64" | "float" | "double precision" | "real" => ColumnType::Float64,
            "string" | "text" | "character varying" | "varchar" => ColumnType::String,
            "timestamp" | "timestamp with time zone" | "timestamp without time zone"
            | "timestamptz" => ColumnType::Timestamp,
            _ => ColumnType::Other(name.trim().to_string()),
        }
    }

    /// Type observed for one JSON value; `None` for null.
    pub fn of_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(_) => Some(ColumnType::Bool),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Int64),
            JsonValue::Number(_) => Some(ColumnType::Float64),
            JsonValue::String(_) | JsonValue::Array(_) | JsonValue::Object(_) => {
                Some(ColumnType::String)
            }
        }
    }

    /// Lossless widening: `INT64 -> NUMERIC -> FLOAT64` and `INT64 -> FLOAT64`.
    pub fn can_promote_to(&self, wider: &ColumnType) -> bool {
        matches!(
            (self, wider),
            (ColumnType::Int64, ColumnType::Numeric)
                | (ColumnType::Int64, ColumnType::Float64)
                | (ColumnType::Numeric, ColumnType::Float64)
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ColumnType::parse(&name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl SchemaColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A single cell value as exchanged with the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Numeric(String),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Nested arrays and objects become compact JSON text.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            nested => Value::String(nested.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Numeric(v) | Value::String(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Normalized text form used for tolerant comparisons; `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Numeric(n) => Some(normalize_decimal(n)),
            Value::Float(f) => Some(format_float(*f)),
            Value::String(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    /// Converts a value into the representation of `column_type`; `None`
    /// when the value cannot be represented.
    pub fn coerce(&self, column_type: &ColumnType) -> Option<Value> {
        if self.is_null() {
            return Some(Value::Null);
        }
        match column_type {
            ColumnType::String | ColumnType::Other(_) => self.to_text().map(Value::String),
            ColumnType::Bool => match self {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) => s.trim().parse().ok().map(Value::Bool),
                _ => None,
            },
            ColumnType::Int64 => match self {
                Value::Int(i) => Some(Value::Int(*i)),
                Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    Some(Value::Int(*f as i64))
                }
                Value::String(s) | Value::Numeric(s) => s.trim().parse().ok().map(Value::Int),
                _ => None,
            },
            ColumnType::Float64 => self.as_f64().map(Value::Float),
            ColumnType::Numeric => match self {
                Value::Int(_) | Value::Float(_) | Value::Numeric(_) => {
                    self.to_text().map(Value::Numeric)
                }
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .map(|_| Value::Numeric(s.trim().to_string())),
                _ => None,
            },
            ColumnType::Timestamp => match self {
                Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),
                _ => None,
            },
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1.0e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

fn normalize_decimal(text: &str) -> String {
    let text = text.trim();
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// The seven bookkeeping columns every target table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditColumn {
    ActiveFlag,
    RecordType,
    StartDatetime,
    EndDatetime,
    InsertDatetime,
    UpdateDatetime,
    DeleteDatetime,
}

impl AuditColumn {
    pub const ALL: [AuditColumn; 7] = [
        AuditColumn::ActiveFlag,
        AuditColumn::RecordType,
        AuditColumn::StartDatetime,
        AuditColumn::EndDatetime,
        AuditColumn::InsertDatetime,
        AuditColumn::UpdateDatetime,
        AuditColumn::DeleteDatetime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AuditColumn::ActiveFlag => "audit_column__active_flag",
            AuditColumn::RecordType => "audit_column__record_type",
            AuditColumn::StartDatetime => "audit_column__start_datetime_utc",
            AuditColumn::EndDatetime => "audit_column__end_datetime_utc",
            AuditColumn::InsertDatetime => "audit_column__insert_datetime_utc",
            AuditColumn::UpdateDatetime => "audit_column__update_datetime_utc",
            AuditColumn::DeleteDatetime => "audit_column__delete_datetime_utc",
        }
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            AuditColumn::ActiveFlag => ColumnType::Bool,
            AuditColumn::RecordType => ColumnType::String,
            _ => ColumnType::Timestamp,
        }
    }

    pub fn is_audit(column: &str) -> bool {
        Self::ALL.iter().any(|c| c.name() == column)
    }

    pub fn schema() -> Vec<SchemaColumn> {
        Self::ALL
            .iter()
            .map(|c| SchemaColumn::new(c.name(), c.column_type()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Insert,
    Update,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::Insert => "insert",
            RecordType::Update => "update",
        }
    }
}

/// Identity of one run, used to namespace staging blobs and log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn run_date_stamp(&self) -> String {
        self.started_at.format("%Y%m%d").to_string()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque handle for one unit of extraction work plus whatever the lister
/// already knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    pub handle: String,
    #[serde(default)]
    pub metadata: JsonMap<String, JsonValue>,
}

impl ExtractionUnit {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            metadata: JsonMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: JsonValue) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Field set derived from one successfully extracted unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagedRecord {
    pub fields: JsonMap<String, JsonValue>,
}

impl StagedRecord {
    /// Unit metadata first, then extractor output on top. A null extractor
    /// value never replaces a present metadata value.
    pub fn from_unit(unit: &ExtractionUnit, extracted: JsonMap<String, JsonValue>) -> Self {
        let mut fields = unit.metadata.clone();
        for (name, value) in extracted {
            let keep_existing = value.is_null()
                && fields.get(&name).map(|v| !v.is_null()).unwrap_or(false);
            if !keep_existing {
                fields.insert(name, value);
            }
        }
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.fields.get(column)
    }

    /// Normalized unique-key tuple; `None` when any key column is missing or null.
    pub fn key(&self, key_columns: &[String]) -> Option<Vec<String>> {
        key_columns
            .iter()
            .map(|column| {
                self.fields
                    .get(column)
                    .and_then(|v| Value::from_json(v).to_text())
            })
            .collect()
    }

    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

/// Column type disagreement between batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConflict {
    pub column: String,
    pub registered: ColumnType,
    pub observed: ColumnType,
}

/// Per-run registry of column types accumulated across batches.
///
/// `observe` is the only mutation: the first observed type wins until a
/// later batch disagrees, at which point the column becomes `STRING`.
#[derive(Debug, Clone, Default)]
pub struct ColumnTypeRegistry {
    columns: Vec<SchemaColumn>,
    index: HashMap<String, usize>,
}

impl ColumnTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, column: &str, observed: ColumnType) -> Option<TypeConflict> {
        match self.index.get(column) {
            None => {
                self.index.insert(column.to_string(), self.columns.len());
                self.columns.push(SchemaColumn::new(column, observed));
                None
            }
            Some(&pos) => {
                let registered = &mut self.columns[pos].column_type;
                if *registered == observed {
                    return None;
                }
                let conflict = TypeConflict {
                    column: column.to_string(),
                    registered: registered.clone(),
                    observed,
                };
                *registered = ColumnType::String;
                Some(conflict)
            }
        }
    }

    /// Observes every column of one batch and returns the conflicts raised.
    pub fn observe_batch(&mut self, records: &[StagedRecord]) -> Vec<TypeConflict> {
        batch_column_types(records)
            .into_iter()
            .filter_map(|(column, observed)| self.observe(&column, observed))
            .collect()
    }

    pub fn get(&self, column: &str) -> Option<&ColumnType> {
        self.index.get(column).map(|&pos| &self.columns[pos].column_type)
    }

    pub fn schema(&self) -> &[SchemaColumn] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Single type per column for one batch, in first-seen column order.
/// `INT64` mixed with `FLOAT64` reads as `FLOAT64`; any other mix reads as
/// `STRING`. Columns that are null throughout are omitted.
pub fn batch_column_types(records: &[StagedRecord]) -> Vec<(String, ColumnType)> {
    let mut order: Vec<String> = Vec::new();
    let mut types: HashMap<String, ColumnType> = HashMap::new();

    for record in records {
        for (column, value) in &record.fields {
            let Some(observed) = ColumnType::of_json(value) else {
                continue;
            };
            match types.get_mut(column) {
                None => {
                    order.push(column.clone());
                    types.insert(column.clone(), observed);
                }
                Some(existing) if *existing == observed => {}
                Some(existing) => {
                    *existing = match (&*existing, &observed) {
                        (ColumnType::Int64, ColumnType::Float64)
                        | (ColumnType::Float64, ColumnType::Int64) => ColumnType::Float64,
                        _ => ColumnType::String,
                    };
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|column| types.remove(&column).map(|t| (column, t)))
        .collect()
}
