//! Defines the `Dialect` trait for warehouse-specific SQL syntax.

use chrono::SecondsFormat;
use wsync_core::{ColumnType, Value};

use crate::ast::common::TableRef;

pub trait Dialect: Send + Sync {
    /// Wraps a single identifier in the dialect's quotation marks.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - BigQuery uses backticks: `` `my_column` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Placeholder for the zero-based parameter `index`.
    fn get_placeholder(&self, index: usize) -> String;

    fn render_data_type(&self, data_type: &ColumnType) -> String;

    /// Fully qualified table reference.
    fn render_table_ref(&self, table: &TableRef) -> String;

    /// Schema (dataset) reference for `CREATE SCHEMA`.
    fn render_schema_ref(&self, project: Option<&str>, name: &str) -> String;

    /// Cast function that yields null rather than failing.
    fn tolerant_cast(&self) -> &'static str;

    /// Typed cast of an already rendered operand, null where the value does
    /// not convert.
    fn render_safe_cast(&self, operand: &str, data_type: &ColumnType) -> String {
        format!(
            "{}({operand} AS {})",
            self.tolerant_cast(),
            self.render_data_type(data_type)
        )
    }

    fn current_timestamp(&self) -> &'static str;

    fn quote_string(&self, text: &str) -> String;

    fn name(&self) -> String;

    /// Inline SQL text for a constant value.
    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Numeric(v) => format!(
                "CAST({} AS {})",
                self.quote_string(v),
                self.render_data_type(&ColumnType::Numeric)
            ),
            Value::String(v) => self.quote_string(v),
            Value::Timestamp(ts) => format!(
                "TIMESTAMP {}",
                self.quote_string(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn render_data_type(&self, data_type: &ColumnType) -> String {
        match data_type {
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Int64 => "BIGINT".into(),
            ColumnType::Numeric => "NUMERIC".into(),
            ColumnType::Float64 => "DOUBLE PRECISION".into(),
            ColumnType::String => "TEXT".into(),
            ColumnType::Timestamp => "TIMESTAMPTZ".into(),
            ColumnType::Other(name) => name.clone(),
        }
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        // Postgres has no project level; the dataset maps to a schema.
        match &table.dataset {
            Some(dataset) => format!(
                "{}.{}",
                self.quote_identifier(dataset),
                self.quote_identifier(&table.name)
            ),
            None => self.quote_identifier(&table.name),
        }
    }

    fn render_schema_ref(&self, _project: Option<&str>, name: &str) -> String {
        self.quote_identifier(name)
    }

    fn tolerant_cast(&self) -> &'static str {
        "CAST"
    }

    // No SAFE_CAST here: only text that parses as the target type is cast.
    fn render_safe_cast(&self, operand: &str, data_type: &ColumnType) -> String {
        let target = self.render_data_type(data_type);
        let pattern = match data_type {
            ColumnType::Bool => r"^\s*(true|false|t|f|yes|no|y|n|on|off|1|0)\s*$",
            ColumnType::Int64 => r"^\s*[-+]?[0-9]{1,18}\s*$",
            ColumnType::Numeric | ColumnType::Float64 => {
                r"^\s*[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?\s*$"
            }
            ColumnType::Timestamp => {
                r"^\s*[0-9]{4}-[0-9]{2}-[0-9]{2}([ T][0-9]{2}:[0-9]{2}(:[0-9]{2}(\.[0-9]+)?)?)?\s*(Z|[-+][0-9]{2}(:?[0-9]{2})?)?\s*$"
            }
            ColumnType::String | ColumnType::Other(_) => {
                return format!("CAST({operand} AS {target})");
            }
        };
        format!(
            "CASE WHEN CAST({operand} AS TEXT) ~* {} THEN CAST({operand} AS {target}) END",
            self.quote_string(pattern)
        )
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn quote_string(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    fn name(&self) -> String {
        "PostgreSQL".into()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BigQuery;

impl Dialect for BigQuery {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "\\`"))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!("@p{index}")
    }

    fn render_data_type(&self, data_type: &ColumnType) -> String {
        data_type.name().to_string()
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        let path = [table.project.as_deref(), table.dataset.as_deref()]
            .into_iter()
            .flatten()
            .chain(std::iter::once(table.name.as_str()))
            .collect::<Vec<_>>()
            .join(".");
        self.quote_identifier(&path)
    }

    fn render_schema_ref(&self, project: Option<&str>, name: &str) -> String {
        match project {
            Some(project) => self.quote_identifier(&format!("{project}.{name}")),
            None => self.quote_identifier(name),
        }
    }

    fn tolerant_cast(&self) -> &'static str {
        "SAFE_CAST"
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP()"
    }

    fn quote_string(&self, text: &str) -> String {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'"))
    }

    fn name(&self) -> String {
        "BigQuery".into()
    }
}

/// Looks a dialect up by its configuration name.
pub fn dialect_for_name(name: &str) -> Option<Box<dyn Dialect>> {
    match name.to_ascii_lowercase().as_str() {
        "postgres" | "postgresql" => Some(Box::new(Postgres)),
        "bigquery" => Some(Box::new(BigQuery)),
        _ => None,
    }
}
