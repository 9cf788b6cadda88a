//! Unit listers: where a pipeline's extraction units come from.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::info;
use wsync_core::ExtractionUnit;

use crate::AdapterError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitSourceConfig {
    /// Units written directly in the control record.
    Inline {
        units: Vec<JsonMap<String, JsonValue>>,
        #[serde(default = "default_handle_field")]
        handle_field: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    /// One JSON object per line.
    NdjsonFile {
        path: PathBuf,
        #[serde(default = "default_handle_field")]
        handle_field: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

fn default_handle_field() -> String {
    "url".to_string()
}

impl UnitSourceConfig {
    /// Anchors a relative file path at `base` (the control file's directory).
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if let UnitSourceConfig::NdjsonFile { path, .. } = self {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[async_trait]
pub trait UnitLister: Send + Sync {
    /// Ordered unit list for one run.
    async fn list_units(&self) -> Result<Vec<ExtractionUnit>, AdapterError>;
}

pub struct InlineLister {
    units: Vec<JsonMap<String, JsonValue>>,
    handle_field: String,
    limit: Option<usize>,
}

#[async_trait]
impl UnitLister for InlineLister {
    async fn list_units(&self) -> Result<Vec<ExtractionUnit>, AdapterError> {
        let units = self
            .units
            .iter()
            .enumerate()
            .map(|(i, map)| unit_from_map(map.clone(), &self.handle_field, i))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(truncate(units, self.limit))
    }
}

pub struct NdjsonFileLister {
    path: PathBuf,
    handle_field: String,
    limit: Option<usize>,
}

#[async_trait]
impl UnitLister for NdjsonFileLister {
    async fn list_units(&self) -> Result<Vec<ExtractionUnit>, AdapterError> {
        let data = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;

        let mut units = Vec::new();
        for (line_no, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if self.limit.is_some_and(|limit| units.len() >= limit) {
                break;
            }
            let map: JsonMap<String, JsonValue> = serde_json::from_str(line)
                .with_context(|| format!("parsing {} line {}", self.path.display(), line_no + 1))?;
            units.push(unit_from_map(map, &self.handle_field, line_no)?);
        }

        info!(path = %self.path.display(), units = units.len(), "listed units");
        Ok(units)
    }
}

pub fn lister_for_config(config: &UnitSourceConfig) -> Box<dyn UnitLister> {
    match config {
        UnitSourceConfig::Inline {
            units,
            handle_field,
            limit,
        } => Box::new(InlineLister {
            units: units.clone(),
            handle_field: handle_field.clone(),
            limit: *limit,
        }),
        UnitSourceConfig::NdjsonFile {
            path,
            handle_field,
            limit,
        } => Box::new(NdjsonFileLister {
            path: path.clone(),
            handle_field: handle_field.clone(),
            limit: *limit,
        }),
    }
}

fn unit_from_map(
    map: JsonMap<String, JsonValue>,
    handle_field: &str,
    position: usize,
) -> Result<ExtractionUnit, AdapterError> {
    let handle = match map.get(handle_field) {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(JsonValue::Number(n)) => n.to_string(),
        _ => {
            return Err(AdapterError::Message(format!(
                "unit {position} has no {handle_field:?} value"
            )))
        }
    };
    Ok(ExtractionUnit {
        handle,
        metadata: map,
    })
}

fn truncate(mut units: Vec<ExtractionUnit>, limit: Option<usize>) -> Vec<ExtractionUnit> {
    if let Some(limit) = limit {
        units.truncate(limit);
    }
    units
}
