//! Extractor contracts, the resilient extraction loop and config-driven extractors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;
use wsync_core::ExtractionUnit;
use wsync_storage::{FetchError, HttpFetcher};

pub mod listing;
pub mod resilient;
pub mod selector;

pub use listing::{lister_for_config, UnitLister, UnitSourceConfig};
pub use resilient::{Extraction, ResilientExtractor};
pub use selector::{FieldRule, FieldSource, SelectorExtractor};

pub const CRATE_NAME: &str = "wsync-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractContext {
    pub run_id: Uuid,
}

/// Raw content fetched for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unit {handle} has no {field} to fetch")]
    MissingUrl { handle: String, field: String },
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("invalid pattern for variable {var}: {source}")]
    InvalidPattern {
        var: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown field {0}")]
    UnknownField(String),
    #[error("field {field}: {message}")]
    Field { field: String, message: String },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Fetches a unit and derives a fixed, named set of output fields from it.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    fn fields(&self) -> &[String];

    async fn fetch(&self, ctx: &ExtractContext, unit: &ExtractionUnit) -> Result<Page, ExtractError>;

    /// `Ok(None)` when the page simply does not carry the field.
    fn extract_field(&self, field: &str, page: &Page) -> Result<Option<JsonValue>, ExtractError>;
}

/// Extractor reference as written in a pipeline's control record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractorConfig {
    Selector {
        #[serde(default = "default_url_field")]
        url_field: String,
        fields: Vec<FieldRule>,
    },
}

fn default_url_field() -> String {
    "url".to_string()
}

impl ExtractorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractorConfig::Selector { .. } => "selector",
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        match self {
            ExtractorConfig::Selector { fields, .. } => {
                fields.iter().map(|rule| rule.name.clone()).collect()
            }
        }
    }
}

pub fn extractor_for_config(
    config: &ExtractorConfig,
    fetcher: Arc<HttpFetcher>,
) -> Result<Arc<dyn Extractor>, ExtractError> {
    match config {
        ExtractorConfig::Selector { url_field, fields } => Ok(Arc::new(SelectorExtractor::new(
            fetcher,
            url_field.clone(),
            fields.clone(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsync_storage::HttpClientConfig;

    #[test]
    fn extractor_config_parses_tagged_yaml_shape() {
        let config: ExtractorConfig = serde_json::from_value(serde_json::json!({
            "kind": "selector",
            "fields": [
                {"name": "fullname", "from": "js_var", "var": "fullname"},
                {"name": "title", "from": "css", "selector": "h1"},
                {"name": "links", "from": "css", "selector": "a", "attr": "href", "all": true}
            ]
        }))
        .expect("config");

        assert_eq!(config.kind(), "selector");
        assert_eq!(config.field_names(), vec!["fullname", "title", "links"]);
        let ExtractorConfig::Selector { url_field, .. } = &config;
        assert_eq!(url_field, "url");
    }

    #[test]
    fn registry_rejects_invalid_selectors() {
        let config: ExtractorConfig = serde_json::from_value(serde_json::json!({
            "kind": "selector",
            "fields": [{"name": "bad", "from": "css", "selector": "<<"}]
        }))
        .expect("config");
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"));
        assert!(matches!(
            extractor_for_config(&config, fetcher),
            Err(ExtractError::InvalidSelector { .. })
        ));
    }
}
