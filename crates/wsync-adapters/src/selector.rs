//! Extractor driven by per-field rules: CSS selectors, inline script
//! variables and JSON pointers.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use wsync_core::ExtractionUnit;
use wsync_storage::HttpFetcher;

use crate::{ExtractContext, ExtractError, Extractor, Page};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(flatten)]
    pub source: FieldSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum FieldSource {
    /// Element text, or an attribute when `attr` is set. `all` collects
    /// every match into an array.
    Css {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
        #[serde(default)]
        all: bool,
    },
    /// Right-hand side of `var <name> = ...;` in an inline script.
    JsVar { var: String },
    /// RFC 6901 pointer into a JSON response body.
    JsonPointer { pointer: String },
}

enum CompiledSource {
    Css {
        selector: Selector,
        attr: Option<String>,
        all: bool,
    },
    JsVar(Regex),
    JsonPointer(String),
}

pub struct SelectorExtractor {
    fetcher: Arc<HttpFetcher>,
    url_field: String,
    names: Vec<String>,
    rules: Vec<CompiledSource>,
}

impl SelectorExtractor {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        url_field: String,
        rules: Vec<FieldRule>,
    ) -> Result<Self, ExtractError> {
        let mut names = Vec::with_capacity(rules.len());
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            compiled.push(compile(&rule.source)?);
            names.push(rule.name);
        }
        Ok(Self {
            fetcher,
            url_field,
            names,
            rules: compiled,
        })
    }

    fn url_for(&self, unit: &ExtractionUnit) -> Result<String, ExtractError> {
        if self.url_field == "handle" {
            return Ok(unit.handle.clone());
        }
        match unit.metadata.get(&self.url_field) {
            Some(JsonValue::String(url)) if !url.trim().is_empty() => Ok(url.trim().to_string()),
            None if self.url_field == "url" && unit.handle.contains("://") => Ok(unit.handle.clone()),
            _ => Err(ExtractError::MissingUrl {
                handle: unit.handle.clone(),
                field: self.url_field.clone(),
            }),
        }
    }
}

fn compile(source: &FieldSource) -> Result<CompiledSource, ExtractError> {
    match source {
        FieldSource::Css {
            selector,
            attr,
            all,
        } => Ok(CompiledSource::Css {
            selector: Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
                selector: selector.clone(),
                message: e.to_string(),
            })?,
            attr: attr.clone(),
            all: *all,
        }),
        FieldSource::JsVar { var } => {
            let pattern = format!(r"(?s)var\s+{}\s*=\s*(.*?);", regex::escape(var));
            Regex::new(&pattern)
                .map(CompiledSource::JsVar)
                .map_err(|source| ExtractError::InvalidPattern {
                    var: var.clone(),
                    source,
                })
        }
        FieldSource::JsonPointer { pointer } => Ok(CompiledSource::JsonPointer(pointer.clone())),
    }
}

#[async_trait]
impl Extractor for SelectorExtractor {
    fn name(&self) -> &str {
        "selector"
    }

    fn fields(&self) -> &[String] {
        &self.names
    }

    async fn fetch(&self, ctx: &ExtractContext, unit: &ExtractionUnit) -> Result<Page, ExtractError> {
        let url = self.url_for(unit)?;
        let response = self.fetcher.fetch_bytes(ctx.run_id, &url).await?;
        Ok(Page {
            url: response.final_url.clone(),
            body: response.text(),
        })
    }

    fn extract_field(&self, field: &str, page: &Page) -> Result<Option<JsonValue>, ExtractError> {
        let idx = self
            .names
            .iter()
            .position(|name| name == field)
            .ok_or_else(|| ExtractError::UnknownField(field.to_string()))?;

        match &self.rules[idx] {
            CompiledSource::Css {
                selector,
                attr,
                all,
            } => {
                let document = Html::parse_document(&page.body);
                let mut values = document.select(selector).filter_map(|node| match attr {
                    Some(attr) => node.value().attr(attr).and_then(|s| text_or_none(s.to_string())),
                    None => text_or_none(node.text().collect::<String>()),
                });
                if *all {
                    let collected: Vec<JsonValue> = values.map(JsonValue::String).collect();
                    Ok((!collected.is_empty()).then_some(JsonValue::Array(collected)))
                } else {
                    Ok(values.next().map(JsonValue::String))
                }
            }
            CompiledSource::JsVar(pattern) => Ok(pattern
                .captures(&page.body)
                .and_then(|caps| caps.get(1))
                .and_then(|m| parse_script_literal(m.as_str()))),
            CompiledSource::JsonPointer(pointer) => {
                let doc: JsonValue =
                    serde_json::from_str(&page.body).map_err(|e| ExtractError::Field {
                        field: field.to_string(),
                        message: e.to_string(),
                    })?;
                Ok(doc.pointer(pointer).cloned().filter(|v| !v.is_null()))
            }
        }
    }
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Script literal to JSON: quoted strings lose their quotes, JSON-shaped
/// values (numbers, booleans, arrays, objects) parse as JSON, anything else
/// stays raw text.
fn parse_script_literal(raw: &str) -> Option<JsonValue> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" || raw == "undefined" {
        return None;
    }
    for quote in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Some(JsonValue::String(raw[1..raw.len() - 1].to_string()));
        }
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Null) => None,
        Ok(value) => Some(value),
        Err(_) => Some(JsonValue::String(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use wsync_storage::HttpClientConfig;

    const PLAYER_PAGE: &str = r#"<html><head><script>
var fullname = 'Ana Example';
var currentrank = 12;
var active = true;
var shortlist = [1, 2,
  3];
var hand = R;
</script></head>
<body><h1> Ana Example </h1><a href="/m/1">m1</a><a href="/m/2">m2</a></body></html>"#;

    fn rules() -> Vec<FieldRule> {
        serde_json::from_value(json!([
            {"name": "fullname", "from": "js_var", "var": "fullname"},
            {"name": "currentrank", "from": "js_var", "var": "currentrank"},
            {"name": "active", "from": "js_var", "var": "active"},
            {"name": "shortlist", "from": "js_var", "var": "shortlist"},
            {"name": "hand", "from": "js_var", "var": "hand"},
            {"name": "twitter", "from": "js_var", "var": "twitter"},
            {"name": "title", "from": "css", "selector": "h1"},
            {"name": "links", "from": "css", "selector": "a", "attr": "href", "all": true}
        ]))
        .expect("rules")
    }

    fn extractor(url_field: &str) -> SelectorExtractor {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"));
        SelectorExtractor::new(fetcher, url_field.to_string(), rules()).expect("extractor")
    }

    #[test]
    fn derives_script_variables_and_css_fields() {
        let ex = extractor("url");
        let page = Page {
            url: "http://x".into(),
            body: PLAYER_PAGE.into(),
        };

        let get = |f: &str| ex.extract_field(f, &page).expect("field");
        assert_eq!(get("fullname"), Some(json!("Ana Example")));
        assert_eq!(get("currentrank"), Some(json!(12)));
        assert_eq!(get("active"), Some(json!(true)));
        assert_eq!(get("shortlist"), Some(json!([1, 2, 3])));
        assert_eq!(get("hand"), Some(json!("R")));
        assert_eq!(get("twitter"), None);
        assert_eq!(get("title"), Some(json!("Ana Example")));
        assert_eq!(get("links"), Some(json!(["/m/1", "/m/2"])));
        assert!(matches!(
            ex.extract_field("nope", &page),
            Err(ExtractError::UnknownField(_))
        ));
    }

    #[test]
    fn json_pointer_rules_read_api_bodies() {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"));
        let rules: Vec<FieldRule> = serde_json::from_value(json!([
            {"name": "rank", "from": "json_pointer", "pointer": "/player/rank"}
        ]))
        .expect("rules");
        let ex = SelectorExtractor::new(fetcher, "url".into(), rules).expect("extractor");
        let page = Page {
            url: "http://x".into(),
            body: r#"{"player": {"rank": 7}}"#.into(),
        };
        assert_eq!(ex.extract_field("rank", &page).expect("rank"), Some(json!(7)));
    }

    #[tokio::test]
    async fn fetches_the_unit_url_from_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/player/ana"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PLAYER_PAGE))
            .mount(&server)
            .await;

        let ex = extractor("player_url");
        let unit = ExtractionUnit::new("ana")
            .with_metadata("player_url", json!(format!("{}/player/ana", server.uri())));
        let ctx = ExtractContext {
            run_id: Uuid::new_v4(),
        };

        let page = ex.fetch(&ctx, &unit).await.expect("page");
        assert!(page.body.contains("var fullname"));

        let missing = ex.fetch(&ctx, &ExtractionUnit::new("bob")).await;
        assert!(matches!(missing, Err(ExtractError::MissingUrl { .. })));
    }
}
