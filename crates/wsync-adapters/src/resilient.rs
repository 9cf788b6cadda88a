use std::sync::Arc;

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, error, warn};
use wsync_core::ExtractionUnit;
use wsync_storage::{BackoffPolicy, Delay, TokioDelay};

use crate::{ExtractContext, Extractor};

/// Outcome of extracting one unit. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Every attempt failed or yielded no field at all.
    Empty,
    /// At least one field was derived; absent fields are simply missing.
    Fields(JsonMap<String, JsonValue>),
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        matches!(self, Extraction::Empty)
    }

    pub fn into_fields(self) -> Option<JsonMap<String, JsonValue>> {
        match self {
            Extraction::Empty => None,
            Extraction::Fields(fields) => Some(fields),
        }
    }
}

/// Bounded retry loop around an [`Extractor`].
///
/// Fetch failures and all-absent attempts count against the same attempt
/// budget.
#[derive(Clone)]
pub struct ResilientExtractor {
    inner: Arc<dyn Extractor>,
    policy: BackoffPolicy,
    delay: Arc<dyn Delay>,
}

impl ResilientExtractor {
    pub fn new(inner: Arc<dyn Extractor>, policy: BackoffPolicy) -> Self {
        Self {
            inner,
            policy,
            delay: Arc::new(TokioDelay),
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub async fn extract(&self, ctx: &ExtractContext, unit: &ExtractionUnit) -> Extraction {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 0..max_attempts {
            let attempt_no = attempt + 1;
            match self.attempt(ctx, unit).await {
                Ok(fields) => return Extraction::Fields(fields),
                Err(reason) => {
                    warn!(
                        extractor = self.inner.name(),
                        unit = %unit.handle,
                        attempt = attempt_no,
                        max_attempts,
                        %reason,
                        "extraction attempt failed"
                    );
                }
            }

            if attempt_no < max_attempts {
                self.delay.wait(self.policy.delay_for_attempt(attempt)).await;
            }
        }

        error!(
            extractor = self.inner.name(),
            unit = %unit.handle,
            max_attempts,
            "retries exhausted; returning empty extraction"
        );
        Extraction::Empty
    }

    async fn attempt(
        &self,
        ctx: &ExtractContext,
        unit: &ExtractionUnit,
    ) -> Result<JsonMap<String, JsonValue>, String> {
        let page = self
            .inner
            .fetch(ctx, unit)
            .await
            .map_err(|err| err.to_string())?;

        let mut fields = JsonMap::new();
        let mut missing = Vec::new();
        for field in self.inner.fields() {
            match self.inner.extract_field(field, &page) {
                Ok(Some(value)) if !value.is_null() => {
                    fields.insert(field.clone(), value);
                }
                Ok(_) => missing.push(field.as_str()),
                Err(err) => {
                    debug!(unit = %unit.handle, field = %field, error = %err, "field extraction failed");
                    missing.push(field.as_str());
                }
            }
        }

        if fields.is_empty() {
            return Err(format!("no fields derived; missing {}", missing.join(", ")));
        }
        if !missing.is_empty() {
            debug!(unit = %unit.handle, missing = ?missing, "partial extraction");
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use uuid::Uuid;
    use wsync_storage::FetchError;

    use super::*;
    use crate::{ExtractError, Page};

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Delay for RecordingDelay {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().expect("lock").push(duration);
        }
    }

    /// Script per attempt: `None` fails the fetch, `Some(body)` serves it.
    struct ScriptedExtractor {
        fields: Vec<String>,
        script: Vec<Option<&'static str>>,
        calls: AtomicUsize,
    }

    impl ScriptedExtractor {
        fn new(script: Vec<Option<&'static str>>) -> Self {
            Self {
                fields: vec!["a".into(), "b".into(), "c".into()],
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fields(&self) -> &[String] {
            &self.fields
        }

        async fn fetch(&self, _ctx: &ExtractContext, unit: &ExtractionUnit) -> Result<Page, ExtractError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(call).copied().flatten() {
                Some(body) => Ok(Page {
                    url: unit.handle.clone(),
                    body: body.to_string(),
                }),
                None => Err(ExtractError::Fetch(FetchError::HttpStatus {
                    status: 503,
                    url: unit.handle.clone(),
                })),
            }
        }

        /// Body is a JSON object; field `c` always errors.
        fn extract_field(&self, field: &str, page: &Page) -> Result<Option<JsonValue>, ExtractError> {
            if field == "c" {
                return Err(ExtractError::Field {
                    field: field.into(),
                    message: "boom".into(),
                });
            }
            let doc: JsonValue = serde_json::from_str(&page.body).map_err(|e| ExtractError::Field {
                field: field.into(),
                message: e.to_string(),
            })?;
            Ok(doc.get(field).cloned())
        }
    }

    fn ctx() -> ExtractContext {
        ExtractContext {
            run_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn exhausted_retries_return_empty_after_exact_attempts() {
        let inner = Arc::new(ScriptedExtractor::new(vec![None, Some("{}"), None, Some("{}")]));
        let delay = Arc::new(RecordingDelay::default());
        let extractor = ResilientExtractor::new(
            inner.clone(),
            BackoffPolicy::fixed(3, Duration::from_millis(500)),
        )
        .with_delay(delay.clone());

        let result = extractor.extract(&ctx(), &ExtractionUnit::new("u1")).await;

        assert_eq!(result, Extraction::Empty);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *delay.waits.lock().expect("lock"),
            vec![Duration::from_millis(500), Duration::from_millis(500)]
        );
    }

    #[tokio::test]
    async fn partial_fields_are_success_and_field_errors_are_isolated() {
        let inner = Arc::new(ScriptedExtractor::new(vec![Some(r#"{"a": 1, "b": null}"#)]));
        let extractor = ResilientExtractor::new(inner.clone(), BackoffPolicy::fixed(3, Duration::ZERO))
            .with_delay(Arc::new(RecordingDelay::default()));

        let result = extractor.extract(&ctx(), &ExtractionUnit::new("u1")).await;

        let fields = result.into_fields().expect("fields");
        assert_eq!(fields.get("a"), Some(&json!(1)));
        assert!(!fields.contains_key("b"));
        assert!(!fields.contains_key("c"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let inner = Arc::new(ScriptedExtractor::new(vec![None, Some(r#"{"b": "x"}"#)]));
        let delay = Arc::new(RecordingDelay::default());
        let extractor = ResilientExtractor::new(inner.clone(), BackoffPolicy::fixed(3, Duration::from_secs(1)))
            .with_delay(delay.clone());

        let result = extractor.extract(&ctx(), &ExtractionUnit::new("u1")).await;

        assert_eq!(
            result.into_fields().and_then(|f| f.get("b").cloned()),
            Some(json!("x"))
        );
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(delay.waits.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn zero_attempt_budget_still_tries_once() {
        let inner = Arc::new(ScriptedExtractor::new(vec![None]));
        let extractor = ResilientExtractor::new(inner.clone(), BackoffPolicy::fixed(0, Duration::ZERO))
            .with_delay(Arc::new(RecordingDelay::default()));

        assert!(extractor.extract(&ctx(), &ExtractionUnit::new("u1")).await.is_empty());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
