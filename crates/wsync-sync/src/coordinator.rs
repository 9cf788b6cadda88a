//! Batch ingestion: extract units batch by batch, stage each batch as an
//! NDJSON blob, load the blobs into the temp table, then create or
//! reconcile-and-merge the target.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use wsync_adapters::{ExtractContext, ResilientExtractor};
use wsync_core::{
    ColumnTypeRegistry, ExtractionUnit, RunContext, SchemaColumn, StagedRecord, TableId, Value,
};
use wsync_storage::ObjectStore;

use crate::config::PipelineConfig;
use crate::merge::{create_target_from_staging, merge, MergeReport, CHANGE_SET_SUFFIX};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::warehouse::Warehouse;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No unit produced a staged record; nothing was loaded.
    NoData,
    /// The target did not exist and was created from staging.
    Created { rows: u64 },
    Merged {
        reconcile: ReconcileReport,
        merge: MergeReport,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub units: usize,
    /// Units whose extraction produced at least one field.
    pub extracted: usize,
    pub staged_records: usize,
    /// Records without a complete unique key, or repeating a staged key.
    pub dropped_records: usize,
    pub batches: usize,
    pub blobs: usize,
    pub type_conflicts: usize,
    pub outcome: SyncOutcome,
}

#[derive(Debug, Default)]
struct StagingStats {
    extracted: usize,
    staged_records: usize,
    dropped_records: usize,
    batches: usize,
    type_conflicts: usize,
}

pub struct Coordinator {
    warehouse: Arc<dyn Warehouse>,
    store: Arc<dyn ObjectStore>,
    extractor: ResilientExtractor,
    concurrency: usize,
}

impl Coordinator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        store: Arc<dyn ObjectStore>,
        extractor: ResilientExtractor,
    ) -> Self {
        Self {
            warehouse,
            store,
            extractor,
            concurrency: 1,
        }
    }

    /// Units extracted concurrently within one batch.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run(&self, pipeline: &PipelineConfig, units: Vec<ExtractionUnit>) -> Result<SyncRunSummary> {
        self.run_with_context(pipeline, units, RunContext::new()).await
    }

    pub async fn run_with_context(
        &self,
        pipeline: &PipelineConfig,
        units: Vec<ExtractionUnit>,
        ctx: RunContext,
    ) -> Result<SyncRunSummary> {
        let span = info_span!("sync_run", run_id = %ctx.run_id, pipeline = %pipeline.name());
        self.run_inner(pipeline, units, ctx).instrument(span).await
    }

    async fn run_inner(
        &self,
        pipeline: &PipelineConfig,
        units: Vec<ExtractionUnit>,
        ctx: RunContext,
    ) -> Result<SyncRunSummary> {
        let run_date = ctx.run_date_stamp();
        let folder = pipeline.staging.run_folder(&run_date);

        let stale = self
            .store
            .delete_prefix(&folder)
            .await
            .with_context(|| format!("clearing stale staging blobs under {folder}"))?;
        if stale > 0 {
            info!(folder = %folder, stale, "removed staging blobs from an earlier run");
        }

        let mut registry = ColumnTypeRegistry::new();
        let stats = self
            .stage_batches(pipeline, &units, &ctx, &run_date, &mut registry)
            .await?;

        let blobs = self
            .store
            .list(&folder)
            .await
            .with_context(|| format!("listing staging blobs under {folder}"))?;

        let outcome = if blobs.is_empty() {
            info!(units = units.len(), "no data staged; nothing to load");
            SyncOutcome::NoData
        } else {
            let applied = self.load_and_apply(pipeline, &blobs, registry.schema()).await;
            let cleared = drop_scratch_tables(self.warehouse.as_ref(), &pipeline.temp).await;
            match (applied, cleared) {
                (Ok(outcome), Ok(())) => outcome,
                (Ok(_), Err(err)) => return Err(err),
                (Err(err), cleared) => {
                    if let Err(cleanup) = cleared {
                        warn!(error = %cleanup, "could not drop scratch tables after a failed load");
                    }
                    return Err(err);
                }
            }
        };

        let summary = SyncRunSummary {
            run_id: ctx.run_id,
            pipeline: pipeline.name(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            units: units.len(),
            extracted: stats.extracted,
            staged_records: stats.staged_records,
            dropped_records: stats.dropped_records,
            batches: stats.batches,
            blobs: blobs.len(),
            type_conflicts: stats.type_conflicts,
            outcome,
        };
        info!(
            units = summary.units,
            staged = summary.staged_records,
            batches = summary.batches,
            "sync run finished"
        );
        Ok(summary)
    }

    /// Extracts and stages every batch in order. Batches run one after the
    /// other; units inside a batch run up to `concurrency` at a time.
    async fn stage_batches(
        &self,
        pipeline: &PipelineConfig,
        units: &[ExtractionUnit],
        ctx: &RunContext,
        run_date: &str,
        registry: &mut ColumnTypeRegistry,
    ) -> Result<StagingStats> {
        let batch_size = pipeline.effective_batch_size(units.len());
        let extract_ctx = ExtractContext { run_id: ctx.run_id };
        let mut seen_keys: HashSet<Vec<String>> = HashSet::new();
        let mut stats = StagingStats::default();

        for (index, chunk) in units.chunks(batch_size).enumerate() {
            let batch_no = index + 1;
            let extractor = &self.extractor;
            let extract_ctx = &extract_ctx;
            let results: Vec<(&ExtractionUnit, _)> = stream::iter(chunk)
                .map(|unit| async move { (unit, extractor.extract(extract_ctx, unit).await) })
                .buffered(self.concurrency)
                .collect()
                .await;

            let mut records = Vec::new();
            for (unit, extraction) in results {
                let Some(fields) = extraction.into_fields() else {
                    continue;
                };
                stats.extracted += 1;
                let record = StagedRecord::from_unit(unit, fields);
                match record.key(&pipeline.unique_key) {
                    None => {
                        warn!(batch = batch_no, unit = %unit.handle, key = ?pipeline.unique_key, "dropping record without a complete unique key");
                        stats.dropped_records += 1;
                    }
                    Some(key) if !seen_keys.insert(key.clone()) => {
                        warn!(batch = batch_no, unit = %unit.handle, key = ?key, "dropping record with an already staged key");
                        stats.dropped_records += 1;
                    }
                    Some(_) => records.push(record),
                }
            }

            if records.is_empty() {
                info!(batch = batch_no, units = chunk.len(), "batch produced no records");
                continue;
            }

            for conflict in registry.observe_batch(&records) {
                warn!(
                    batch = batch_no,
                    column = %conflict.column,
                    registered = %conflict.registered,
                    observed = %conflict.observed,
                    "column type conflict between batches; column widened to STRING"
                );
                stats.type_conflicts += 1;
            }

            let path = pipeline.staging.blob_path(run_date, batch_no);
            let body = encode_ndjson(&records)?;
            let stored = self
                .store
                .put(&path, body.as_bytes())
                .await
                .with_context(|| format!("writing staging blob {path}"))?;
            info!(batch = batch_no, records = records.len(), path = %stored.path, bytes = stored.byte_size, "staged batch");

            stats.staged_records += records.len();
            stats.batches += 1;
        }
        Ok(stats)
    }

    /// Recreates the temp table with the registry schema and fills it from
    /// every blob, in path order.
    async fn load_staging(
        &self,
        pipeline: &PipelineConfig,
        blobs: &[String],
        schema: &[SchemaColumn],
    ) -> Result<u64> {
        let temp = &pipeline.temp;
        self.warehouse
            .ensure_dataset(temp)
            .await
            .with_context(|| format!("creating dataset for {temp}"))?;
        self.warehouse
            .drop_table(temp)
            .await
            .with_context(|| format!("dropping stale temp table {temp}"))?;
        self.warehouse
            .create_table(temp, schema)
            .await
            .with_context(|| format!("creating temp table {temp}"))?;

        let mut rows = Vec::new();
        for blob in blobs {
            let bytes = self
                .store
                .get(blob)
                .await
                .with_context(|| format!("reading staging blob {blob}"))?;
            let text = String::from_utf8(bytes).with_context(|| format!("staging blob {blob} is not UTF-8"))?;
            rows.extend(decode_rows(&text, schema).with_context(|| format!("decoding staging blob {blob}"))?);
        }

        let columns: Vec<String> = schema.iter().map(|c| c.name.clone()).collect();
        self.warehouse
            .insert_rows(temp, &columns, rows)
            .await
            .with_context(|| format!("loading temp table {temp}"))
    }

    async fn load_and_apply(
        &self,
        pipeline: &PipelineConfig,
        blobs: &[String],
        schema: &[SchemaColumn],
    ) -> Result<SyncOutcome> {
        let loaded = self.load_staging(pipeline, blobs, schema).await?;
        info!(table = %pipeline.temp, rows = loaded, blobs = blobs.len(), "loaded staging table");
        self.apply_to_target(pipeline).await
    }

    async fn apply_to_target(&self, pipeline: &PipelineConfig) -> Result<SyncOutcome> {
        let warehouse = self.warehouse.as_ref();
        let (temp, target) = (&pipeline.temp, &pipeline.target);

        let exists = warehouse
            .table_exists(target)
            .await
            .with_context(|| format!("checking whether {target} exists"))?;

        let outcome = if exists {
            let reconcile = reconcile(warehouse, temp, target, &pipeline.unique_key)
                .await
                .with_context(|| format!("reconciling {target} against {temp}"))?;
            if reconcile.has_failures() {
                warn!(
                    target = %target,
                    failed = reconcile.failed.len(),
                    "some columns could not be reconciled; merging the rest"
                );
            }
            let merge = merge(
                warehouse,
                temp,
                target,
                &pipeline.unique_key,
                pipeline.recover_orphaned_keys,
            )
            .await
            .with_context(|| format!("merging {temp} into {target}"))?;
            SyncOutcome::Merged { reconcile, merge }
        } else {
            let rows = create_target_from_staging(warehouse, temp, target)
                .await
                .with_context(|| format!("creating {target} from {temp}"))?;
            SyncOutcome::Created { rows }
        };

        Ok(outcome)
    }
}

/// Drops the temp table and the merge change set, whether or not the load
/// got that far.
async fn drop_scratch_tables(warehouse: &dyn Warehouse, temp: &TableId) -> Result<()> {
    let change_set = temp.with_suffix(CHANGE_SET_SUFFIX);
    warehouse
        .drop_table(&change_set)
        .await
        .with_context(|| format!("dropping change set table {change_set}"))?;
    warehouse
        .drop_table(temp)
        .await
        .with_context(|| format!("dropping temp table {temp}"))
}

fn encode_ndjson(records: &[StagedRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&record.to_ndjson_line().context("serializing staged record")?);
        body.push('\n');
    }
    Ok(body)
}

/// One row per non-empty line; values that do not fit their column's
/// registered type load as null.
fn decode_rows(text: &str, schema: &[SchemaColumn]) -> Result<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: JsonMap<String, JsonValue> =
            serde_json::from_str(line).with_context(|| format!("line {}", line_no + 1))?;
        rows.push(
            schema
                .iter()
                .map(|column| {
                    record
                        .get(&column.name)
                        .map(Value::from_json)
                        .and_then(|v| v.coerce(&column.column_type))
                        .unwrap_or(Value::Null)
                })
                .collect(),
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wsync_core::ColumnType;

    #[test]
    fn staged_lines_decode_into_registry_typed_rows() {
        let schema = vec![
            SchemaColumn::new("id", ColumnType::Int64),
            SchemaColumn::new("rank", ColumnType::String),
            SchemaColumn::new("tags", ColumnType::String),
            SchemaColumn::new("age", ColumnType::Int64),
        ];
        let records = vec![
            StagedRecord {
                fields: json!({"id": 1, "rank": 7, "tags": ["a", "b"]})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            },
            StagedRecord {
                fields: json!({"id": 2, "rank": "n/a", "age": "old"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            },
        ];

        let body = encode_ndjson(&records).expect("encode");
        assert_eq!(body.lines().count(), 2);

        let rows = decode_rows(&body, &schema).expect("decode");
        assert_eq!(
            rows,
            vec![
                vec![
                    Value::Int(1),
                    Value::String("7".into()),
                    Value::String(r#"["a","b"]"#.into()),
                    Value::Null,
                ],
                vec![
                    Value::Int(2),
                    Value::String("n/a".into()),
                    Value::Null,
                    Value::Null,
                ],
            ]
        );
    }
}
