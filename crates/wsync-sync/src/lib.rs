#![doc = "Sync engine: batch ingestion, schema reconciliation and versioned merge."]

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;
use wsync_adapters::{extractor_for_config, lister_for_config, ResilientExtractor};
use wsync_core::ColumnType;
use wsync_sql::{dialect::Dialect, render, Statement};
use wsync_storage::{HttpFetcher, LocalObjectStore, ObjectStore};

pub mod config;
pub mod coordinator;
pub mod merge;
pub mod reconcile;
pub mod warehouse;

pub use config::{
    ConfigError, ControlStore, PipelineConfig, StagingLocation, SyncConfig, WarehouseKind,
    YamlControlStore,
};
pub use coordinator::{Coordinator, SyncOutcome, SyncRunSummary};
pub use merge::{MergeError, MergeReport};
pub use reconcile::{diff_schemas, ColumnChange, ReconcileReport};
pub use warehouse::{MemoryWarehouse, PgWarehouse, Warehouse, WarehouseError};

pub const CRATE_NAME: &str = "wsync-sync";

pub struct SyncPipeline {
    config: SyncConfig,
    control: Box<dyn ControlStore>,
    http: Arc<HttpFetcher>,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let control = YamlControlStore::load(&config.control_file)
            .with_context(|| format!("loading control file {}", config.control_file.display()))?;
        let http = HttpFetcher::new(config.http_client_config())?;
        let store = LocalObjectStore::new(config.staging_root.clone());
        let warehouse: Arc<dyn Warehouse> = match config.warehouse {
            WarehouseKind::Postgres => Arc::new(
                PgWarehouse::connect_lazy(&config.database_url).context("configuring postgres pool")?,
            ),
            WarehouseKind::Memory => Arc::new(MemoryWarehouse::new()),
        };
        Ok(Self {
            config,
            control: Box::new(control),
            http: Arc::new(http),
            store: Arc::new(store),
            warehouse,
        })
    }

    pub fn with_warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouse = warehouse;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }

    pub fn control(&self) -> &dyn ControlStore {
        self.control.as_ref()
    }

    /// One full run for the pipeline whose target is `target`.
    pub async fn run_target(&self, target: &str) -> Result<SyncRunSummary> {
        let pipeline = self.control.lookup(target)?;
        pipeline.validate()?;

        let units = lister_for_config(&pipeline.units)
            .list_units()
            .await
            .with_context(|| format!("listing units for {}", pipeline.name()))?;
        info!(pipeline = %pipeline.name(), units = units.len(), "listed extraction units");

        let extractor = extractor_for_config(&pipeline.extractor, self.http.clone())
            .with_context(|| format!("building {} extractor", pipeline.extractor.kind()))?;
        let extractor = ResilientExtractor::new(extractor, pipeline.backoff());

        Coordinator::new(self.warehouse.clone(), self.store.clone(), extractor)
            .with_concurrency(self.config.extract_concurrency)
            .run(&pipeline, units)
            .await
    }

    /// Validates every configured pipeline; returns how many there are.
    pub fn validate_all(&self) -> Result<usize> {
        let pipelines = self.control.pipelines();
        for pipeline in pipelines {
            pipeline.validate()?;
            extractor_for_config(&pipeline.extractor, self.http.clone())
                .with_context(|| format!("pipeline {} extractor", pipeline.name()))?;
        }
        Ok(pipelines.len())
    }

    pub fn plan_target(&self, target: &str, dialect: &dyn Dialect) -> Result<Vec<PlannedStatement>> {
        let pipeline = self.control.lookup(target)?;
        pipeline.validate()?;
        plan_pipeline(&pipeline, dialect)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStatement {
    pub step: String,
    pub sql: String,
}

/// Statement templates a run would issue, before any data is seen. Column
/// types are unknown until extraction, so every planned column is shown as
/// a string column.
pub fn plan_pipeline(pipeline: &PipelineConfig, dialect: &dyn Dialect) -> Result<Vec<PlannedStatement>> {
    let mut columns: Vec<String> = pipeline.unique_key.clone();
    for field in pipeline.extractor.field_names() {
        if !columns.contains(&field) {
            columns.push(field);
        }
    }

    let mut planned = Vec::new();
    let mut push = |step: String, statement: &Statement| {
        let (sql, _) = render(statement, dialect);
        planned.push(PlannedStatement { step, sql });
    };

    push(
        "first_load".into(),
        &merge::first_load_statement(&pipeline.temp, &pipeline.target),
    );

    for column in columns.iter().filter(|c| !pipeline.unique_key.contains(c)) {
        let schema_column = wsync_core::SchemaColumn::new(column.as_str(), ColumnType::String);
        for statement in
            reconcile::add_column_statements(&pipeline.temp, &pipeline.target, &schema_column, &pipeline.unique_key)
        {
            push(format!("reconcile_add:{column}"), &statement);
        }
    }

    let merge_columns: Vec<merge::MergeColumn> = columns
        .iter()
        .map(|c| merge::MergeColumn::same_type(c, ColumnType::String))
        .collect();
    let plan = merge::plan_merge(
        &pipeline.temp,
        &pipeline.target,
        &merge_columns,
        &pipeline.unique_key,
        pipeline.recover_orphaned_keys,
    )?;
    push("merge_drop_change_set".into(), &plan.drop_change_set);
    push("merge_build_change_set".into(), &plan.build_change_set);
    push("merge_expire".into(), &plan.expire);
    push("merge_insert_updates".into(), &plan.insert_updates);
    push("merge_insert_new".into(), &plan.insert_new);

    Ok(planned)
}

pub async fn run_sync_once_from_env(target: &str) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let pipeline = SyncPipeline::new(config)?;
    pipeline.run_target(target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsync_sql::dialect::{BigQuery, Postgres};

    fn pipeline() -> PipelineConfig {
        serde_yaml::from_str(
            r#"
target: { project: acme, dataset: sports, table: players }
temp: { project: acme, dataset: scratch, table: tmp_players }
staging: { folder_prefix: staging/players, object_prefix: players }
unique_key: [player_id]
extractor:
  kind: selector
  fields:
    - { name: fullname, from: js_var, var: fullname }
    - { name: currentrank, from: js_var, var: currentrank }
units: { kind: inline, units: [] }
"#,
        )
        .expect("pipeline")
    }

    #[test]
    fn plan_lists_every_step_in_order() {
        let planned = plan_pipeline(&pipeline(), &BigQuery).expect("plan");
        let steps: Vec<&str> = planned.iter().map(|p| p.step.as_str()).collect();
        assert_eq!(
            steps,
            vec![
                "first_load",
                "reconcile_add:fullname",
                "reconcile_add:fullname",
                "reconcile_add:currentrank",
                "reconcile_add:currentrank",
                "merge_drop_change_set",
                "merge_build_change_set",
                "merge_expire",
                "merge_insert_updates",
                "merge_insert_new",
            ]
        );
        assert!(planned[6].sql.contains("SAFE_CAST(`SRC`.`fullname` AS STRING)"));
        assert!(planned[0]
            .sql
            .starts_with("CREATE TABLE `acme.sports.players` AS SELECT `SRC`.*, TRUE AS `audit_column__active_flag`"));
    }

    #[test]
    fn plan_renders_for_postgres() {
        let planned = plan_pipeline(&pipeline(), &Postgres).expect("plan");
        assert!(planned
            .iter()
            .any(|p| p.sql == r#"DROP TABLE IF EXISTS "scratch"."tmp_players__update""#));
    }
}
