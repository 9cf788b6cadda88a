use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wsync_sql::dialect::dialect_for_name;
use wsync_sync::{SyncConfig, SyncOutcome, SyncPipeline};

#[derive(Debug, Parser)]
#[command(name = "wsync")]
#[command(about = "Versioned warehouse sync: extract, stage, reconcile, merge")]
struct Cli {
    /// Print the run summary as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one full sync for a target table.
    Sync {
        #[arg(long)]
        target: String,
    },
    /// Print the statements a sync would issue, without running them.
    Plan {
        #[arg(long)]
        target: String,
        #[arg(long, default_value = "postgres")]
        dialect: String,
    },
    /// Load the control file and validate every pipeline.
    Validate,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let pipeline = SyncPipeline::new(SyncConfig::from_env())?;

    match cli.command {
        Commands::Sync { target } => {
            let summary = pipeline.run_target(&target).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let outcome = match &summary.outcome {
                    SyncOutcome::NoData => "no data".to_string(),
                    SyncOutcome::Created { rows } => format!("created with {rows} rows"),
                    SyncOutcome::Merged { reconcile, merge } => format!(
                        "merged: changed={} new={} added_columns={} altered_columns={} complex={} failed={}",
                        merge.changed,
                        merge.inserted_new,
                        reconcile.added.len(),
                        reconcile.altered.len(),
                        reconcile.complex.len(),
                        reconcile.failed.len()
                    ),
                };
                println!(
                    "sync complete: run_id={} pipeline={} units={} staged={} batches={} {}",
                    summary.run_id,
                    summary.pipeline,
                    summary.units,
                    summary.staged_records,
                    summary.batches,
                    outcome
                );
            }
        }
        Commands::Plan { target, dialect } => {
            let Some(dialect) = dialect_for_name(&dialect) else {
                bail!("unknown dialect {dialect:?}; expected postgres or bigquery");
            };
            for planned in pipeline.plan_target(&target, dialect.as_ref())? {
                if cli.json {
                    println!("{}", serde_json::to_string(&planned)?);
                } else {
                    println!("-- {}\n{};\n", planned.step, planned.sql);
                }
            }
        }
        Commands::Validate => {
            let count = pipeline.validate_all()?;
            println!("{count} pipeline(s) valid");
        }
    }

    Ok(())
}
