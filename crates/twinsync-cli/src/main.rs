//! Twinsync CLI
//!
//! - `apply`: stream newline-delimited JSON update records into the twin
//!   graph, in batches
//! - `model`: print the flattened property list of one model

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use twinsync_engine::{ModelCache, TwinUpdater};
use twinsync_model::PropertyKind;
use twinsync_store::{EntityStore, HttpEntityStore};

mod apply;
mod settings;

use settings::Settings;

#[derive(Parser)]
#[command(name = "twinsync")]
#[command(author, version, about = "Reconcile update records into a digital twin graph")]
struct Cli {
    /// JSON config file; `TWINSYNC_*` environment variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply newline-delimited JSON records (stdin by default)
    Apply {
        /// Input file
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Records per batch
        #[arg(long, default_value_t = 100)]
        batch_size: usize,
    },

    /// Print the flattened properties of a model
    Model {
        /// Model id, e.g. `dtmi:plant:sensor;1`
        schema_id: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let settings = Settings::load(cli.config.as_deref())?;
    let store: Arc<dyn EntityStore> = Arc::new(
        HttpEntityStore::new(settings.store.clone()).context("Failed to create entity store client")?,
    );

    match cli.command {
        Commands::Apply { input, batch_size } => cmd_apply(store, settings, input, batch_size).await,
        Commands::Model { schema_id } => cmd_model(store, &schema_id).await,
    }
}

async fn cmd_apply(
    store: Arc<dyn EntityStore>,
    settings: Settings,
    input: Option<PathBuf>,
    batch_size: usize,
) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    tracing::info!(mode = %settings.engine.mode, endpoint = %settings.store.endpoint, "applying records");
    let updater = TwinUpdater::new(store, settings.engine);
    let summary = apply::apply_records(&updater, reader, batch_size).await?;

    let report = &summary.report;
    eprintln!(
        "{} records in {} batches: {} updated, {} skipped, {} failed ({} added, {} replaced)",
        report.records,
        summary.batches,
        report.updated_records,
        report.skipped,
        report.failed,
        report.operations.added,
        report.operations.replaced,
    );

    if summary.failed_batches > 0 {
        bail!(
            "{} of {} batches failed",
            summary.failed_batches,
            summary.batches
        );
    }
    Ok(())
}

async fn cmd_model(store: Arc<dyn EntityStore>, schema_id: &str) -> Result<()> {
    let cache = ModelCache::new(store);
    let schema = cache
        .get_schema(schema_id)
        .await
        .with_context(|| format!("Failed to resolve {schema_id}"))?;

    println!("{}", schema.schema_id());
    for descriptor in schema.properties() {
        let kind = match descriptor.kind {
            PropertyKind::Property => "property",
            PropertyKind::Other => "other",
        };
        println!("  {:<32} {kind}", descriptor.name);
    }
    Ok(())
}
