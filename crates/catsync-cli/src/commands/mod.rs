//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use catsync_core::{SnapshotSource, SourceCatalog, SyncPipeline};
use catsync_graph::{GraphCatalog, GraphClient};
use catsync_sqlite::SqliteSource;

use crate::config::{AppConfig, SourceConfig, DEFAULT_CONFIG_FILE};

pub mod init_schema;
pub mod status;
pub mod sync;
pub mod watch;

/// catsync - mirror a relational catalog into a metadata graph
#[derive(Parser)]
#[command(name = "catsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "CATSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation pass
    Sync(sync::SyncArgs),

    /// Reconcile on an interval and print change events until Ctrl-C
    Watch(watch::WatchArgs),

    /// Show graph contents and recent passes
    Status(status::StatusArgs),

    /// Install graph constraints and indexes
    InitSchema,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let path = self.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config = AppConfig::load(&path)?;
        info!(config = %path.display(), "Loaded configuration");

        match self.command {
            Commands::Sync(args) => sync::execute(args, &config).await,
            Commands::Watch(args) => watch::execute(args, &config).await,
            Commands::Status(args) => status::execute(args, &config).await,
            Commands::InitSchema => init_schema::execute(&config).await,
        }
    }
}

/// Open the configured source catalog.
pub(crate) fn open_source(config: &SourceConfig) -> Result<Arc<dyn SourceCatalog>> {
    let source: Arc<dyn SourceCatalog> = match config {
        SourceConfig::Sqlite(sqlite) => Arc::new(SqliteSource::open(sqlite)?),
        SourceConfig::Snapshot { path } => Arc::new(SnapshotSource::from_json_file(path)?),
    };
    Ok(source)
}

/// Connect to the graph and build a pipeline over it.
pub(crate) async fn build_pipeline(config: &AppConfig) -> Result<(GraphClient, Arc<SyncPipeline>)> {
    let source = open_source(&config.source)?;
    let client = GraphClient::connect(&config.graph)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", config.graph.uri))?;
    let target = Arc::new(GraphCatalog::new(client.clone()));
    let pipeline = Arc::new(SyncPipeline::new(source, target, config.sync_options()));
    Ok((client, pipeline))
}

/// A token cancelled on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Interrupt received, stopping");
        trigger.cancel();
    });
    cancel
}
