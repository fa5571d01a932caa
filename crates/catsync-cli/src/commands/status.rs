//! Graph contents and pass history.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use catsync_graph::{element_counts, recent_runs, schema_ready, GraphClient};

use crate::config::AppConfig;
use crate::output;

#[derive(Args)]
pub struct StatusArgs {
    /// Number of recent passes to show
    #[arg(long, default_value = "10")]
    pub limit: usize,
}

pub async fn execute(args: StatusArgs, config: &AppConfig) -> Result<()> {
    let client = GraphClient::connect(&config.graph)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", config.graph.uri))?;

    let ready = schema_ready(&client).await?;
    println!(
        "{}: {}",
        "Schema".bold(),
        if ready { "installed".green() } else { "missing (run `catsync init-schema`)".red() }
    );

    let counts = client.get_counts().await?;
    let elements = element_counts(&client).await?;
    output::print_graph_counts(&counts, &elements);

    let runs = recent_runs(&client, args.limit).await?;
    output::print_runs(&runs);
    Ok(())
}
