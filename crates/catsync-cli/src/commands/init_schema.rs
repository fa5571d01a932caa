use anyhow::{Context, Result};
use colored::Colorize;

use catsync_graph::{initialize_schema, GraphClient};

use crate::config::AppConfig;

pub async fn execute(config: &AppConfig) -> Result<()> {
    let client = GraphClient::connect(&config.graph)
        .await
        .with_context(|| format!("Failed to connect to Neo4j at {}", config.graph.uri))?;

    initialize_schema(&client).await?;
    println!("{}", "Graph schema installed.".green().bold());
    Ok(())
}
