//! One-shot reconciliation.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use catsync_core::{wait_until_available, PassStatus};
use catsync_graph::initialize_schema;

use crate::config::AppConfig;
use crate::output;

#[derive(Args)]
pub struct SyncArgs {
    /// Install graph constraints and indexes before the pass
    #[arg(long)]
    pub init_schema: bool,

    /// Print the pass report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: SyncArgs, config: &AppConfig) -> Result<()> {
    let (client, pipeline) = super::build_pipeline(config).await?;

    if args.init_schema {
        initialize_schema(&client).await?;
    }

    let target = pipeline.target();
    wait_until_available("metadata graph", &config.sync.readiness, || target.is_ready()).await?;

    if !args.json {
        println!("{}", "Reconciling catalog...".bold());
    }
    let cancel = super::cancel_on_ctrl_c();
    let report = pipeline.run_pass(&cancel).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
    }

    if report.status == PassStatus::Aborted {
        anyhow::bail!("pass aborted");
    }
    Ok(())
}
