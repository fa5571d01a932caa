//! Periodic reconciliation with live change events.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use catsync_core::events::DEFAULT_EVENT_CAPACITY;
use catsync_core::{create_event_channel, SyncPoller};

use crate::config::AppConfig;
use crate::output;

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between passes (overrides sync.poll_interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: WatchArgs, config: &AppConfig) -> Result<()> {
    let (_client, pipeline) = super::build_pipeline(config).await?;

    let interval = match args.interval {
        Some(secs) => Duration::from_secs(secs.max(1)),
        None => config.poll_interval(),
    };
    let poller = SyncPoller::new(pipeline, interval, create_event_channel(DEFAULT_EVENT_CAPACITY))
        .with_readiness(config.sync.readiness.clone());

    let mut events = poller.subscribe();
    let json = args.json;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "Failed to encode event"),
                },
                Ok(event) => output::print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if !json {
        println!(
            "{} {}",
            "Watching catalog every".bold(),
            format!("{}s (Ctrl-C to stop)", interval.as_secs()).dimmed()
        );
    }
    let passes = poller.run(super::cancel_on_ctrl_c()).await;

    drop(poller);
    finish_printer(printer).await;

    let passes = passes?;
    if !json {
        println!("{} {}", "Stopped after".bold(), format!("{passes} passes").cyan());
    }
    Ok(())
}

/// Wait for the printer to drain; returns false if it panicked or was cancelled.
async fn finish_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "Event printer task failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_printer_reports_panicked_task() {
        assert!(finish_printer(tokio::spawn(async {})).await);

        let panicked = tokio::spawn(async { panic!("printer failed") });
        assert!(!finish_printer(panicked).await);
    }
}
