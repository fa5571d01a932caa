//! Periodic reconciliation.
//!
//! `SyncPoller` re-runs the pipeline on a fixed interval and publishes the
//! batched change events of every pass until its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::SyncResult;
use crate::events::{batch_events, publish, EventReceiver, EventSender};
use crate::pipeline::{PassReport, SyncPipeline};
use crate::retry::{wait_until_available, RetryPolicy};

pub struct SyncPoller {
    pipeline: Arc<SyncPipeline>,
    interval: Duration,
    events: EventSender,
    readiness: Option<RetryPolicy>,
}

impl SyncPoller {
    pub fn new(pipeline: Arc<SyncPipeline>, interval: Duration, events: EventSender) -> Self {
        Self {
            pipeline,
            interval,
            events,
            readiness: None,
        }
    }

    /// Wait for the target to report ready before the first pass.
    pub fn with_readiness(mut self, policy: RetryPolicy) -> Self {
        self.readiness = Some(policy);
        self
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Run one pass and publish its events.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let report = self.pipeline.run_pass(cancel).await?;
        let events = batch_events(&report);
        let total = events.len();
        let delivered = publish(&self.events, events);
        debug!(total, delivered, "Published change events");
        Ok(report)
    }

    /// Poll until `cancel` fires; returns the number of passes run.
    ///
    /// A failed pass is logged and retried on the next tick. Only an
    /// unavailable target at startup ends the loop with an error.
    pub async fn run(&self, cancel: CancellationToken) -> SyncResult<usize> {
        if let Some(policy) = &self.readiness {
            let target = Arc::clone(self.pipeline.target());
            let check_ready = move || {
                let target = Arc::clone(&target);
                async move { target.is_ready().await }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(0),
                ready = wait_until_available("target catalog", policy, check_ready) => ready?,
            }
        }

        info!(interval_ms = self.interval.as_millis() as u64, "Poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(passes, "Poller stopped");
                    return Ok(passes);
                }
                _ = ticker.tick() => {}
            }

            passes += 1;
            match self.poll_once(&cancel).await {
                Ok(report) => debug!(pass = passes, status = report.status.as_str(), "Poll finished"),
                Err(err) => error!(pass = passes, error = %err, "Pass failed; retrying on next tick"),
            }
        }
    }
}
