//! Bounded backoff for prerequisites that become available asynchronously,
//! such as a target whose type definitions are still being installed.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Exponential,
    Linear,
}

/// How often and how long to check a prerequisite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff: Backoff::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let step = attempt.max(1);
        let millis = match self.backoff {
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(step - 1).unwrap_or(u64::MAX);
                self.initial_delay_ms.saturating_mul(factor)
            }
            Backoff::Linear => self.initial_delay_ms.saturating_mul(u64::from(step)),
        };
        Duration::from_millis(millis.min(self.max_delay_ms))
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::config("retry max_attempts must be at least 1"));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(SyncError::config(
                "retry initial_delay_ms must not exceed max_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Check until `check` reports availability or the policy is exhausted.
///
/// Check errors count as "not yet available".
pub async fn wait_until_available<F, Fut>(what: &str, policy: &RetryPolicy, mut check: F) -> SyncResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<bool>>,
{
    for attempt in 1..=policy.max_attempts {
        match check().await {
            Ok(true) => {
                if attempt > 1 {
                    info!(what, attempt, "Prerequisite became available");
                }
                return Ok(());
            }
            Ok(false) => debug!(what, attempt, "Prerequisite not yet available"),
            Err(e) => warn!(what, attempt, error = %e, "Prerequisite check failed"),
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    Err(SyncError::PrerequisiteUnavailable {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}
