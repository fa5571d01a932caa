//! `catsync.toml` loading and validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use catsync_core::{NameFilters, RetryPolicy, SyncOptions};
use catsync_graph::GraphConfig;
use catsync_sqlite::SqliteConfig;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "catsync.toml";

/// Where catalog facts are read from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Sqlite(SqliteConfig),
    /// A JSON catalog snapshot.
    Snapshot { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub max_concurrency: usize,
    pub poll_interval_secs: u64,
    pub readiness: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrency: SyncOptions::default().max_concurrency,
            poll_interval_secs: 60,
            readiness: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub source: SourceConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub filters: NameFilters,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::parse(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.graph = config.graph.with_env_overrides();
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match &self.source {
            SourceConfig::Sqlite(sqlite) => sqlite.validate()?,
            SourceConfig::Snapshot { path } => {
                if path.as_os_str().is_empty() {
                    bail!("snapshot path must not be empty");
                }
            }
        }
        if self.graph.uri.trim().is_empty() {
            bail!("graph uri must not be empty");
        }
        if self.sync.poll_interval_secs == 0 {
            bail!("sync poll_interval_secs must be at least 1");
        }
        self.sync.readiness.validate()?;
        self.sync_options().validate()?;
        Ok(())
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrency: self.sync.max_concurrency,
            filters: self.filters.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }
}
