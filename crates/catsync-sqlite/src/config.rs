use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use catsync_core::{SyncError, SyncResult};

/// Schemas SQLite reserves; they cannot be used as attach aliases.
const RESERVED_SCHEMAS: [&str; 2] = ["main", "temp"];

/// Where the SQLite source lives and how it is named in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Main database file.
    pub path: PathBuf,
    /// Extra database files, by schema alias.
    #[serde(default)]
    pub attach: BTreeMap<String, PathBuf>,
    /// Qualified name of the database element; defaults to `sqlite::<path>`.
    #[serde(default)]
    pub qualified_name: Option<String>,
    /// Qualified name of the connector type element, if one should be wired.
    #[serde(default)]
    pub connector_type: Option<String>,
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            attach: BTreeMap::new(),
            qualified_name: None,
            connector_type: None,
        }
    }

    pub fn database_qualified_name(&self) -> String {
        self.qualified_name
            .clone()
            .unwrap_or_else(|| format!("sqlite::{}", self.path.display()))
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(SyncError::config("sqlite path must not be empty"));
        }
        if let Some(name) = &self.qualified_name {
            if name.trim().is_empty() {
                return Err(SyncError::config("sqlite qualified_name must not be blank"));
            }
        }
        for alias in self.attach.keys() {
            if alias.trim().is_empty() {
                return Err(SyncError::config("sqlite attach alias must not be blank"));
            }
            if RESERVED_SCHEMAS.iter().any(|reserved| alias.eq_ignore_ascii_case(reserved)) {
                return Err(SyncError::config(format!("sqlite attach alias '{}' is reserved", alias)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let config = SqliteConfig::new("data/shop.db");
        assert_eq!(config.database_qualified_name(), "sqlite::data/shop.db");
        assert_eq!(config.display_name(), "shop.db");
    }

    #[test]
    fn test_parse_and_validate() {
        let config: SqliteConfig = toml::from_str(
            r#"
            path = "shop.db"
            qualified_name = "sqlite::shop"
            connector_type = "connector::sqlite"

            [attach]
            archive = "archive.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.attach["archive"], PathBuf::from("archive.db"));
        assert!(config.validate().is_ok());

        let mut reserved = config.clone();
        reserved.attach.insert("Main".to_string(), PathBuf::from("x.db"));
        assert!(reserved.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<SqliteConfig, _> = toml::from_str("path = \"a.db\"\nreadonly = true\n");
        assert!(result.is_err());
    }
}
