//! Typed reconciliation options, validated once at startup.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::model::ElementKind;

/// Default number of sibling branches reconciled concurrently per level.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Catalog level a name filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLevel {
    Schema,
    Table,
    Column,
}

impl FilterLevel {
    pub fn for_kind(kind: ElementKind) -> Option<Self> {
        match kind {
            ElementKind::Schema => Some(Self::Schema),
            ElementKind::Table => Some(Self::Table),
            ElementKind::Column => Some(Self::Column),
            _ => None,
        }
    }
}

/// Include/exclude name lists per level.
///
/// An absent (or empty) include list admits every name; the exclude list is
/// applied after it. Excluded elements are treated exactly like elements that
/// are absent from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NameFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_schema_names: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_schema_names: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_table_names: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_table_names: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_column_names: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_column_names: Option<BTreeSet<String>>,
}

impl NameFilters {
    fn lists(&self, level: FilterLevel) -> (Option<&BTreeSet<String>>, Option<&BTreeSet<String>>) {
        match level {
            FilterLevel::Schema => (self.include_schema_names.as_ref(), self.exclude_schema_names.as_ref()),
            FilterLevel::Table => (self.include_table_names.as_ref(), self.exclude_table_names.as_ref()),
            FilterLevel::Column => (self.include_column_names.as_ref(), self.exclude_column_names.as_ref()),
        }
    }

    /// Whether `name` survives the filters for `level`.
    pub fn admits(&self, level: FilterLevel, name: &str) -> bool {
        let (include, exclude) = self.lists(level);
        let included = include.map_or(true, |names| names.is_empty() || names.contains(name));
        let excluded = exclude.map_or(false, |names| names.contains(name));
        included && !excluded
    }

    pub fn validate(&self) -> SyncResult<()> {
        for level in [FilterLevel::Schema, FilterLevel::Table, FilterLevel::Column] {
            let (include, exclude) = self.lists(level);
            for name in include.into_iter().chain(exclude).flatten() {
                if name.trim().is_empty() {
                    return Err(SyncError::config(format!(
                        "blank name in {level:?} filter list"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Options for one reconciliation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub max_concurrency: usize,
    pub filters: NameFilters,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            filters: NameFilters::default(),
        }
    }
}

impl SyncOptions {
    pub fn with_filters(filters: NameFilters) -> Self {
        Self {
            filters,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.max_concurrency == 0 {
            return Err(SyncError::config("max_concurrency must be at least 1"));
        }
        self.filters.validate()
    }
}
