//! Centralized error types for catalog reconciliation.

use thiserror::Error;

use crate::model::ElementKind;

/// Main error type for reconciliation operations.
///
/// Every variant except `AmbiguousMatch` at the database root is caught at the
/// smallest enclosing branch (one schema, one table, one link) and logged.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Source read failed during {operation} ({scope}): {source}")]
    SourceRead {
        operation: &'static str,
        scope: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Target read failed during {operation} of '{qualified_name}': {source}")]
    TargetRead {
        operation: &'static str,
        qualified_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Target write failed during {operation} of '{qualified_name}': {source}")]
    TargetWrite {
        operation: &'static str,
        qualified_name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Ambiguous match: {count} {kind} elements share qualified name '{qualified_name}'")]
    AmbiguousMatch {
        kind: ElementKind,
        qualified_name: String,
        count: usize,
    },

    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Prerequisite unavailable after {attempts} attempts: {what}")]
    PrerequisiteUnavailable { what: String, attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for reconciliation operations.
pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn source_read(operation: &'static str, scope: impl Into<String>, source: anyhow::Error) -> Self {
        Self::SourceRead {
            operation,
            scope: scope.into(),
            source,
        }
    }

    pub fn target_read(
        operation: &'static str,
        qualified_name: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::TargetRead {
            operation,
            qualified_name: qualified_name.into(),
            source,
        }
    }

    pub fn target_write(
        operation: &'static str,
        qualified_name: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::TargetWrite {
            operation,
            qualified_name: qualified_name.into(),
            source,
        }
    }

    pub fn ambiguous(kind: ElementKind, qualified_name: impl Into<String>, count: usize) -> Self {
        Self::AmbiguousMatch {
            kind,
            qualified_name: qualified_name.into(),
            count,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::AmbiguousMatch { .. })
    }
}
