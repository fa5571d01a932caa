//! Pass outcome types and the per-worker change accumulator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ElementKind, Guid};

/// Terminal state of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassStatus {
    /// Every branch was reconciled.
    Complete,
    /// At least one branch was skipped; siblings were reconciled.
    Partial,
    /// The pass stopped before reaching the end (no database identity, a
    /// failed root write, or cancellation).
    Aborted,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "COMPLETE",
            Self::Partial => "PARTIAL",
            Self::Aborted => "ABORTED",
        }
    }
}

/// Write counts for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub created: usize,
    pub updated: usize,
    /// Explicit remove operations; cascaded children are not counted.
    pub removed: usize,
    /// Primary-key flags set or changed.
    pub primary_keys: usize,
    /// Primary-key flags removed from columns no longer in the key.
    #[serde(default)]
    pub primary_keys_cleared: usize,
    pub foreign_keys: usize,
    pub unresolved_links: usize,
}

impl SyncCounts {
    pub fn merge(&mut self, other: &SyncCounts) {
        self.created += other.created;
        self.updated += other.updated;
        self.removed += other.removed;
        self.primary_keys += other.primary_keys;
        self.primary_keys_cleared += other.primary_keys_cleared;
        self.foreign_keys += other.foreign_keys;
        self.unresolved_links += other.unresolved_links;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
    Removed,
    PrimaryKeySet,
    PrimaryKeyCleared,
    ForeignKeyLinked,
}

/// One element or relationship the pass applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub kind: ElementKind,
    pub action: ChangeAction,
    pub guid: Guid,
    pub qualified_name: String,
    /// Other end of a relationship (the referenced column of a key link).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_guid: Option<Guid>,
}

impl AppliedChange {
    pub fn new(kind: ElementKind, action: ChangeAction, guid: Guid, qualified_name: impl Into<String>) -> Self {
        Self {
            kind,
            action,
            guid,
            qualified_name: qualified_name.into(),
            related_guid: None,
        }
    }
}

/// Applied changes grouped for event emission: the shared root objects
/// (database, connection structure, schemas) and one bucket per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub shared: Vec<AppliedChange>,
    pub tables: BTreeMap<String, Vec<AppliedChange>>,
}

impl ChangeSet {
    /// Record a change; `table` names the owning table for table-level changes.
    pub fn record(&mut self, table: Option<&str>, change: AppliedChange) {
        match table {
            Some(table) => self.tables.entry(table.to_string()).or_default().push(change),
            None => self.shared.push(change),
        }
    }

    pub fn merge(&mut self, other: ChangeSet) {
        self.shared.extend(other.shared);
        for (table, changes) in other.tables {
            self.tables.entry(table).or_default().extend(changes);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.tables.values().map(Vec::len).sum::<usize>()
    }
}

/// Accumulator owned by one worker and merged at the level barrier.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    pub counts: SyncCounts,
    pub skipped_branches: usize,
    pub changes: ChangeSet,
}

impl Tally {
    pub fn merge(&mut self, other: Tally) {
        self.counts.merge(&other.counts);
        self.skipped_branches += other.skipped_branches;
        self.changes.merge(other.changes);
    }

    pub fn skip(&mut self) {
        self.skipped_branches += 1;
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub status: PassStatus,
    pub database_qualified_name: Option<String>,
    pub counts: SyncCounts,
    pub skipped_branches: usize,
    pub changes: ChangeSet,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub(crate) fn finish(
        status: PassStatus,
        database_qualified_name: Option<String>,
        tally: Tally,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status,
            database_qualified_name,
            counts: tally.counts,
            skipped_branches: tally.skipped_branches,
            changes: tally.changes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
