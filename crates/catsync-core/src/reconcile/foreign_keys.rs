//! Two-phase foreign-key linking.
//!
//! Keys may span schemas, so linking runs once per pass after every column in
//! every schema has been reconciled. Collection deduplicates the imported and
//! exported enumerations of the same key; linking resolves both sides by
//! qualified name and skips any key that does not resolve to exactly one
//! column on each side. Links already recorded with the same properties are
//! left alone.

use std::collections::BTreeSet;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::adapter::TargetCatalog;
use crate::error::SyncError;
use crate::model::{ElementKind, ForeignKeyDescriptor, ForeignKeyProps, Guid};

/// A key that was recorded at the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedKey {
    pub descriptor: ForeignKeyDescriptor,
    pub referencing_table: String,
    pub from: Guid,
    pub to: Guid,
}

#[derive(Debug, Default)]
pub struct LinkOutcome {
    pub linked: Vec<LinkedKey>,
    /// Keys with a side that resolved to zero or several columns.
    pub unresolved: usize,
    /// Keys already recorded at the target as they are.
    pub unchanged: usize,
    /// Keys whose lookup or link write failed.
    pub failed: usize,
}

enum Resolution {
    Found(Guid),
    Unresolved,
    Failed,
}

enum LinkResult {
    Linked(LinkedKey),
    Unchanged,
    Unresolved,
    Failed,
}

/// Merge key enumerations into a set, so a key seen from both ends is linked once.
pub fn collect_foreign_keys<I>(batches: I) -> BTreeSet<ForeignKeyDescriptor>
where
    I: IntoIterator<Item = Vec<ForeignKeyDescriptor>>,
{
    batches.into_iter().flatten().collect()
}

async fn resolve_column(target: &dyn TargetCatalog, qualified_name: &str) -> Resolution {
    match target.find_by_qualified_name(ElementKind::Column, qualified_name).await {
        Ok(mut columns) if columns.len() == 1 => Resolution::Found(columns.remove(0).guid),
        Ok(columns) => {
            warn!(
                qualified_name,
                matches = columns.len(),
                "Foreign key column does not resolve to exactly one element; skipping key"
            );
            Resolution::Unresolved
        }
        Err(e) => {
            let err = SyncError::target_read("find", qualified_name, e);
            warn!(error = %err, "Foreign key column lookup failed; skipping key");
            Resolution::Failed
        }
    }
}

fn link_one<'a>(
    target: &'a dyn TargetCatalog,
    database_qualified_name: &'a str,
    descriptor: ForeignKeyDescriptor,
) -> BoxFuture<'a, LinkResult> {
    async move {
        let from_name = descriptor.referencing_column_qualified_name(database_qualified_name);
        let to_name = descriptor.referenced_column_qualified_name(database_qualified_name);

        let (from, to) = futures::join!(
            resolve_column(target, &from_name),
            resolve_column(target, &to_name)
        );
        let (from, to) = match (from, to) {
            (Resolution::Found(from), Resolution::Found(to)) => (from, to),
            (Resolution::Failed, _) | (_, Resolution::Failed) => return LinkResult::Failed,
            _ => return LinkResult::Unresolved,
        };

        let props = ForeignKeyProps {
            constraint_name: descriptor.constraint_name.clone(),
        };
        match target.foreign_key_link(&from, &to).await {
            Ok(Some(current)) if current == props => return LinkResult::Unchanged,
            Ok(_) => {}
            Err(e) => {
                let err = SyncError::target_read("foreign_key_link", from_name, e);
                warn!(error = %err, to = %to_name, "Foreign key link lookup failed; skipping key");
                return LinkResult::Failed;
            }
        }
        match target.set_foreign_key_link(&from, &to, &props).await {
            Ok(()) => {
                debug!(from = %from_name, to = %to_name, "Linked foreign key");
                LinkResult::Linked(LinkedKey {
                    referencing_table: descriptor.referencing_table_qualified_name(database_qualified_name),
                    descriptor,
                    from,
                    to,
                })
            }
            Err(e) => {
                let err = SyncError::target_write("set_foreign_key_link", from_name, e);
                warn!(error = %err, to = %to_name, "Failed to record foreign key");
                LinkResult::Failed
            }
        }
    }
    .boxed()
}

/// Resolve and record every key; one bad key never blocks the others.
pub async fn link_foreign_keys(
    target: &dyn TargetCatalog,
    database_qualified_name: &str,
    keys: BTreeSet<ForeignKeyDescriptor>,
    max_concurrency: usize,
) -> LinkOutcome {
    let results: Vec<LinkResult> = stream::iter(keys)
        .map(|descriptor| link_one(target, database_qualified_name, descriptor))
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    let mut outcome = LinkOutcome::default();
    for result in results {
        match result {
            LinkResult::Linked(key) => outcome.linked.push(key),
            LinkResult::Unchanged => outcome.unchanged += 1,
            LinkResult::Unresolved => outcome.unresolved += 1,
            LinkResult::Failed => outcome.failed += 1,
        }
    }
    outcome
}
