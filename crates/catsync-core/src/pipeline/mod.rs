//! Reconciliation pipeline.
//!
//! One pass walks database -> connection structure -> schemas -> tables ->
//! columns -> foreign keys. Siblings at a level fan out over a bounded number
//! of concurrent workers, each owning its own [`Tally`]; the level joins and
//! merges before the next one starts. Cancellation is checked between levels
//! only.

mod report;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{SourceCatalog, TargetCatalog};
use crate::config::{FilterLevel, SyncOptions};
use crate::error::{SyncError, SyncResult};
use crate::model::{
    qualified_name_of, ColumnDescriptor, DatabaseDescriptor, Descriptor, ElementKind, ElementProps,
    ForeignKeyDescriptor, Guid, PrimaryKeyDescriptor, PrimaryKeyProps, TargetElement,
};
use crate::reconcile::{collect_foreign_keys, link_foreign_keys, reconcile_children, reconcile_singleton, SingletonOutcome};

use report::Tally;
pub use report::{AppliedChange, ChangeAction, ChangeSet, PassReport, PassStatus, SyncCounts};

/// A reconciled parent that children attach to.
#[derive(Debug, Clone)]
struct Scope {
    guid: Guid,
    qualified_name: String,
}

impl Scope {
    fn of(element: &TargetElement) -> Self {
        Self {
            guid: element.guid.clone(),
            qualified_name: element.qualified_name.clone(),
        }
    }
}

/// A table that exists at the target after the table level.
#[derive(Debug, Clone)]
struct LiveTable {
    schema: Option<String>,
    name: String,
    scope: Scope,
}

/// Children that exist at the target after one scope was reconciled.
struct Level<D> {
    live: Vec<(D, Guid)>,
    tally: Tally,
}

enum Write<D> {
    Remove(TargetElement),
    Update(D, TargetElement),
    Create(D),
}

enum Applied<D> {
    /// The element exists; the action is `None` when nothing had to be written.
    Kept(D, Guid, Option<ChangeAction>),
    Removed(TargetElement),
    Failed,
}

/// Changes to tables are bucketed under the table itself, changes to columns
/// under their owning table, everything else with the shared root objects.
fn owning_table<'a>(kind: ElementKind, parent: &'a Scope, qualified_name: &'a str) -> Option<&'a str> {
    match kind {
        ElementKind::Table => Some(qualified_name),
        ElementKind::Column => Some(parent.qualified_name.as_str()),
        _ => None,
    }
}

/// Reused singletons are left untouched and produce no change.
fn record_singleton(tally: &mut Tally, kind: ElementKind, outcome: &SingletonOutcome) {
    if let SingletonOutcome::Created(element) = outcome {
        tally.counts.created += 1;
        tally.changes.record(
            None,
            AppliedChange::new(kind, ChangeAction::Created, element.guid.clone(), element.qualified_name.as_str()),
        );
    }
}

/// Drives reconciliation passes from a source catalog into a target catalog.
pub struct SyncPipeline {
    source: Arc<dyn SourceCatalog>,
    target: Arc<dyn TargetCatalog>,
    options: SyncOptions,
    source_gate: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(source: Arc<dyn SourceCatalog>, target: Arc<dyn TargetCatalog>, options: SyncOptions) -> Self {
        Self {
            source,
            target,
            options,
            source_gate: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn target(&self) -> &Arc<dyn TargetCatalog> {
        &self.target
    }

    fn concurrency(&self) -> usize {
        self.options.max_concurrency.max(1)
    }

    /// Run one full pass.
    ///
    /// Only an ambiguous database root is returned as an error; every other
    /// failure is logged, counted as a skipped branch and reflected in the
    /// report status.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> SyncResult<PassReport> {
        let started_at = Utc::now();
        let mut tally = Tally::default();
        info!("Starting reconciliation pass");

        let database = match self.gated(self.source.database_identity()).await {
            Ok(database) if !database.qualified_name.trim().is_empty() => database,
            Ok(_) => {
                warn!("Source reported a blank database qualified name; aborting pass");
                return Ok(self.conclude(PassStatus::Aborted, None, tally, started_at).await);
            }
            Err(e) => {
                let err = SyncError::source_read("database_identity", "database", e);
                warn!(error = %err, "No database identity; aborting pass");
                return Ok(self.conclude(PassStatus::Aborted, None, tally, started_at).await);
            }
        };
        let database_name = database.qualified_name.clone();

        let database_element = match reconcile_singleton(
            &*self.target,
            ElementKind::Database,
            None,
            database.element_props(),
        )
        .await
        {
            Ok(outcome) => {
                record_singleton(&mut tally, ElementKind::Database, &outcome);
                outcome.into_element()
            }
            Err(err) if err.is_ambiguous() => {
                error!(error = %err, "Database root is ambiguous; aborting pass");
                return Err(err);
            }
            Err(err) => {
                warn!(error = %err, "Failed to reconcile database root; aborting pass");
                return Ok(self
                    .conclude(PassStatus::Aborted, Some(database_name), tally, started_at)
                    .await);
            }
        };
        let database_scope = Scope::of(&database_element);

        if cancel.is_cancelled() {
            return Ok(self.cancelled("database", database_name, tally, started_at).await);
        }

        self.build_connection_structure(&database, &database_element, &mut tally)
            .await;

        if cancel.is_cancelled() {
            return Ok(self.cancelled("connection", database_name, tally, started_at).await);
        }

        let schemas = self
            .read_or_empty("list_schemas", &database_name, self.source.list_schemas())
            .await;
        let schema_level = self
            .reconcile_level(&database_scope, self.admit(&database_scope, schemas))
            .await;
        tally.merge(schema_level.tally);

        let mut parents: Vec<(Option<String>, Scope)> = schema_level
            .live
            .into_iter()
            .map(|(schema, guid)| {
                let scope = Scope {
                    guid,
                    qualified_name: schema.qualified_name(),
                };
                (Some(schema.name), scope)
            })
            .collect();
        info!(schemas = parents.len(), "Schemas reconciled");

        if cancel.is_cancelled() {
            return Ok(self.cancelled("schemas", database_name, tally, started_at).await);
        }

        if self.source.supports_schemaless_tables() {
            parents.push((None, database_scope.clone()));
        }
        let table_levels: Vec<(Vec<LiveTable>, Tally)> = stream::iter(parents)
            .map(|(schema, scope)| self.reconcile_tables(schema, scope))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;
        let mut tables = Vec::new();
        for (live, level_tally) in table_levels {
            tables.extend(live);
            tally.merge(level_tally);
        }
        info!(tables = tables.len(), "Tables reconciled");

        if cancel.is_cancelled() {
            return Ok(self.cancelled("tables", database_name, tally, started_at).await);
        }

        let column_tallies: Vec<Tally> = stream::iter(&tables)
            .map(|table| self.reconcile_columns(table))
            .buffer_unordered(self.concurrency())
            .boxed()
            .collect()
            .await;
        for column_tally in column_tallies {
            tally.merge(column_tally);
        }
        info!("Columns reconciled");

        // Every column in every schema exists from here on.
        if cancel.is_cancelled() {
            return Ok(self.cancelled("columns", database_name, tally, started_at).await);
        }

        self.link_foreign_keys(&database_name, &tables, &mut tally).await;

        let status = if tally.skipped_branches > 0 {
            PassStatus::Partial
        } else {
            PassStatus::Complete
        };
        Ok(self.conclude(status, Some(database_name), tally, started_at).await)
    }

    /// Await a source read, serialized behind the gate unless the adapter
    /// tolerates concurrent readers.
    async fn gated<R>(&self, read: impl Future<Output = anyhow::Result<R>>) -> anyhow::Result<R> {
        if self.source.supports_concurrent_reads() {
            read.await
        } else {
            let _guard = self.source_gate.lock().await;
            read.await
        }
    }

    /// Source faults are logged and treated as empty results.
    async fn read_or_empty<R: Default>(
        &self,
        operation: &'static str,
        scope: &str,
        read: impl Future<Output = anyhow::Result<R>>,
    ) -> R {
        match self.gated(read).await {
            Ok(found) => found,
            Err(e) => {
                let err = SyncError::source_read(operation, scope, e);
                warn!(error = %err, "Treating source fault as an empty result");
                R::default()
            }
        }
    }

    /// Reject malformed descriptors and apply the name filters for their level.
    fn admit<D: Descriptor>(&self, scope: &Scope, found: Vec<D>) -> Vec<D> {
        let level = FilterLevel::for_kind(D::KIND);
        found
            .into_iter()
            .filter(|descriptor| {
                let name = descriptor.local_name();
                if name.trim().is_empty() {
                    warn!(kind = %D::KIND, parent = %scope.qualified_name, "Rejecting descriptor with a blank name");
                    return false;
                }
                if descriptor.parent_qualified_name() != scope.qualified_name {
                    warn!(
                        kind = %D::KIND,
                        name,
                        reported_parent = %descriptor.parent_qualified_name(),
                        parent = %scope.qualified_name,
                        "Rejecting descriptor reported under another parent"
                    );
                    return false;
                }
                if let Some(level) = level {
                    if !self.options.filters.admits(level, name) {
                        debug!(kind = %D::KIND, name, "Excluded by name filter");
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Diff one parent scope against the desired children and apply the plan.
    async fn reconcile_level<D: Descriptor>(&self, parent: &Scope, desired: Vec<D>) -> Level<D> {
        let mut tally = Tally::default();

        let existing = match self.target.children_of(D::KIND, &parent.guid).await {
            Ok(existing) => existing,
            Err(e) => {
                let err = SyncError::target_read("children_of", parent.qualified_name.as_str(), e);
                warn!(error = %err, kind = %D::KIND, "Skipping branch");
                tally.skip();
                return Level { live: Vec::new(), tally };
            }
        };

        let plan = match reconcile_children(desired, existing) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(error = %err, parent = %parent.qualified_name, "Skipping ambiguous branch");
                tally.skip();
                return Level { live: Vec::new(), tally };
            }
        };

        debug!(
            kind = %D::KIND,
            parent = %parent.qualified_name,
            create = plan.to_create.len(),
            update = plan.matched.len(),
            remove = plan.to_remove.len(),
            "Applying plan"
        );

        let writes = plan
            .to_remove
            .into_iter()
            .map(Write::Remove)
            .chain(plan.matched.into_iter().map(|(descriptor, element)| Write::Update(descriptor, element)))
            .chain(plan.to_create.into_iter().map(Write::Create));

        let results: Vec<Applied<D>> = stream::iter(writes)
            .map(|write| self.apply(parent, write))
            .buffer_unordered(self.concurrency())
            .collect()
            .await;

        let mut live = Vec::new();
        for result in results {
            match result {
                Applied::Kept(descriptor, guid, action) => {
                    if let Some(action) = action {
                        match action {
                            ChangeAction::Created => tally.counts.created += 1,
                            ChangeAction::Updated => tally.counts.updated += 1,
                            _ => {}
                        }
                        let qualified_name = descriptor.qualified_name();
                        tally.changes.record(
                            owning_table(D::KIND, parent, &qualified_name),
                            AppliedChange::new(D::KIND, action, guid.clone(), qualified_name.as_str()),
                        );
                    }
                    live.push((descriptor, guid));
                }
                Applied::Removed(element) => {
                    tally.counts.removed += 1;
                    tally.changes.record(
                        owning_table(D::KIND, parent, &element.qualified_name),
                        AppliedChange::new(
                            D::KIND,
                            ChangeAction::Removed,
                            element.guid.clone(),
                            element.qualified_name.as_str(),
                        ),
                    );
                }
                Applied::Failed => tally.skip(),
            }
        }

        Level { live, tally }
    }

    fn apply<'a, D: Descriptor>(&'a self, parent: &'a Scope, write: Write<D>) -> BoxFuture<'a, Applied<D>> {
        async move {
            match write {
                Write::Remove(element) => {
                    match self
                        .target
                        .remove(D::KIND, &element.guid, &element.qualified_name)
                        .await
                    {
                        Ok(removed) => {
                            debug!(kind = %D::KIND, qualified_name = %element.qualified_name, removed, "Removed stale element");
                            Applied::Removed(element)
                        }
                        Err(e) => {
                            let err = SyncError::target_write("remove", element.qualified_name.as_str(), e);
                            warn!(error = %err, "Skipping branch");
                            Applied::Failed
                        }
                    }
                }
                Write::Update(descriptor, element) => {
                    let props = descriptor.element_props();
                    if element.display_name == props.display_name && element.properties == props.properties {
                        return Applied::Kept(descriptor, element.guid, None);
                    }
                    match self.target.update(D::KIND, &element.guid, &props).await {
                        Ok(()) => Applied::Kept(descriptor, element.guid, Some(ChangeAction::Updated)),
                        Err(e) => {
                            let err = SyncError::target_write("update", props.qualified_name, e);
                            warn!(error = %err, "Skipping branch");
                            Applied::Failed
                        }
                    }
                }
                Write::Create(descriptor) => {
                    let props = descriptor.element_props();
                    match self.target.create(D::KIND, Some(&parent.guid), &props).await {
                        Ok(guid) => Applied::Kept(descriptor, guid, Some(ChangeAction::Created)),
                        Err(e) => {
                            let err = SyncError::target_write("create", props.qualified_name, e);
                            warn!(error = %err, "Skipping branch");
                            Applied::Failed
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Connector type, connection and endpoint; best effort, never fatal.
    async fn build_connection_structure(
        &self,
        database: &DatabaseDescriptor,
        database_element: &TargetElement,
        tally: &mut Tally,
    ) {
        let connector_type = match self.gated(self.source.connector_type_qualified_name()).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => {
                let err = SyncError::MissingPrerequisite("no connector type qualified name configured".to_string());
                info!(reason = %err, "Skipping connection structure");
                return;
            }
            Err(e) => {
                let err = SyncError::source_read("connector_type_qualified_name", database.qualified_name.as_str(), e);
                warn!(error = %err, "Skipping connection structure");
                return;
            }
        };

        let Some(connector) = self
            .singleton(
                ElementKind::ConnectorType,
                None,
                ElementProps::new(connector_type.as_str(), connector_type.as_str()),
                tally,
            )
            .await
        else {
            return;
        };

        let connection_props = ElementProps::new(
            qualified_name_of(&database.qualified_name, "connection"),
            format!("{} connection", database.display_name),
        )
        .with("connector_type", connector.qualified_name.as_str())
        .with("connector_type_guid", connector.guid.as_str());
        let Some(connection) = self
            .singleton(ElementKind::Connection, Some(&database_element.guid), connection_props, tally)
            .await
        else {
            return;
        };

        let endpoint_props = ElementProps::new(
            qualified_name_of(&connection.qualified_name, "endpoint"),
            format!("{} endpoint", database.display_name),
        )
        .with("network_address", database.source_uri.as_str());
        self.singleton(ElementKind::Endpoint, Some(&connection.guid), endpoint_props, tally)
            .await;
    }

    async fn singleton(
        &self,
        kind: ElementKind,
        parent: Option<&Guid>,
        props: ElementProps,
        tally: &mut Tally,
    ) -> Option<TargetElement> {
        match reconcile_singleton(&*self.target, kind, parent, props).await {
            Ok(outcome) => {
                record_singleton(tally, kind, &outcome);
                Some(outcome.into_element())
            }
            Err(err) => {
                warn!(error = %err, %kind, "Skipping dependent connection wiring");
                tally.skip();
                None
            }
        }
    }

    fn reconcile_tables(&self, schema: Option<String>, scope: Scope) -> BoxFuture<'_, (Vec<LiveTable>, Tally)> {
        async move {
            let found = self
                .read_or_empty(
                    "list_tables",
                    &scope.qualified_name,
                    self.source.list_tables(schema.as_deref()),
                )
                .await;
            let level = self.reconcile_level(&scope, self.admit(&scope, found)).await;

            let live = level
                .live
                .into_iter()
                .map(|(table, guid)| LiveTable {
                    schema: schema.clone(),
                    scope: Scope {
                        guid,
                        qualified_name: table.qualified_name(),
                    },
                    name: table.name,
                })
                .collect();
            (live, level.tally)
        }
        .boxed()
    }

    /// Reconcile one table's columns, then bring its primary-key flags in line.
    fn reconcile_columns<'a>(&'a self, table: &'a LiveTable) -> BoxFuture<'a, Tally> {
        async move {
            let schema = table.schema.as_deref();
            let table_name = table.scope.qualified_name.as_str();

            let found = self
                .read_or_empty("list_columns", table_name, self.source.list_columns(schema, &table.name))
                .await;
            let level = self.reconcile_level(&table.scope, self.admit(&table.scope, found)).await;
            let mut tally = level.tally;
            if !level.live.is_empty() {
                self.reconcile_primary_keys(table, &level.live, &mut tally).await;
            }
            tally
        }
        .boxed()
    }

    /// Set flags on key columns whose flag is missing or stale and clear them
    /// from columns that left the key. Unchanged flags are not rewritten.
    async fn reconcile_primary_keys(&self, table: &LiveTable, live: &[(ColumnDescriptor, Guid)], tally: &mut Tally) {
        let table_name = table.scope.qualified_name.as_str();
        let keys: Vec<PrimaryKeyDescriptor> = self
            .read_or_empty(
                "list_primary_keys",
                table_name,
                self.source.list_primary_keys(table.schema.as_deref(), &table.name),
            )
            .await;
        let keys_by_column: HashMap<&str, &PrimaryKeyDescriptor> = keys
            .iter()
            .filter(|key| key.table_qualified_name == table_name)
            .map(|key| (key.column_name.as_str(), key))
            .collect();

        let flagged = match self.target.primary_keys_of(&table.scope.guid).await {
            Ok(flagged) => flagged,
            Err(e) => {
                let err = SyncError::target_read("primary_keys_of", table_name, e);
                warn!(error = %err, "Skipping primary keys");
                tally.skip();
                return;
            }
        };

        for (column, guid) in live {
            let desired = keys_by_column.get(column.name.as_str()).map(|key| PrimaryKeyProps {
                key_name: key.key_name.clone(),
            });
            let (action, operation, result) = match (desired, flagged.get(guid)) {
                (Some(props), Some(current)) if &props == current => continue,
                (Some(props), _) => (
                    ChangeAction::PrimaryKeySet,
                    "set_primary_key",
                    self.target.set_primary_key(guid, &props).await,
                ),
                (None, Some(_)) => (
                    ChangeAction::PrimaryKeyCleared,
                    "clear_primary_key",
                    self.target.clear_primary_key(guid).await,
                ),
                (None, None) => continue,
            };

            match result {
                Ok(()) => {
                    match action {
                        ChangeAction::PrimaryKeyCleared => tally.counts.primary_keys_cleared += 1,
                        _ => tally.counts.primary_keys += 1,
                    }
                    tally.changes.record(
                        Some(table_name),
                        AppliedChange::new(ElementKind::Column, action, guid.clone(), column.qualified_name()),
                    );
                }
                Err(e) => {
                    let err = SyncError::target_write(operation, column.qualified_name(), e);
                    warn!(error = %err, "Skipping primary key");
                    tally.skip();
                }
            }
        }
    }

    /// Imported and exported keys of one table.
    fn collect_table_keys<'a>(&'a self, table: &'a LiveTable) -> BoxFuture<'a, Vec<ForeignKeyDescriptor>> {
        async move {
            let schema = table.schema.as_deref();
            let scope = table.scope.qualified_name.as_str();
            let mut keys = self
                .read_or_empty("list_imported_keys", scope, self.source.list_imported_keys(schema, &table.name))
                .await;
            keys.extend(
                self.read_or_empty("list_exported_keys", scope, self.source.list_exported_keys(schema, &table.name))
                    .await,
            );
            keys
        }
        .boxed()
    }

    /// Collect keys from every reconciled table, then link them in one pass.
    async fn link_foreign_keys(&self, database_name: &str, tables: &[LiveTable], tally: &mut Tally) {
        let batches: Vec<Vec<ForeignKeyDescriptor>> = stream::iter(tables)
            .map(|table| self.collect_table_keys(table))
            .buffer_unordered(self.concurrency())
            .boxed()
            .collect()
            .await;

        let keys = collect_foreign_keys(batches);
        let collected = keys.len();
        let outcome = link_foreign_keys(&*self.target, database_name, keys, self.concurrency()).await;

        tally.counts.foreign_keys += outcome.linked.len();
        tally.counts.unresolved_links += outcome.unresolved;
        tally.skipped_branches += outcome.failed;
        info!(
            collected,
            linked = outcome.linked.len(),
            unchanged = outcome.unchanged,
            unresolved = outcome.unresolved,
            failed = outcome.failed,
            "Foreign keys linked"
        );

        for key in outcome.linked {
            let mut change = AppliedChange::new(
                ElementKind::Column,
                ChangeAction::ForeignKeyLinked,
                key.from,
                key.descriptor.referencing_column_qualified_name(database_name),
            );
            change.related_guid = Some(key.to);
            tally.changes.record(Some(&key.referencing_table), change);
        }
    }

    async fn cancelled(
        &self,
        after: &'static str,
        database_name: String,
        tally: Tally,
        started_at: DateTime<Utc>,
    ) -> PassReport {
        info!(after, "Pass cancelled between levels");
        self.conclude(PassStatus::Aborted, Some(database_name), tally, started_at)
            .await
    }

    async fn conclude(
        &self,
        status: PassStatus,
        database_name: Option<String>,
        tally: Tally,
        started_at: DateTime<Utc>,
    ) -> PassReport {
        let report = PassReport::finish(status, database_name, tally, started_at);
        info!(
            status = report.status.as_str(),
            created = report.counts.created,
            updated = report.counts.updated,
            removed = report.counts.removed,
            primary_keys = report.counts.primary_keys,
            primary_keys_cleared = report.counts.primary_keys_cleared,
            foreign_keys = report.counts.foreign_keys,
            skipped_branches = report.skipped_branches,
            duration_ms = report.duration_ms(),
            "Reconciliation pass finished"
        );

        if let Err(e) = self.target.record_pass(&report).await {
            warn!(error = %e, "Failed to record pass outcome");
        }
        report
    }
}
