use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::adapter::snapshot::{ColumnSnapshot, SchemaSnapshot, TableSnapshot};
use crate::adapter::{CatalogSnapshot, MemoryCatalog, SnapshotSource, TargetOp};
use crate::config::NameFilters;
use crate::identity::element_guid;
use crate::model::{ColumnDescriptor, PropertyValue, SchemaDescriptor, TableDescriptor};

const DB: &str = "pg::shop";

fn database() -> DatabaseDescriptor {
    DatabaseDescriptor {
        qualified_name: DB.to_string(),
        display_name: "shop".to_string(),
        product_name: "PostgreSQL".to_string(),
        product_version: "16.2".to_string(),
        driver_name: "test".to_string(),
        source_uri: "postgres://db.internal:5432/shop".to_string(),
    }
}

fn shop() -> CatalogSnapshot {
    CatalogSnapshot::new(database()).with_schema(
        SchemaSnapshot::new("public")
            .with_table(TableSnapshot::new("customers").with_column(ColumnSnapshot::new("id", "integer").primary_key()))
            .with_table(
                TableSnapshot::new("orders")
                    .with_column(ColumnSnapshot::new("id", "integer").primary_key())
                    .with_column(ColumnSnapshot::new("customer_id", "integer"))
                    .with_foreign_key("customer_id", "customers", "id"),
            ),
    )
}

struct Harness {
    source: Arc<SnapshotSource>,
    target: Arc<MemoryCatalog>,
    pipeline: SyncPipeline,
}

impl Harness {
    fn new(snapshot: CatalogSnapshot) -> Self {
        Self::with_options(snapshot, SyncOptions::default())
    }

    fn with_options(snapshot: CatalogSnapshot, options: SyncOptions) -> Self {
        let source = Arc::new(SnapshotSource::new(snapshot));
        let target = Arc::new(MemoryCatalog::new());
        let pipeline = SyncPipeline::new(source.clone(), target.clone(), options);
        Self {
            source,
            target,
            pipeline,
        }
    }

    async fn pass(&self) -> PassReport {
        self.pipeline.run_pass(&CancellationToken::new()).await.unwrap()
    }
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn test_first_pass_creates_whole_hierarchy() {
    let harness = Harness::new(shop());
    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(report.database_qualified_name.as_deref(), Some(DB));
    assert_eq!(
        sorted(harness.target.created()),
        vec![
            "pg::shop",
            "pg::shop::public",
            "pg::shop::public::customers",
            "pg::shop::public::customers::id",
            "pg::shop::public::orders",
            "pg::shop::public::orders::customer_id",
            "pg::shop::public::orders::id",
        ]
    );
    assert_eq!(report.counts.created, 7);
    assert_eq!(report.counts.primary_keys, 2);
    assert_eq!(report.counts.foreign_keys, 1);
    assert_eq!(report.skipped_branches, 0);

    // Children hang off their parents.
    let schema = harness.target.get(ElementKind::Schema, "pg::shop::public").unwrap();
    let database = harness.target.get(ElementKind::Database, DB).unwrap();
    assert_eq!(schema.parent_guid, Some(database.guid));
    let column = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .unwrap();
    let orders = harness.target.get(ElementKind::Table, "pg::shop::public::orders").unwrap();
    assert_eq!(column.parent_guid, Some(orders.guid));
}

#[tokio::test]
async fn test_primary_and_foreign_keys_end_to_end() {
    let harness = Harness::new(shop());
    harness.pass().await;

    let customer_id = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .unwrap();
    let order_id = harness.target.get(ElementKind::Column, "pg::shop::public::orders::id").unwrap();
    let order_customer = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .unwrap();

    let keys = harness.target.primary_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[&customer_id.guid].key_name.as_deref(), Some("customers_pkey"));
    assert!(keys.contains_key(&order_id.guid));
    assert!(!keys.contains_key(&order_customer.guid));

    let links = harness.target.links();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].0, order_customer.guid);
    assert_eq!(links[0].1, customer_id.guid);
    assert_eq!(links[0].2.constraint_name.as_deref(), Some("orders_customer_id_fkey"));
}

#[tokio::test]
async fn test_key_seen_from_both_ends_is_linked_once() {
    let harness = Harness::new(shop());
    harness.pass().await;

    let link_writes = harness
        .target
        .journal()
        .into_iter()
        .filter(|op| matches!(op, TargetOp::SetForeignKeyLink { .. }))
        .count();
    assert_eq!(link_writes, 1);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let harness = Harness::new(shop());
    harness.pass().await;
    let before = harness.target.elements(ElementKind::Column);
    harness.target.clear_journal();

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Complete);
    assert!(harness.target.created().is_empty());
    assert!(harness.target.removed().is_empty());
    assert!(harness.target.updated().is_empty());
    assert_eq!(report.counts.created, 0);
    assert_eq!(report.counts.removed, 0);
    assert_eq!(harness.target.elements(ElementKind::Column), before);
    assert_eq!(harness.target.links().len(), 1);
    // Key flags and links already in place are not rewritten either.
    assert!(harness.target.journal().is_empty());
    assert!(report.changes.is_empty());
    assert_eq!(report.counts.primary_keys, 0);
    assert_eq!(report.counts.foreign_keys, 0);
}

#[tokio::test]
async fn test_dropped_primary_key_is_cleared() {
    let harness = Harness::new(shop());
    harness.pass().await;
    let customer_id = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .unwrap()
        .guid;
    harness.target.clear_journal();

    let set_key = |primary_key: bool| {
        harness.source.update(|snapshot| {
            let customers = snapshot.schema_mut("public").unwrap().table_mut("customers").unwrap();
            customers.columns[0].primary_key = primary_key;
        });
    };
    set_key(false);
    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Complete);
    assert!(!harness.target.primary_keys().contains_key(&customer_id));
    assert_eq!(harness.target.primary_keys().len(), 1);
    assert_eq!(report.counts.primary_keys_cleared, 1);
    assert_eq!(report.counts.primary_keys, 0);
    assert_eq!(
        harness.target.journal(),
        vec![TargetOp::ClearPrimaryKey {
            column: customer_id.clone()
        }]
    );
    let changes = &report.changes.tables["pg::shop::public::customers"];
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].action, ChangeAction::PrimaryKeyCleared);

    set_key(true);
    let report = harness.pass().await;
    assert!(harness.target.primary_keys().contains_key(&customer_id));
    assert_eq!(report.counts.primary_keys, 1);
    assert_eq!(report.counts.primary_keys_cleared, 0);
}

#[tokio::test]
async fn test_key_flag_survives_column_update() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.clear_journal();

    harness.source.update(|snapshot| {
        let customers = snapshot.schema_mut("public").unwrap().table_mut("customers").unwrap();
        customers.columns[0].data_type = "bigint".to_string();
    });
    let report = harness.pass().await;

    let column = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .unwrap();
    assert_eq!(harness.target.updated(), vec!["pg::shop::public::customers::id".to_string()]);
    assert!(harness.target.primary_keys().contains_key(&column.guid));
    assert_eq!(report.counts.primary_keys, 0);
}

#[tokio::test]
async fn test_changed_facts_update_in_place() {
    let harness = Harness::new(shop());
    harness.pass().await;
    let guid = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .unwrap()
        .guid;
    harness.target.clear_journal();

    harness.source.update(|snapshot| {
        let orders = snapshot.schema_mut("public").unwrap().table_mut("orders").unwrap();
        orders.columns[1].data_type = "bigint".to_string();
    });
    let report = harness.pass().await;

    assert_eq!(harness.target.updated(), vec!["pg::shop::public::orders::customer_id".to_string()]);
    assert_eq!(report.counts.updated, 1);
    let column = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .unwrap();
    assert_eq!(column.guid, guid);
    assert_eq!(column.properties["data_type"], PropertyValue::from("bigint"));
}

#[tokio::test]
async fn test_rename_is_create_plus_remove() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.clear_journal();

    harness.source.update(|snapshot| {
        let orders = snapshot.schema_mut("public").unwrap().table_mut("orders").unwrap();
        orders.columns[0].name = "order_id".to_string();
    });
    let report = harness.pass().await;

    assert_eq!(harness.target.created(), vec!["pg::shop::public::orders::order_id".to_string()]);
    assert_eq!(harness.target.removed(), vec!["pg::shop::public::orders::id".to_string()]);
    assert!(harness.target.updated().is_empty());
    assert_eq!(report.counts.created, 1);
    assert_eq!(report.counts.removed, 1);

    let renamed = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::order_id")
        .unwrap();
    assert!(harness.target.primary_keys().contains_key(&renamed.guid));
}

#[tokio::test]
async fn test_dropped_table_cascades() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.clear_journal();

    harness.source.update(|snapshot| {
        snapshot.schema_mut("public").unwrap().tables.retain(|t| t.name != "orders");
    });
    let report = harness.pass().await;

    assert_eq!(harness.target.removed(), vec!["pg::shop::public::orders".to_string()]);
    assert_eq!(report.counts.removed, 1);
    assert!(harness.target.get(ElementKind::Column, "pg::shop::public::orders::id").is_none());
    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .is_none());
    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .is_some());
    assert!(harness.target.links().is_empty());
    assert_eq!(report.changes.tables["pg::shop::public::orders"].len(), 1);
}

#[tokio::test]
async fn test_excluded_table_is_removed_like_a_dropped_one() {
    let mut snapshot = shop();
    snapshot
        .schema_mut("public")
        .unwrap()
        .tables
        .push(TableSnapshot::new("audit_log").with_column(ColumnSnapshot::new("entry", "text")));

    let harness = Harness::new(snapshot);
    harness.pass().await;
    assert!(harness.target.get(ElementKind::Table, "pg::shop::public::audit_log").is_some());

    let filters = NameFilters {
        exclude_table_names: Some(BTreeSet::from(["audit_log".to_string()])),
        ..Default::default()
    };
    let filtered = SyncPipeline::new(
        harness.source.clone(),
        harness.target.clone(),
        SyncOptions::with_filters(filters),
    );
    harness.target.clear_journal();
    let report = filtered.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(harness.target.removed(), vec!["pg::shop::public::audit_log".to_string()]);
    assert!(harness.target.get(ElementKind::Column, "pg::shop::public::audit_log::entry").is_none());
    assert!(harness.target.get(ElementKind::Table, "pg::shop::public::orders").is_some());
}

#[tokio::test]
async fn test_include_filter_limits_columns() {
    let filters = NameFilters {
        include_column_names: Some(BTreeSet::from(["id".to_string()])),
        ..Default::default()
    };
    let harness = Harness::with_options(shop(), SyncOptions::with_filters(filters));
    let report = harness.pass().await;

    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .is_none());
    assert_eq!(harness.target.elements(ElementKind::Column).len(), 2);
    // The referencing column was filtered out, so the key cannot resolve.
    assert_eq!(report.counts.foreign_keys, 0);
    assert_eq!(report.counts.unresolved_links, 1);
    assert_eq!(report.status, PassStatus::Complete);
}

#[tokio::test]
async fn test_failed_branch_does_not_block_siblings() {
    let harness = Harness::new(shop());
    harness.target.fail_writes_for("pg::shop::public::orders");

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(report.skipped_branches, 1);
    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .is_some());
    assert!(harness.target.get(ElementKind::Table, "pg::shop::public::orders").is_none());
    assert_eq!(report.counts.created, 4);
    assert_eq!(report.counts.primary_keys, 1);
    assert_eq!(report.counts.unresolved_links, 1);

    harness.target.clear_failures();
    let report = harness.pass().await;
    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(report.counts.created, 3);
    assert_eq!(harness.target.links().len(), 1);
}

#[tokio::test]
async fn test_failed_update_skips_only_that_column() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.clear_journal();
    harness.source.update(|snapshot| {
        let orders = snapshot.schema_mut("public").unwrap().table_mut("orders").unwrap();
        orders.columns[1].data_type = "bigint".to_string();
    });
    harness.target.fail_writes_for("pg::shop::public::orders::customer_id");

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(report.skipped_branches, 1);
    assert_eq!(report.counts.updated, 0);
    assert!(harness.target.updated().is_empty());
    let column = harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .unwrap();
    assert_eq!(column.properties["data_type"], PropertyValue::from("integer"));
    assert_eq!(harness.target.links().len(), 1);

    harness.target.clear_failures();
    let report = harness.pass().await;
    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(report.counts.updated, 1);
}

#[tokio::test]
async fn test_failed_remove_keeps_the_subtree() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.clear_journal();
    harness.source.update(|snapshot| {
        snapshot.schema_mut("public").unwrap().tables.retain(|t| t.name != "orders");
    });
    harness.target.fail_writes_for("pg::shop::public::orders");

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(report.skipped_branches, 1);
    assert_eq!(report.counts.removed, 0);
    assert!(harness.target.removed().is_empty());
    assert!(harness.target.get(ElementKind::Table, "pg::shop::public::orders").is_some());
    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::orders::customer_id")
        .is_some());
    assert!(harness
        .target
        .get(ElementKind::Column, "pg::shop::public::customers::id")
        .is_some());

    harness.target.clear_failures();
    let report = harness.pass().await;
    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(harness.target.removed(), vec!["pg::shop::public::orders".to_string()]);
}

#[tokio::test]
async fn test_ambiguous_database_root_fails_the_pass() {
    let harness = Harness::new(shop());
    for guid in ["db-1", "db-2"] {
        harness.target.seed(
            ElementKind::Database,
            TargetElement {
                guid: Guid::new(guid),
                qualified_name: DB.to_string(),
                display_name: "shop".to_string(),
                properties: Default::default(),
                parent_guid: None,
            },
        );
    }

    let err = harness.pipeline.run_pass(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, SyncError::AmbiguousMatch { kind: ElementKind::Database, count: 2, .. }));
    assert!(harness.target.journal().is_empty());
}

#[tokio::test]
async fn test_ambiguous_schema_scope_is_skipped() {
    let harness = Harness::new(shop());
    harness.pass().await;
    harness.target.seed(
        ElementKind::Schema,
        TargetElement {
            guid: Guid::new("stray-schema"),
            qualified_name: "pg::shop::public".to_string(),
            display_name: "public".to_string(),
            properties: Default::default(),
            parent_guid: Some(element_guid(ElementKind::Database, DB)),
        },
    );
    harness.target.clear_journal();

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(report.skipped_branches, 1);
    assert!(harness.target.created().is_empty());
    assert!(harness.target.removed().is_empty());
}

#[tokio::test]
async fn test_blank_database_name_aborts() {
    let mut snapshot = shop();
    snapshot.database.qualified_name = "  ".to_string();
    let harness = Harness::new(snapshot);

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Aborted);
    assert!(report.database_qualified_name.is_none());
    assert!(harness.target.journal().is_empty());
}

#[tokio::test]
async fn test_cancelled_pass_stops_after_the_root() {
    let harness = Harness::new(shop());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = harness.pipeline.run_pass(&cancel).await.unwrap();

    assert_eq!(report.status, PassStatus::Aborted);
    assert_eq!(harness.target.created(), vec![DB.to_string()]);
    assert_eq!(harness.target.passes().len(), 1);
}

#[tokio::test]
async fn test_connection_structure_is_wired_once() {
    let harness = Harness::new(shop().with_connector_type("connector::postgres"));
    let report = harness.pass().await;
    assert_eq!(report.status, PassStatus::Complete);

    let connector = harness
        .target
        .get(ElementKind::ConnectorType, "connector::postgres")
        .unwrap();
    let connection = harness.target.get(ElementKind::Connection, "pg::shop::connection").unwrap();
    let endpoint = harness
        .target
        .get(ElementKind::Endpoint, "pg::shop::connection::endpoint")
        .unwrap();
    assert_eq!(connector.parent_guid, None);
    assert_eq!(connection.parent_guid, Some(element_guid(ElementKind::Database, DB)));
    assert_eq!(
        connection.properties["connector_type_guid"],
        PropertyValue::from(connector.guid.as_str())
    );
    assert_eq!(endpoint.parent_guid, Some(connection.guid));
    assert_eq!(
        endpoint.properties["network_address"],
        PropertyValue::from("postgres://db.internal:5432/shop")
    );

    harness.target.clear_journal();
    harness.pass().await;
    assert!(harness.target.created().is_empty());
}

#[tokio::test]
async fn test_missing_connector_type_skips_connection_only() {
    let harness = Harness::new(shop());
    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Complete);
    assert!(harness.target.elements(ElementKind::Connection).is_empty());
    assert!(harness.target.elements(ElementKind::Endpoint).is_empty());
    assert_eq!(harness.target.elements(ElementKind::Table).len(), 2);
}

#[tokio::test]
async fn test_ambiguous_connection_skips_endpoint() {
    let harness = Harness::new(shop().with_connector_type("connector::postgres"));
    let database = element_guid(ElementKind::Database, DB);
    harness.target.seed(
        ElementKind::Database,
        TargetElement::from_props(database.clone(), None, &self::database().element_props()),
    );
    for guid in ["conn-1", "conn-2"] {
        harness.target.seed(
            ElementKind::Connection,
            TargetElement {
                guid: Guid::new(guid),
                qualified_name: "pg::shop::connection".to_string(),
                display_name: "connection".to_string(),
                properties: Default::default(),
                parent_guid: Some(database.clone()),
            },
        );
    }

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Partial);
    assert_eq!(report.skipped_branches, 1);
    assert!(harness.target.elements(ElementKind::Endpoint).is_empty());
    assert_eq!(harness.target.elements(ElementKind::Table).len(), 2);
}

#[tokio::test]
async fn test_blank_names_are_rejected() {
    let mut snapshot = shop();
    snapshot
        .schema_mut("public")
        .unwrap()
        .table_mut("customers")
        .unwrap()
        .columns
        .push(ColumnSnapshot::new(" ", "text"));
    let harness = Harness::new(snapshot);

    let report = harness.pass().await;

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(harness.target.elements(ElementKind::Column).len(), 3);
}

#[tokio::test]
async fn test_schemaless_tables_attach_to_database() {
    let mut snapshot = shop();
    snapshot
        .tables
        .push(TableSnapshot::new("settings").with_column(ColumnSnapshot::new("key", "text").primary_key()));
    let harness = Harness::new(snapshot);

    harness.pass().await;

    let table = harness.target.get(ElementKind::Table, "pg::shop::settings").unwrap();
    assert_eq!(table.parent_guid, Some(element_guid(ElementKind::Database, DB)));
    assert!(harness.target.get(ElementKind::Column, "pg::shop::settings::key").is_some());
}

#[tokio::test]
async fn test_changes_are_bucketed_per_table() {
    let harness = Harness::new(shop());
    let report = harness.pass().await;

    let shared: Vec<&str> = report.changes.shared.iter().map(|c| c.qualified_name.as_str()).collect();
    assert_eq!(shared.len(), 2);
    assert!(shared.contains(&DB));
    assert!(shared.contains(&"pg::shop::public"));

    let orders = &report.changes.tables["pg::shop::public::orders"];
    // table, two columns, one primary key, one key link
    assert_eq!(orders.len(), 5);
    let link = orders
        .iter()
        .find(|c| c.action == ChangeAction::ForeignKeyLinked)
        .unwrap();
    assert_eq!(link.qualified_name, "pg::shop::public::orders::customer_id");
    assert!(link.related_guid.is_some());
}

#[tokio::test]
async fn test_pass_outcome_is_recorded() {
    let harness = Harness::new(shop());
    let report = harness.pass().await;
    assert_eq!(harness.target.passes(), vec![report]);
}

/// Source that tracks how many reads are in flight at once.
struct CountingSource {
    inner: SnapshotSource,
    concurrent: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl CountingSource {
    fn new(snapshot: CatalogSnapshot, concurrent: bool) -> Self {
        Self {
            inner: SnapshotSource::new(snapshot),
            concurrent,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    async fn observe<T>(&self, read: impl Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let out = read.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl SourceCatalog for CountingSource {
    async fn database_identity(&self) -> Result<DatabaseDescriptor> {
        self.observe(self.inner.database_identity()).await
    }

    async fn connector_type_qualified_name(&self) -> Result<Option<String>> {
        self.observe(self.inner.connector_type_qualified_name()).await
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        self.observe(self.inner.list_schemas()).await
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableDescriptor>> {
        self.observe(self.inner.list_tables(schema)).await
    }

    async fn list_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.observe(self.inner.list_columns(schema, table)).await
    }

    async fn list_primary_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<PrimaryKeyDescriptor>> {
        self.observe(self.inner.list_primary_keys(schema, table)).await
    }

    async fn list_imported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        self.observe(self.inner.list_imported_keys(schema, table)).await
    }

    async fn list_exported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        self.observe(self.inner.list_exported_keys(schema, table)).await
    }

    fn supports_concurrent_reads(&self) -> bool {
        self.concurrent
    }
}

fn wide_shop() -> CatalogSnapshot {
    let mut schema = SchemaSnapshot::new("public");
    for n in 0..6 {
        schema = schema.with_table(
            TableSnapshot::new(&format!("t{n}"))
                .with_column(ColumnSnapshot::new("id", "integer").primary_key())
                .with_column(ColumnSnapshot::new("label", "text")),
        );
    }
    CatalogSnapshot::new(database()).with_schema(schema)
}

#[tokio::test]
async fn test_serial_source_is_never_read_concurrently() {
    let source = Arc::new(CountingSource::new(wide_shop(), false));
    let target = Arc::new(MemoryCatalog::new());
    let pipeline = SyncPipeline::new(source.clone(), target.clone(), SyncOptions::default());

    let report = pipeline.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(target.elements(ElementKind::Column).len(), 12);
    assert_eq!(source.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_source_is_fanned_out() {
    let source = Arc::new(CountingSource::new(wide_shop(), true));
    let target = Arc::new(MemoryCatalog::new());
    let pipeline = SyncPipeline::new(source.clone(), target.clone(), SyncOptions::default());

    pipeline.run_pass(&CancellationToken::new()).await.unwrap();

    assert!(source.peak.load(Ordering::SeqCst) > 1);
    assert_eq!(target.elements(ElementKind::Column).len(), 12);
}

/// Source whose reads fail on demand, per operation and optionally per
/// schema or table name.
struct FailingSource {
    inner: SnapshotSource,
    failing: Mutex<Vec<(&'static str, Option<String>)>>,
}

impl FailingSource {
    fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            inner: SnapshotSource::new(snapshot),
            failing: Mutex::new(Vec::new()),
        }
    }

    /// Fail `operation`; `name` limits it to one schema (for `list_tables`) or table.
    fn fail(&self, operation: &'static str, name: Option<&str>) {
        self.failing.lock().unwrap().push((operation, name.map(str::to_string)));
    }

    fn check(&self, operation: &'static str, name: Option<&str>) -> Result<()> {
        let failing = self.failing.lock().unwrap();
        let hit = failing
            .iter()
            .any(|(op, only)| *op == operation && (only.is_none() || only.as_deref() == name));
        if hit {
            bail!("injected read failure for {operation}");
        }
        Ok(())
    }
}

#[async_trait]
impl SourceCatalog for FailingSource {
    async fn database_identity(&self) -> Result<DatabaseDescriptor> {
        self.check("database_identity", None)?;
        self.inner.database_identity().await
    }

    async fn connector_type_qualified_name(&self) -> Result<Option<String>> {
        self.check("connector_type_qualified_name", None)?;
        self.inner.connector_type_qualified_name().await
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        self.check("list_schemas", None)?;
        self.inner.list_schemas().await
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableDescriptor>> {
        self.check("list_tables", schema)?;
        self.inner.list_tables(schema).await
    }

    async fn list_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnDescriptor>> {
        self.check("list_columns", Some(table))?;
        self.inner.list_columns(schema, table).await
    }

    async fn list_primary_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<PrimaryKeyDescriptor>> {
        self.check("list_primary_keys", Some(table))?;
        self.inner.list_primary_keys(schema, table).await
    }

    async fn list_imported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        self.check("list_imported_keys", Some(table))?;
        self.inner.list_imported_keys(schema, table).await
    }

    async fn list_exported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        self.check("list_exported_keys", Some(table))?;
        self.inner.list_exported_keys(schema, table).await
    }
}

fn two_schema_shop() -> CatalogSnapshot {
    shop().with_schema(
        SchemaSnapshot::new("audit")
            .with_table(TableSnapshot::new("events").with_column(ColumnSnapshot::new("id", "integer").primary_key())),
    )
}

fn failing_pipeline(snapshot: CatalogSnapshot) -> (Arc<FailingSource>, Arc<MemoryCatalog>, SyncPipeline) {
    let source = Arc::new(FailingSource::new(snapshot));
    let target = Arc::new(MemoryCatalog::new());
    let pipeline = SyncPipeline::new(source.clone(), target.clone(), SyncOptions::default());
    (source, target, pipeline)
}

#[tokio::test]
async fn test_table_read_fault_empties_only_that_schema() {
    let (source, target, pipeline) = failing_pipeline(two_schema_shop());
    let cancel = CancellationToken::new();
    pipeline.run_pass(&cancel).await.unwrap();
    assert_eq!(target.elements(ElementKind::Table).len(), 3);
    target.clear_journal();

    source.fail("list_tables", Some("public"));
    let report = pipeline.run_pass(&cancel).await.unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(
        sorted(target.removed()),
        vec!["pg::shop::public::customers", "pg::shop::public::orders"]
    );
    assert!(target.get(ElementKind::Schema, "pg::shop::public").is_some());
    assert!(target.get(ElementKind::Column, "pg::shop::audit::events::id").is_some());
    assert!(target.links().is_empty());
    assert_eq!(report.counts.removed, 2);
}

#[tokio::test]
async fn test_column_read_fault_empties_only_that_table() {
    let (source, target, pipeline) = failing_pipeline(shop());
    source.fail("list_columns", Some("orders"));

    let report = pipeline.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert!(target.get(ElementKind::Table, "pg::shop::public::orders").is_some());
    assert!(target.get(ElementKind::Column, "pg::shop::public::orders::id").is_none());
    assert!(target.get(ElementKind::Column, "pg::shop::public::customers::id").is_some());
    assert_eq!(report.counts.primary_keys, 1);
    // The referencing column never appeared, so the key stays unresolved.
    assert_eq!(report.counts.unresolved_links, 1);
    assert!(target.links().is_empty());
}

#[tokio::test]
async fn test_key_read_faults_do_not_stop_the_pass() {
    let (source, target, pipeline) = failing_pipeline(shop());
    source.fail("list_imported_keys", None);
    source.fail("list_primary_keys", Some("orders"));

    let report = pipeline.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(target.elements(ElementKind::Column).len(), 3);
    assert_eq!(report.counts.primary_keys, 1);
    // The key is still found through the referenced table's exported keys.
    assert_eq!(target.links().len(), 1);
}

#[tokio::test]
async fn test_missing_database_identity_aborts() {
    let (source, target, pipeline) = failing_pipeline(shop());
    source.fail("database_identity", None);

    let report = pipeline.run_pass(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, PassStatus::Aborted);
    assert!(report.database_qualified_name.is_none());
    assert!(target.journal().is_empty());
    assert_eq!(target.passes().len(), 1);
}

#[tokio::test]
async fn test_pass_future_can_be_spawned() {
    let (_, target, pipeline) = failing_pipeline(shop());
    let pipeline = Arc::new(pipeline);

    let report = tokio::spawn({
        let pipeline = pipeline.clone();
        async move { pipeline.run_pass(&CancellationToken::new()).await }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.status, PassStatus::Complete);
    assert_eq!(target.elements(ElementKind::Column).len(), 3);
}
