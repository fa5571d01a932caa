//! Collaborator interfaces: the source catalog being mirrored and the
//! metadata graph it is mirrored into.

pub mod memory;
pub mod snapshot;

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{
    ColumnDescriptor, DatabaseDescriptor, ElementKind, ElementProps, ForeignKeyDescriptor,
    ForeignKeyProps, Guid, PrimaryKeyDescriptor, PrimaryKeyProps, SchemaDescriptor, TableDescriptor,
    TargetElement,
};
use crate::pipeline::PassReport;

pub use memory::{MemoryCatalog, TargetOp};
pub use snapshot::{CatalogSnapshot, SnapshotSource};

/// Normalizes raw source facts into descriptors.
///
/// `schema` is `None` for tables that live directly under the database.
/// Errors are logged by the pipeline and treated as empty results.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn database_identity(&self) -> Result<DatabaseDescriptor>;

    /// Qualified name of the connector type, if one is configured.
    async fn connector_type_qualified_name(&self) -> Result<Option<String>>;

    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>>;

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableDescriptor>>;

    async fn list_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnDescriptor>>;

    async fn list_primary_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<PrimaryKeyDescriptor>>;

    /// Keys declared on `table` that reference other tables.
    async fn list_imported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>>;

    /// Keys declared on other tables that reference `table`.
    async fn list_exported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>>;

    /// Whether sibling workers may read through this adapter at the same time.
    /// When false the pipeline serializes every source read.
    fn supports_concurrent_reads(&self) -> bool {
        false
    }

    /// Whether tables may exist directly under the database.
    fn supports_schemaless_tables(&self) -> bool {
        false
    }
}

/// Find/create/update/remove primitives keyed by qualified name.
///
/// Lookups return an empty vector when nothing matches. Writes to different
/// qualified names may run concurrently; the pipeline never issues two
/// concurrent writes for the same one.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    async fn find_by_qualified_name(&self, kind: ElementKind, qualified_name: &str) -> Result<Vec<TargetElement>>;

    /// Current children of `kind` owned by `parent`.
    async fn children_of(&self, kind: ElementKind, parent: &Guid) -> Result<Vec<TargetElement>>;

    async fn create(&self, kind: ElementKind, parent: Option<&Guid>, props: &ElementProps) -> Result<Guid>;

    async fn update(&self, kind: ElementKind, guid: &Guid, props: &ElementProps) -> Result<()>;

    /// Remove an element and everything it transitively owns.
    /// Returns the number of elements removed.
    async fn remove(&self, kind: ElementKind, guid: &Guid, qualified_name: &str) -> Result<usize>;

    async fn set_primary_key(&self, column: &Guid, props: &PrimaryKeyProps) -> Result<()>;

    /// Columns of `table` currently flagged as primary key.
    async fn primary_keys_of(&self, table: &Guid) -> Result<BTreeMap<Guid, PrimaryKeyProps>>;

    async fn clear_primary_key(&self, column: &Guid) -> Result<()>;

    /// The recorded link from `from` to `to`, if any.
    async fn foreign_key_link(&self, from: &Guid, to: &Guid) -> Result<Option<ForeignKeyProps>>;

    async fn set_foreign_key_link(&self, from: &Guid, to: &Guid, props: &ForeignKeyProps) -> Result<()>;

    /// Whether the target's type definitions are installed and writes may start.
    async fn is_ready(&self) -> Result<bool> {
        Ok(true)
    }

    /// Record the outcome of a finished pass.
    async fn record_pass(&self, _report: &PassReport) -> Result<()> {
        Ok(())
    }
}
