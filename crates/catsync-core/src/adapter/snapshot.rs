//! Source catalog backed by a catalog snapshot.
//!
//! A `CatalogSnapshot` is a plain description of a database (schemas, tables,
//! columns, keys) that can be built in code or loaded from JSON. The snapshot
//! can be replaced between passes to model source changes.

use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::SourceCatalog;
use crate::model::descriptor::table_qualified_name;
use crate::model::{
    qualified_name_of, ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, PrimaryKeyDescriptor,
    SchemaDescriptor, TableDescriptor, TableKind,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub database: DatabaseDescriptor,
    #[serde(default)]
    pub connector_type: Option<String>,
    #[serde(default)]
    pub schemas: Vec<SchemaSnapshot>,
    /// Tables that live directly under the database.
    #[serde(default)]
    pub tables: Vec<TableSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub name: String,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(default)]
    pub columns: Vec<ColumnSnapshot>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSnapshot {
    pub name: String,
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

/// A key declared on the owning table. A missing `referenced_schema` means
/// the referenced table lives next to the owning one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeySnapshot {
    pub column: String,
    #[serde(default)]
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
    #[serde(default)]
    pub constraint_name: Option<String>,
}

impl CatalogSnapshot {
    pub fn new(database: DatabaseDescriptor) -> Self {
        Self {
            database,
            connector_type: None,
            schemas: Vec::new(),
            tables: Vec::new(),
        }
    }

    pub fn with_connector_type(mut self, connector_type: &str) -> Self {
        self.connector_type = Some(connector_type.to_string());
        self
    }

    pub fn with_schema(mut self, schema: SchemaSnapshot) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn schema_mut(&mut self, name: &str) -> Option<&mut SchemaSnapshot> {
        self.schemas.iter_mut().find(|schema| schema.name == name)
    }

    fn tables_in(&self, schema: Option<&str>) -> Option<&[TableSnapshot]> {
        match schema {
            Some(name) => self
                .schemas
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.tables.as_slice()),
            None => Some(self.tables.as_slice()),
        }
    }

    fn table(&self, schema: Option<&str>, table: &str) -> Option<&TableSnapshot> {
        self.tables_in(schema)?.iter().find(|t| t.name == table)
    }

    /// Every table paired with the schema it belongs to.
    fn all_tables(&self) -> impl Iterator<Item = (Option<&str>, &TableSnapshot)> {
        self.schemas
            .iter()
            .flat_map(|s| s.tables.iter().map(move |t| (Some(s.name.as_str()), t)))
            .chain(self.tables.iter().map(|t| (None, t)))
    }
}

impl SchemaSnapshot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            owner: None,
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: TableSnapshot) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableSnapshot> {
        self.tables.iter_mut().find(|table| table.name == name)
    }
}

impl TableSnapshot {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::Table,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: ColumnSnapshot) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_foreign_key(mut self, column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        self.foreign_keys.push(ForeignKeySnapshot {
            column: column.to_string(),
            referenced_schema: None,
            referenced_table: referenced_table.to_string(),
            referenced_column: referenced_column.to_string(),
            constraint_name: Some(format!("{}_{}_fkey", self.name, column)),
        });
        self
    }
}

impl ColumnSnapshot {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default_value: None,
            primary_key: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

fn foreign_key_descriptor(schema: Option<&str>, table: &str, key: &ForeignKeySnapshot) -> ForeignKeyDescriptor {
    ForeignKeyDescriptor {
        referencing_schema: schema.map(str::to_string),
        referencing_table: table.to_string(),
        referencing_column: key.column.clone(),
        referenced_schema: key.referenced_schema.clone().or_else(|| schema.map(str::to_string)),
        referenced_table: key.referenced_table.clone(),
        referenced_column: key.referenced_column.clone(),
        constraint_name: key.constraint_name.clone(),
    }
}

/// Source catalog serving descriptors from a snapshot.
#[derive(Debug)]
pub struct SnapshotSource {
    snapshot: RwLock<CatalogSnapshot>,
}

impl SnapshotSource {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    fn read(&self) -> RwLockReadGuard<'_, CatalogSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn replace(&self, snapshot: CatalogSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Mutate the snapshot in place.
    pub fn update(&self, change: impl FnOnce(&mut CatalogSnapshot)) {
        change(&mut self.snapshot.write().unwrap_or_else(PoisonError::into_inner));
    }
}

#[async_trait]
impl SourceCatalog for SnapshotSource {
    async fn database_identity(&self) -> Result<DatabaseDescriptor> {
        Ok(self.read().database.clone())
    }

    async fn connector_type_qualified_name(&self) -> Result<Option<String>> {
        Ok(self.read().connector_type.clone())
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        let snapshot = self.read();
        Ok(snapshot
            .schemas
            .iter()
            .map(|schema| SchemaDescriptor {
                name: schema.name.clone(),
                owner: schema.owner.clone(),
                parent_qualified_name: snapshot.database.qualified_name.clone(),
            })
            .collect())
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableDescriptor>> {
        let snapshot = self.read();
        let parent = match schema {
            Some(name) => qualified_name_of(&snapshot.database.qualified_name, name),
            None => snapshot.database.qualified_name.clone(),
        };
        Ok(snapshot
            .tables_in(schema)
            .unwrap_or_default()
            .iter()
            .map(|table| TableDescriptor {
                name: table.name.clone(),
                kind: table.kind,
                parent_qualified_name: parent.clone(),
            })
            .collect())
    }

    async fn list_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let snapshot = self.read();
        let parent = table_qualified_name(&snapshot.database.qualified_name, schema, table);
        let Some(found) = snapshot.table(schema, table) else {
            return Ok(Vec::new());
        };
        Ok(found
            .columns
            .iter()
            .zip(1u32..)
            .map(|(column, ordinal)| ColumnDescriptor {
                name: column.name.clone(),
                ordinal,
                data_type: column.data_type.clone(),
                nullable: column.nullable,
                default_value: column.default_value.clone(),
                parent_qualified_name: parent.clone(),
            })
            .collect())
    }

    async fn list_primary_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<PrimaryKeyDescriptor>> {
        let snapshot = self.read();
        let table_qualified_name = table_qualified_name(&snapshot.database.qualified_name, schema, table);
        let Some(found) = snapshot.table(schema, table) else {
            return Ok(Vec::new());
        };
        Ok(found
            .columns
            .iter()
            .filter(|column| column.primary_key)
            .map(|column| PrimaryKeyDescriptor {
                table_qualified_name: table_qualified_name.clone(),
                column_name: column.name.clone(),
                key_name: Some(format!("{table}_pkey")),
            })
            .collect())
    }

    async fn list_imported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let snapshot = self.read();
        let Some(found) = snapshot.table(schema, table) else {
            return Ok(Vec::new());
        };
        Ok(found
            .foreign_keys
            .iter()
            .map(|key| foreign_key_descriptor(schema, table, key))
            .collect())
    }

    async fn list_exported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let snapshot = self.read();
        Ok(snapshot
            .all_tables()
            .flat_map(|(owner_schema, owner)| {
                owner
                    .foreign_keys
                    .iter()
                    .map(move |key| foreign_key_descriptor(owner_schema, &owner.name, key))
            })
            .filter(|key| key.referenced_table == table && key.referenced_schema.as_deref() == schema)
            .collect())
    }

    fn supports_concurrent_reads(&self) -> bool {
        true
    }

    fn supports_schemaless_tables(&self) -> bool {
        true
    }
}
