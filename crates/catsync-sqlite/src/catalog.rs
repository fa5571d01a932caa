//! `SourceCatalog` over a SQLite connection.

use anyhow::{bail, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use catsync_core::model::descriptor::table_qualified_name;
use catsync_core::model::{
    qualified_name_of, ColumnDescriptor, DatabaseDescriptor, ForeignKeyDescriptor, PrimaryKeyDescriptor,
    SchemaDescriptor, TableDescriptor, TableKind,
};
use catsync_core::SourceCatalog;

use crate::config::SqliteConfig;
use crate::pool::SqlitePool;

/// Quote an identifier for interpolation into SQL text.
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Raw row of `pragma_foreign_key_list`.
struct ForeignKeyRow {
    id: i64,
    seq: i64,
    referenced_table: String,
    from: String,
    to: Option<String>,
}

fn table_names(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let sql = format!(
        "SELECT name, type FROM {}.sqlite_master
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
        quote_identifier(schema)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Actual spelling of a table name; SQLite matches table names case-insensitively.
fn canonical_table_name(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Option<String>> {
    let sql = format!(
        "SELECT name FROM {}.sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
        quote_identifier(schema)
    );
    conn.query_row(&sql, params![table], |row| row.get(0)).optional()
}

/// Name of the column at `position` (1-based) of a table's primary key.
fn primary_key_column(conn: &Connection, schema: &str, table: &str, position: i64) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT name FROM pragma_table_info(?1, ?2) WHERE pk = ?3",
        params![table, schema, position],
        |row| row.get(0),
    )
    .optional()
}

fn imported_keys(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Vec<ForeignKeyDescriptor>> {
    let rows: Vec<ForeignKeyRow> = {
        let mut stmt = conn.prepare(
            "SELECT id, seq, \"table\", \"from\", \"to\" FROM pragma_foreign_key_list(?1, ?2) ORDER BY id, seq",
        )?;
        let rows = stmt.query_map(params![table, schema], |row| {
            Ok(ForeignKeyRow {
                id: row.get(0)?,
                seq: row.get(1)?,
                referenced_table: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let mut keys = Vec::with_capacity(rows.len());
    for row in rows {
        let referenced_table =
            canonical_table_name(conn, schema, &row.referenced_table)?.unwrap_or(row.referenced_table);
        // A key declared without a column list references the parent's primary key.
        let referenced_column = match row.to {
            Some(column) => column,
            None => match primary_key_column(conn, schema, &referenced_table, row.seq + 1)? {
                Some(column) => column,
                None => {
                    debug!(schema, table, referenced_table = %referenced_table, "Foreign key target has no primary key; skipping");
                    continue;
                }
            },
        };
        keys.push(ForeignKeyDescriptor {
            referencing_schema: Some(schema.to_string()),
            referencing_table: table.to_string(),
            referencing_column: row.from,
            referenced_schema: Some(schema.to_string()),
            referenced_table,
            referenced_column,
            constraint_name: Some(format!("fk_{}_{}", table, row.id)),
        });
    }
    Ok(keys)
}

/// Source catalog reading the schema of a SQLite database.
pub struct SqliteSource {
    pool: SqlitePool,
    database: DatabaseDescriptor,
    connector_type: Option<String>,
}

impl SqliteSource {
    /// Open the configured database read-only and attach the extra files.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        config.validate()?;
        let pool = SqlitePool::open(&config.path)?;
        for (alias, path) in &config.attach {
            pool.attach(alias, path)?;
        }
        Ok(Self::new(pool, config))
    }

    pub fn new(pool: SqlitePool, config: &SqliteConfig) -> Self {
        let database = DatabaseDescriptor {
            qualified_name: config.database_qualified_name(),
            display_name: config.display_name(),
            product_name: "SQLite".to_string(),
            product_version: rusqlite::version().to_string(),
            driver_name: "rusqlite".to_string(),
            source_uri: format!("file:{}", config.path.display()),
        };
        Self {
            pool,
            database,
            connector_type: config.connector_type.clone(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn database_name(&self) -> &str {
        &self.database.qualified_name
    }
}

#[async_trait]
impl SourceCatalog for SqliteSource {
    async fn database_identity(&self) -> Result<DatabaseDescriptor> {
        if self.database.qualified_name.trim().is_empty() {
            bail!("database qualified name is blank");
        }
        Ok(self.database.clone())
    }

    async fn connector_type_qualified_name(&self) -> Result<Option<String>> {
        Ok(self.connector_type.clone())
    }

    async fn list_schemas(&self) -> Result<Vec<SchemaDescriptor>> {
        let names: Vec<String> = self
            .pool
            .read(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .await?;

        Ok(names
            .into_iter()
            .map(|name| SchemaDescriptor {
                name,
                owner: None,
                parent_qualified_name: self.database_name().to_string(),
            })
            .collect())
    }

    async fn list_tables(&self, schema: Option<&str>) -> Result<Vec<TableDescriptor>> {
        let Some(schema) = schema else {
            return Ok(Vec::new());
        };
        let owned = schema.to_string();
        let rows = self.pool.read(move |conn| table_names(conn, &owned)).await?;

        let parent = qualified_name_of(self.database_name(), schema);
        Ok(rows
            .into_iter()
            .map(|(name, kind)| TableDescriptor {
                name,
                kind: if kind == "view" { TableKind::View } else { TableKind::Table },
                parent_qualified_name: parent.clone(),
            })
            .collect())
    }

    async fn list_columns(&self, schema: Option<&str>, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let Some(schema) = schema else {
            return Ok(Vec::new());
        };
        let (owned_schema, owned_table) = (schema.to_string(), table.to_string());
        let rows: Vec<(i64, String, String, bool, Option<String>)> = self
            .pool
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT cid, name, type, \"notnull\", dflt_value FROM pragma_table_info(?1, ?2) ORDER BY cid",
                )?;
                let rows = stmt.query_map(params![owned_table, owned_schema], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?;
                rows.collect()
            })
            .await?;

        let parent = table_qualified_name(self.database_name(), Some(schema), table);
        Ok(rows
            .into_iter()
            .map(|(cid, name, data_type, not_null, default_value)| ColumnDescriptor {
                name,
                ordinal: u32::try_from(cid + 1).unwrap_or(u32::MAX),
                data_type,
                nullable: !not_null,
                default_value,
                parent_qualified_name: parent.clone(),
            })
            .collect())
    }

    async fn list_primary_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<PrimaryKeyDescriptor>> {
        let Some(schema) = schema else {
            return Ok(Vec::new());
        };
        let (owned_schema, owned_table) = (schema.to_string(), table.to_string());
        let columns: Vec<String> = self
            .pool
            .read(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT name FROM pragma_table_info(?1, ?2) WHERE pk > 0 ORDER BY pk")?;
                let rows = stmt.query_map(params![owned_table, owned_schema], |row| row.get(0))?;
                rows.collect()
            })
            .await?;

        let table_qualified_name = table_qualified_name(self.database_name(), Some(schema), table);
        Ok(columns
            .into_iter()
            .map(|column_name| PrimaryKeyDescriptor {
                table_qualified_name: table_qualified_name.clone(),
                column_name,
                key_name: None,
            })
            .collect())
    }

    async fn list_imported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let Some(schema) = schema else {
            return Ok(Vec::new());
        };
        let (owned_schema, owned_table) = (schema.to_string(), table.to_string());
        self.pool
            .read(move |conn| imported_keys(conn, &owned_schema, &owned_table))
            .await
    }

    /// SQLite has no reverse index of foreign keys; every table in the schema
    /// is scanned for keys pointing at `table`.
    async fn list_exported_keys(&self, schema: Option<&str>, table: &str) -> Result<Vec<ForeignKeyDescriptor>> {
        let Some(schema) = schema else {
            return Ok(Vec::new());
        };
        let (owned_schema, owned_table) = (schema.to_string(), table.to_string());
        self.pool
            .read(move |conn| {
                let mut exported = Vec::new();
                for (name, kind) in table_names(conn, &owned_schema)? {
                    if kind != "table" {
                        continue;
                    }
                    exported.extend(
                        imported_keys(conn, &owned_schema, &name)?
                            .into_iter()
                            .filter(|key| key.referenced_table.eq_ignore_ascii_case(&owned_table)),
                    );
                }
                Ok(exported)
            })
            .await
    }
}
