//! Neo4j schema initialization (constraints and indexes).

use anyhow::Result;
use neo4rs::Query;
use tracing::{debug, info};

use crate::GraphClient;

/// Uniqueness constraints the target relies on; readiness means all exist.
const CONSTRAINT_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT catsync_database_guid IF NOT EXISTS FOR (n:Database) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_connector_type_guid IF NOT EXISTS FOR (n:ConnectorType) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_connection_guid IF NOT EXISTS FOR (n:Connection) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_endpoint_guid IF NOT EXISTS FOR (n:Endpoint) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_schema_guid IF NOT EXISTS FOR (n:Schema) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_table_guid IF NOT EXISTS FOR (n:Table) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_column_guid IF NOT EXISTS FOR (n:Column) REQUIRE n.guid IS UNIQUE",
    "CREATE CONSTRAINT catsync_sync_run_id IF NOT EXISTS FOR (r:SyncRun) REQUIRE r.run_id IS UNIQUE",
];

/// Lookup indexes; qualified names are not unique by construction.
const INDEX_STATEMENTS: &[&str] = &[
    "CREATE INDEX catsync_database_qn IF NOT EXISTS FOR (n:Database) ON (n.qualified_name)",
    "CREATE INDEX catsync_connector_type_qn IF NOT EXISTS FOR (n:ConnectorType) ON (n.qualified_name)",
    "CREATE INDEX catsync_connection_qn IF NOT EXISTS FOR (n:Connection) ON (n.qualified_name)",
    "CREATE INDEX catsync_endpoint_qn IF NOT EXISTS FOR (n:Endpoint) ON (n.qualified_name)",
    "CREATE INDEX catsync_schema_qn IF NOT EXISTS FOR (n:Schema) ON (n.qualified_name)",
    "CREATE INDEX catsync_table_qn IF NOT EXISTS FOR (n:Table) ON (n.qualified_name)",
    "CREATE INDEX catsync_column_qn IF NOT EXISTS FOR (n:Column) ON (n.qualified_name)",
    "CREATE INDEX catsync_sync_run_finished IF NOT EXISTS FOR (r:SyncRun) ON (r.finished_at)",
];

/// Initialize the graph schema.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn initialize_schema(client: &GraphClient) -> Result<()> {
    info!("Initializing Neo4j schema...");

    for statement in CONSTRAINT_STATEMENTS.iter().chain(INDEX_STATEMENTS) {
        client.execute(Query::new(statement.to_string())).await?;
    }

    info!(
        constraints = CONSTRAINT_STATEMENTS.len(),
        indexes = INDEX_STATEMENTS.len(),
        "Neo4j schema initialized"
    );
    Ok(())
}

/// Whether every catsync constraint is installed.
pub async fn schema_ready(client: &GraphClient) -> Result<bool> {
    let query = Query::new(
        "SHOW CONSTRAINTS YIELD name WHERE name STARTS WITH 'catsync_' RETURN count(name) AS count".to_string(),
    );
    let installed: i64 = client.query_scalar(query, "count").await?.unwrap_or(0);
    debug!(installed, expected = CONSTRAINT_STATEMENTS.len(), "Checked graph constraints");
    Ok(usize::try_from(installed).unwrap_or_default() >= CONSTRAINT_STATEMENTS.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent_and_prefixed() {
        for statement in CONSTRAINT_STATEMENTS.iter().chain(INDEX_STATEMENTS) {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
            assert!(statement.contains(" catsync_"), "{statement}");
        }
    }

    #[test]
    fn test_every_element_label_is_constrained() {
        for kind in catsync_core::ElementKind::ALL {
            let label = format!("(n:{})", crate::label(kind));
            assert!(CONSTRAINT_STATEMENTS.iter().any(|s| s.contains(&label)), "{label}");
            assert!(INDEX_STATEMENTS.iter().any(|s| s.contains(&label)), "{label}");
        }
    }
}
