//! Sync run history stored as `:SyncRun` nodes.

use anyhow::Result;
use neo4rs::Query;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use catsync_core::{ElementKind, PassReport};

use crate::{label, GraphClient};

/// One recorded pass, as read back for status display.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunRecord {
    pub run_id: String,
    pub database: String,
    pub status: String,
    pub created: i64,
    pub updated: i64,
    pub removed: i64,
    pub primary_keys: i64,
    pub foreign_keys: i64,
    pub unresolved_links: i64,
    pub skipped_branches: i64,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
}

fn as_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Store a finished pass and link it to its database node when one exists.
pub async fn record_run(client: &GraphClient, report: &PassReport) -> Result<()> {
    let run_id = Uuid::new_v4().to_string();
    let counts = &report.counts;

    let query = Query::new(
        "CREATE (r:SyncRun {
            run_id: $run_id, database: $database, status: $status,
            created: $created, updated: $updated, removed: $removed,
            primary_keys: $primary_keys, foreign_keys: $foreign_keys,
            unresolved_links: $unresolved_links, skipped_branches: $skipped_branches,
            started_at: $started_at, finished_at: $finished_at, duration_ms: $duration_ms
         })
         WITH r
         OPTIONAL MATCH (d:Database {qualified_name: $database})
         FOREACH (_ IN CASE WHEN d IS NULL THEN [] ELSE [1] END |
             MERGE (d)-[:HAS_SYNC_RUN]->(r))
         RETURN r.run_id AS run_id"
            .to_string(),
    )
    .param("run_id", run_id.as_str())
    .param("database", report.database_qualified_name.as_deref().unwrap_or_default())
    .param("status", report.status.as_str())
    .param("created", as_i64(counts.created))
    .param("updated", as_i64(counts.updated))
    .param("removed", as_i64(counts.removed))
    .param("primary_keys", as_i64(counts.primary_keys))
    .param("foreign_keys", as_i64(counts.foreign_keys))
    .param("unresolved_links", as_i64(counts.unresolved_links))
    .param("skipped_branches", as_i64(report.skipped_branches))
    .param("started_at", report.started_at.to_rfc3339())
    .param("finished_at", report.finished_at.to_rfc3339())
    .param("duration_ms", report.duration_ms());

    client.execute(query).await?;
    debug!(run_id, status = report.status.as_str(), "Recorded sync run");
    Ok(())
}

/// Most recent runs first.
pub async fn recent_runs(client: &GraphClient, limit: usize) -> Result<Vec<SyncRunRecord>> {
    let query = Query::new(
        "MATCH (r:SyncRun)
         RETURN r.run_id AS run_id, r.database AS database, r.status AS status,
                r.created AS created, r.updated AS updated, r.removed AS removed,
                r.primary_keys AS primary_keys, r.foreign_keys AS foreign_keys,
                r.unresolved_links AS unresolved_links, r.skipped_branches AS skipped_branches,
                r.started_at AS started_at, r.finished_at AS finished_at,
                r.duration_ms AS duration_ms
         ORDER BY r.finished_at DESC
         LIMIT $limit"
            .to_string(),
    )
    .param("limit", as_i64(limit));

    let rows = client.query(query).await?;
    Ok(rows
        .iter()
        .map(|row| SyncRunRecord {
            run_id: row.get("run_id").unwrap_or_default(),
            database: row.get("database").unwrap_or_default(),
            status: row.get("status").unwrap_or_default(),
            created: row.get("created").unwrap_or_default(),
            updated: row.get("updated").unwrap_or_default(),
            removed: row.get("removed").unwrap_or_default(),
            primary_keys: row.get("primary_keys").unwrap_or_default(),
            foreign_keys: row.get("foreign_keys").unwrap_or_default(),
            unresolved_links: row.get("unresolved_links").unwrap_or_default(),
            skipped_branches: row.get("skipped_branches").unwrap_or_default(),
            started_at: row.get("started_at").unwrap_or_default(),
            finished_at: row.get("finished_at").unwrap_or_default(),
            duration_ms: row.get("duration_ms").unwrap_or_default(),
        })
        .collect())
}

/// Node count per element kind.
pub async fn element_counts(client: &GraphClient) -> Result<Vec<(ElementKind, usize)>> {
    let mut counts = Vec::with_capacity(ElementKind::ALL.len());
    for kind in ElementKind::ALL {
        let query = Query::new(format!("MATCH (n:{}) RETURN count(n) AS count", label(kind)));
        let count: i64 = client.query_scalar(query, "count").await?.unwrap_or(0);
        counts.push((kind, usize::try_from(count).unwrap_or_default()));
    }
    Ok(counts)
}
