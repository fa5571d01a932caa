//! `TargetCatalog` over the Neo4j metadata graph.
//!
//! Each element is a node labelled by kind with `guid`, `qualified_name`,
//! `display_name`, `kind` and a JSON copy of its properties; the properties
//! are also flattened onto the node so they can be queried directly.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use neo4rs::Query;
use tracing::{debug, warn};

use catsync_core::identity::element_guid;
use catsync_core::model::{ForeignKeyProps, PrimaryKeyProps, Properties, PropertyValue};
use catsync_core::{ElementKind, ElementProps, Guid, PassReport, TargetCatalog, TargetElement};

use crate::{history, schema, GraphClient};

/// Node properties managed by catsync itself.
const RESERVED_KEYS: &[&str] = &[
    "guid",
    "qualified_name",
    "display_name",
    "kind",
    "properties",
    "primary_key",
    "primary_key_name",
];

/// The node label for an element kind.
pub fn label(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Database => "Database",
        ElementKind::ConnectorType => "ConnectorType",
        ElementKind::Connection => "Connection",
        ElementKind::Endpoint => "Endpoint",
        ElementKind::Schema => "Schema",
        ElementKind::Table => "Table",
        ElementKind::Column => "Column",
    }
}

/// Node pattern for the owner of a `kind` element, labelled so the per-label
/// `guid` index applies. Tables hang off a schema or, when schemaless, the database.
fn parent_pattern(kind: ElementKind) -> &'static str {
    match kind {
        ElementKind::Schema | ElementKind::Connection => "p:Database",
        ElementKind::Table => "p:Schema|Database",
        ElementKind::Column => "p:Table",
        ElementKind::Endpoint => "p:Connection",
        ElementKind::Database | ElementKind::ConnectorType => "p",
    }
}

/// Whether a property key can be written as a flattened node property.
fn is_flattenable(key: &str) -> bool {
    !key.is_empty()
        && key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !RESERVED_KEYS.contains(&key)
}

/// `SET` clause for the flattened properties, plus the parameter each one binds.
fn flattened_assignments<'a>(node: &str, properties: &'a Properties) -> (String, Vec<(String, &'a PropertyValue)>) {
    let mut clause = String::new();
    let mut params = Vec::new();
    for (key, value) in properties {
        if !is_flattenable(key) {
            debug!(key, "Property key kept in JSON only");
            continue;
        }
        let param = format!("p{}", params.len());
        clause.push_str(&format!(" SET {node}.{key} = ${param}"));
        params.push((param, value));
    }
    (clause, params)
}

fn bind(query: Query, name: &str, value: &PropertyValue) -> Query {
    match value {
        PropertyValue::Flag(flag) => query.param(name, *flag),
        PropertyValue::Integer(number) => query.param(name, *number),
        PropertyValue::Text(text) => query.param(name, text.as_str()),
    }
}

/// Bind the common node fields and the flattened properties.
fn bind_element(mut query: Query, kind: ElementKind, guid: &Guid, props: &ElementProps, flattened: &[(String, &PropertyValue)]) -> Result<Query> {
    let properties = serde_json::to_string(&props.properties)?;
    query = query
        .param("guid", guid.as_str())
        .param("qualified_name", props.qualified_name.as_str())
        .param("display_name", props.display_name.as_str())
        .param("kind", kind.as_str())
        .param("properties", properties);
    for (name, value) in flattened {
        query = bind(query, name, value);
    }
    Ok(query)
}

const ELEMENT_FIELDS: &str = "{guid: $guid, qualified_name: $qualified_name, display_name: $display_name, kind: $kind, properties: $properties}";

/// Stored properties; a corrupt value reads as empty and is rewritten by the next update.
fn parse_properties(guid: &str, properties_json: &str) -> Properties {
    match serde_json::from_str(properties_json) {
        Ok(properties) => properties,
        Err(err) => {
            warn!(guid, error = %err, "Corrupt properties JSON on node; treating as empty");
            Properties::default()
        }
    }
}

fn element_from_row(row: &neo4rs::Row) -> TargetElement {
    let guid: String = row.get("guid").unwrap_or_default();
    let properties_json: String = row.get("properties").unwrap_or_default();
    let properties = parse_properties(&guid, &properties_json);
    TargetElement {
        guid: Guid::new(guid),
        qualified_name: row.get("qualified_name").unwrap_or_default(),
        display_name: row.get("display_name").unwrap_or_default(),
        properties,
        parent_guid: row.get::<String>("parent_guid").ok().map(Guid::new),
    }
}

/// Target catalog writing to Neo4j.
#[derive(Clone)]
pub struct GraphCatalog {
    client: GraphClient,
}

impl GraphCatalog {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }
}

#[async_trait]
impl TargetCatalog for GraphCatalog {
    async fn find_by_qualified_name(&self, kind: ElementKind, qualified_name: &str) -> Result<Vec<TargetElement>> {
        let label = label(kind);
        let query = Query::new(format!(
            "MATCH (n:{label} {{qualified_name: $qualified_name}})
             OPTIONAL MATCH (p)-[:CONTAINS]->(n)
             RETURN n.guid AS guid, n.qualified_name AS qualified_name,
                    n.display_name AS display_name, n.properties AS properties,
                    p.guid AS parent_guid"
        ))
        .param("qualified_name", qualified_name);

        let rows = self.client.query(query).await?;
        Ok(rows.iter().map(element_from_row).collect())
    }

    async fn children_of(&self, kind: ElementKind, parent: &Guid) -> Result<Vec<TargetElement>> {
        let label = label(kind);
        let parent_pattern = parent_pattern(kind);
        let query = Query::new(format!(
            "MATCH ({parent_pattern} {{guid: $parent}})-[:CONTAINS]->(n:{label})
             RETURN n.guid AS guid, n.qualified_name AS qualified_name,
                    n.display_name AS display_name, n.properties AS properties,
                    p.guid AS parent_guid"
        ))
        .param("parent", parent.as_str());

        let rows = self.client.query(query).await?;
        Ok(rows.iter().map(element_from_row).collect())
    }

    async fn create(&self, kind: ElementKind, parent: Option<&Guid>, props: &ElementProps) -> Result<Guid> {
        let label = label(kind);
        let parent_pattern = parent_pattern(kind);
        let guid = element_guid(kind, &props.qualified_name);
        let (assignments, flattened) = flattened_assignments("n", &props.properties);

        let text = match parent {
            Some(_) => format!(
                "MATCH ({parent_pattern} {{guid: $parent}})
                 CREATE (p)-[:CONTAINS]->(n:{label} {ELEMENT_FIELDS}){assignments}
                 RETURN n.guid AS guid"
            ),
            None => format!("CREATE (n:{label} {ELEMENT_FIELDS}){assignments} RETURN n.guid AS guid"),
        };
        let mut query = bind_element(Query::new(text), kind, &guid, props, &flattened)?;
        if let Some(parent) = parent {
            query = query.param("parent", parent.as_str());
        }

        let created: Option<String> = self.client.query_scalar(query, "guid").await?;
        if created.is_none() {
            bail!(
                "parent {} of '{}' does not exist",
                parent.map(Guid::as_str).unwrap_or_default(),
                props.qualified_name
            );
        }
        debug!(%kind, qualified_name = %props.qualified_name, %guid, "Created node");
        Ok(guid)
    }

    /// Replaces every node property except the primary-key flags.
    async fn update(&self, kind: ElementKind, guid: &Guid, props: &ElementProps) -> Result<()> {
        let label = label(kind);
        let (assignments, flattened) = flattened_assignments("n", &props.properties);
        let text = format!(
            "MATCH (n:{label} {{guid: $guid}})
             WITH n, n.primary_key AS pk, n.primary_key_name AS pk_name
             SET n = {ELEMENT_FIELDS}{assignments}
             SET n.primary_key = pk, n.primary_key_name = pk_name
             RETURN n.guid AS guid"
        );
        let query = bind_element(Query::new(text), kind, guid, props, &flattened)?;

        let updated: Option<String> = self.client.query_scalar(query, "guid").await?;
        if updated.is_none() {
            bail!("{} {} does not exist", kind, guid);
        }
        Ok(())
    }

    async fn remove(&self, kind: ElementKind, guid: &Guid, qualified_name: &str) -> Result<usize> {
        let label = label(kind);
        let query = Query::new(format!(
            "MATCH (n:{label} {{guid: $guid}})
             OPTIONAL MATCH (n)-[:CONTAINS*]->(owned)
             WITH n, collect(DISTINCT owned) AS owned
             WITH [n] + owned AS doomed
             UNWIND doomed AS x
             DETACH DELETE x
             RETURN count(*) AS removed"
        ))
        .param("guid", guid.as_str());

        let removed: i64 = self.client.query_scalar(query, "removed").await?.unwrap_or(0);
        if removed == 0 {
            bail!("{} {} ('{}') does not exist", kind, guid, qualified_name);
        }
        debug!(%kind, qualified_name, removed, "Removed node subtree");
        Ok(usize::try_from(removed).unwrap_or_default())
    }

    async fn set_primary_key(&self, column: &Guid, props: &PrimaryKeyProps) -> Result<()> {
        let text = match props.key_name {
            Some(_) => "MATCH (c:Column {guid: $guid})
                        SET c.primary_key = true, c.primary_key_name = $key_name
                        RETURN c.guid AS guid",
            None => "MATCH (c:Column {guid: $guid})
                     SET c.primary_key = true REMOVE c.primary_key_name
                     RETURN c.guid AS guid",
        };
        let mut query = Query::new(text.to_string()).param("guid", column.as_str());
        if let Some(key_name) = &props.key_name {
            query = query.param("key_name", key_name.as_str());
        }

        let flagged: Option<String> = self.client.query_scalar(query, "guid").await?;
        if flagged.is_none() {
            bail!("column {} does not exist", column);
        }
        Ok(())
    }

    async fn primary_keys_of(&self, table: &Guid) -> Result<BTreeMap<Guid, PrimaryKeyProps>> {
        let query = Query::new(
            "MATCH (:Table {guid: $table})-[:CONTAINS]->(c:Column)
             WHERE c.primary_key = true
             RETURN c.guid AS guid, c.primary_key_name AS key_name"
                .to_string(),
        )
        .param("table", table.as_str());

        let rows = self.client.query(query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let guid: String = row.get("guid").ok()?;
                let key_name = row.get::<String>("key_name").ok();
                Some((Guid::new(guid), PrimaryKeyProps { key_name }))
            })
            .collect())
    }

    async fn clear_primary_key(&self, column: &Guid) -> Result<()> {
        let query = Query::new(
            "MATCH (c:Column {guid: $guid})
             REMOVE c.primary_key, c.primary_key_name
             RETURN c.guid AS guid"
                .to_string(),
        )
        .param("guid", column.as_str());

        let cleared: Option<String> = self.client.query_scalar(query, "guid").await?;
        if cleared.is_none() {
            bail!("column {} does not exist", column);
        }
        Ok(())
    }

    async fn foreign_key_link(&self, from: &Guid, to: &Guid) -> Result<Option<ForeignKeyProps>> {
        let query = Query::new(
            "MATCH (:Column {guid: $from})-[r:REFERENCES]->(:Column {guid: $to})
             RETURN r.constraint_name AS constraint_name"
                .to_string(),
        )
        .param("from", from.as_str())
        .param("to", to.as_str());

        let rows = self.client.query(query).await?;
        Ok(rows.first().map(|row| {
            let constraint_name: String = row.get("constraint_name").unwrap_or_default();
            ForeignKeyProps {
                constraint_name: Some(constraint_name).filter(|name| !name.is_empty()),
            }
        }))
    }

    async fn set_foreign_key_link(&self, from: &Guid, to: &Guid, props: &ForeignKeyProps) -> Result<()> {
        let query = Query::new(
            "MATCH (a:Column {guid: $from}), (b:Column {guid: $to})
             MERGE (a)-[r:REFERENCES]->(b)
             SET r.constraint_name = $constraint_name
             RETURN count(r) AS linked"
                .to_string(),
        )
        .param("from", from.as_str())
        .param("to", to.as_str())
        .param("constraint_name", props.constraint_name.as_deref().unwrap_or_default());

        let linked: i64 = self.client.query_scalar(query, "linked").await?.unwrap_or(0);
        if linked == 0 {
            bail!("columns {} and {} must both exist to be linked", from, to);
        }
        Ok(())
    }

    async fn is_ready(&self) -> Result<bool> {
        schema::schema_ready(&self.client).await
    }

    async fn record_pass(&self, report: &PassReport) -> Result<()> {
        history::record_run(&self.client, report).await
    }
}
