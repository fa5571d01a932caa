//! # catsync graph
//!
//! Neo4j target for catalog reconciliation.
//!
//! Elements are nodes labelled by kind and keyed by `guid`; ownership is a
//! `(parent)-[:CONTAINS]->(child)` edge, foreign keys are
//! `(column)-[:REFERENCES]->(column)` edges, and every pass leaves a
//! `:SyncRun` node behind.

pub mod catalog;
pub mod client;
pub mod history;
pub mod schema;

pub use catalog::{label, GraphCatalog};
pub use client::{GraphClient, GraphConfig, GraphCounts};
pub use history::{element_counts, recent_runs, SyncRunRecord};
pub use schema::{initialize_schema, schema_ready};
