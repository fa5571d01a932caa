//! Change events emitted after a pass.
//!
//! A finished pass is split into one event per touched table (the table, its
//! columns and their key relationships) plus one event for the shared root
//! objects. Events travel over a tokio broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::{AppliedChange, PassReport, PassStatus};

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What an event covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventScope {
    /// Database, connection structure and schemas.
    Shared,
    /// One table and everything it owns.
    Table { qualified_name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: Uuid,
    pub database_qualified_name: String,
    pub status: PassStatus,
    pub scope: EventScope,
    pub changes: Vec<AppliedChange>,
    pub emitted_at: DateTime<Utc>,
}

pub type EventSender = broadcast::Sender<ChangeEvent>;
pub type EventReceiver = broadcast::Receiver<ChangeEvent>;

pub fn create_event_channel(capacity: usize) -> EventSender {
    let (tx, _rx) = broadcast::channel(capacity.max(1));
    tx
}

/// Group a pass's applied changes into events. A pass that never identified
/// its database, or changed nothing, yields no events.
pub fn batch_events(report: &PassReport) -> Vec<ChangeEvent> {
    let Some(database) = report.database_qualified_name.as_deref() else {
        return Vec::new();
    };

    let emitted_at = Utc::now();
    let event = |scope: EventScope, changes: Vec<AppliedChange>| ChangeEvent {
        event_id: Uuid::new_v4(),
        database_qualified_name: database.to_string(),
        status: report.status,
        scope,
        changes,
        emitted_at,
    };

    let mut events = Vec::with_capacity(report.changes.tables.len() + 1);
    if !report.changes.shared.is_empty() {
        events.push(event(EventScope::Shared, report.changes.shared.clone()));
    }
    for (table, changes) in &report.changes.tables {
        if changes.is_empty() {
            continue;
        }
        events.push(event(
            EventScope::Table {
                qualified_name: table.clone(),
            },
            changes.clone(),
        ));
    }
    events
}

/// Send events to current subscribers; returns how many were delivered.
/// Having no subscribers is not an error.
pub fn publish(sender: &EventSender, events: Vec<ChangeEvent>) -> usize {
    let mut delivered = 0;
    for event in events {
        match sender.send(event) {
            Ok(_) => delivered += 1,
            Err(_) => {
                debug!("No event subscribers");
                break;
            }
        }
    }
    delivered
}
