//! # catsync core
//!
//! Mirrors the catalog structure of a relational source (databases, schemas,
//! tables, columns, primary/foreign keys) into a metadata graph and keeps the
//! graph in step with the source across repeated passes.
//!
//! Identity across passes is the qualified name of each element, never a
//! stored id mapping.

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod model;
pub mod pipeline;
pub mod poller;
pub mod reconcile;
pub mod retry;

pub use adapter::{MemoryCatalog, SnapshotSource, SourceCatalog, TargetCatalog};
pub use config::{FilterLevel, NameFilters, SyncOptions};
pub use error::{SyncError, SyncResult};
pub use events::{batch_events, create_event_channel, publish, ChangeEvent, EventReceiver, EventScope, EventSender};
pub use model::{qualified_name_of, ElementKind, ElementProps, Guid, TargetElement};
pub use pipeline::{AppliedChange, ChangeAction, ChangeSet, PassReport, PassStatus, SyncCounts, SyncPipeline};
pub use poller::SyncPoller;
pub use retry::{wait_until_available, Backoff, RetryPolicy};
