//! Deterministic element identity.
//!
//! GUIDs are name-based UUIDs (v5) derived from the element kind and its
//! qualified name under a fixed namespace. The same qualified name yields the
//! same GUID on every pass and after process restarts, so no id-mapping store
//! is needed.

use uuid::Uuid;

use crate::model::{ElementKind, Guid};

/// Namespace for catalog element GUIDs. Changing it re-keys every graph.
const CATALOG_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c2a2e_4b7d_5c3e_9a41_2d8e5f0b7c13);

/// GUID for an element of `kind` with the given qualified name.
pub fn element_guid(kind: ElementKind, qualified_name: &str) -> Guid {
    let name = format!("{}:{}", kind.as_str(), qualified_name);
    Guid::new(Uuid::new_v5(&CATALOG_NAMESPACE, name.as_bytes()).to_string())
}
