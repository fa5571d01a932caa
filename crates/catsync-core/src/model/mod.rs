//! Catalog element model: kinds, GUIDs, properties and target elements.

pub mod descriptor;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use descriptor::{
    ColumnDescriptor, DatabaseDescriptor, Descriptor, ForeignKeyDescriptor, PrimaryKeyDescriptor,
    SchemaDescriptor, TableDescriptor, TableKind,
};

/// Separator between a parent qualified name and a local name.
pub const QUALIFIED_NAME_SEPARATOR: &str = "::";

/// Derive the qualified name of a child element from its parent.
///
/// Always `parent + "::" + local`; the same source facts give the same
/// qualified name on every pass, which makes it the cross-run identity key.
pub fn qualified_name_of(parent: &str, local: &str) -> String {
    format!("{parent}{QUALIFIED_NAME_SEPARATOR}{local}")
}

/// Kind of element in the metadata graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Database,
    ConnectorType,
    Connection,
    Endpoint,
    Schema,
    Table,
    Column,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        Self::Database,
        Self::ConnectorType,
        Self::Connection,
        Self::Endpoint,
        Self::Schema,
        Self::Table,
        Self::Column,
    ];

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::ConnectorType => "connector_type",
            Self::Connection => "connection",
            Self::Endpoint => "endpoint",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Column => "column",
        }
    }

    /// Whether changes to this kind are grouped with the shared root objects
    /// rather than with a single table.
    pub fn is_above_table(&self) -> bool {
        !matches!(self, Self::Table | Self::Column)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, store-issued element identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A type-specific property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Integer(i64),
    Text(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

/// Type-specific properties, ordered for stable writes and comparisons.
pub type Properties = BTreeMap<String, PropertyValue>;

/// The writable part of an element: what create and update send to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementProps {
    pub qualified_name: String,
    pub display_name: String,
    pub properties: Properties,
}

impl ElementProps {
    pub fn new(qualified_name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            display_name: display_name.into(),
            properties: Properties::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// An element persisted in the metadata graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetElement {
    pub guid: Guid,
    pub qualified_name: String,
    pub display_name: String,
    pub properties: Properties,
    pub parent_guid: Option<Guid>,
}

impl TargetElement {
    pub fn from_props(guid: Guid, parent_guid: Option<Guid>, props: &ElementProps) -> Self {
        Self {
            guid,
            qualified_name: props.qualified_name.clone(),
            display_name: props.display_name.clone(),
            properties: props.properties.clone(),
            parent_guid,
        }
    }
}

/// Properties recorded when a column is flagged as part of a primary key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyProps {
    pub key_name: Option<String>,
}

/// Properties recorded on a foreign-key link between two columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyProps {
    pub constraint_name: Option<String>,
}
