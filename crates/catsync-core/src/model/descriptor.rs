//! Source-side descriptors, one per catalog level.
//!
//! Descriptors are created fresh on every pass and compared by value. The
//! source reports each foreign key twice (imported and exported), so
//! `ForeignKeyDescriptor` equality and hashing must deduplicate them.

use serde::{Deserialize, Serialize};

use super::{qualified_name_of, ElementKind, ElementProps, Properties};

/// A source fact that becomes a child element under a parent scope.
pub trait Descriptor: Clone + Send + Sync + 'static {
    /// The element kind this descriptor reconciles into.
    const KIND: ElementKind;

    fn local_name(&self) -> &str;

    fn parent_qualified_name(&self) -> &str;

    /// Type-specific properties written on create and update.
    fn properties(&self) -> Properties;

    fn qualified_name(&self) -> String {
        qualified_name_of(self.parent_qualified_name(), self.local_name())
    }

    fn element_props(&self) -> ElementProps {
        ElementProps {
            qualified_name: self.qualified_name(),
            display_name: self.local_name().to_string(),
            properties: self.properties(),
        }
    }
}

/// Identity of the source database (server/connection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseDescriptor {
    pub qualified_name: String,
    pub display_name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_version: String,
    #[serde(default)]
    pub driver_name: String,
    #[serde(default)]
    pub source_uri: String,
}

impl DatabaseDescriptor {
    pub fn element_props(&self) -> ElementProps {
        ElementProps::new(&self.qualified_name, &self.display_name)
            .with("product_name", self.product_name.as_str())
            .with("product_version", self.product_version.as_str())
            .with("driver_name", self.driver_name.as_str())
            .with("source_uri", self.source_uri.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub name: String,
    pub owner: Option<String>,
    pub parent_qualified_name: String,
}

impl Descriptor for SchemaDescriptor {
    const KIND: ElementKind = ElementKind::Schema;

    fn local_name(&self) -> &str {
        &self.name
    }

    fn parent_qualified_name(&self) -> &str {
        &self.parent_qualified_name
    }

    fn properties(&self) -> Properties {
        let mut props = Properties::new();
        if let Some(owner) = &self.owner {
            props.insert("owner".to_string(), owner.as_str().into());
        }
        props
    }
}

/// Whether a relation is a base table or a view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableKind {
    #[default]
    Table,
    View,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub name: String,
    pub kind: TableKind,
    pub parent_qualified_name: String,
}

impl Descriptor for TableDescriptor {
    const KIND: ElementKind = ElementKind::Table;

    fn local_name(&self) -> &str {
        &self.name
    }

    fn parent_qualified_name(&self) -> &str {
        &self.parent_qualified_name
    }

    fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("table_kind".to_string(), self.kind.as_str().into());
        props
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub ordinal: u32,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub parent_qualified_name: String,
}

impl Descriptor for ColumnDescriptor {
    const KIND: ElementKind = ElementKind::Column;

    fn local_name(&self) -> &str {
        &self.name
    }

    fn parent_qualified_name(&self) -> &str {
        &self.parent_qualified_name
    }

    fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("ordinal".to_string(), i64::from(self.ordinal).into());
        props.insert("data_type".to_string(), self.data_type.as_str().into());
        props.insert("nullable".to_string(), self.nullable.into());
        if let Some(default) = &self.default_value {
            props.insert("default_value".to_string(), default.as_str().into());
        }
        props
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryKeyDescriptor {
    pub table_qualified_name: String,
    pub column_name: String,
    pub key_name: Option<String>,
}

/// One foreign-key column pair.
///
/// `None` schemas denote tables that live directly under the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyDescriptor {
    pub referencing_schema: Option<String>,
    pub referencing_table: String,
    pub referencing_column: String,
    pub referenced_schema: Option<String>,
    pub referenced_table: String,
    pub referenced_column: String,
    pub constraint_name: Option<String>,
}

impl ForeignKeyDescriptor {
    pub fn referencing_table_qualified_name(&self, database_qualified_name: &str) -> String {
        table_qualified_name(
            database_qualified_name,
            self.referencing_schema.as_deref(),
            &self.referencing_table,
        )
    }

    pub fn referencing_column_qualified_name(&self, database_qualified_name: &str) -> String {
        qualified_name_of(
            &self.referencing_table_qualified_name(database_qualified_name),
            &self.referencing_column,
        )
    }

    pub fn referenced_column_qualified_name(&self, database_qualified_name: &str) -> String {
        let table = table_qualified_name(
            database_qualified_name,
            self.referenced_schema.as_deref(),
            &self.referenced_table,
        );
        qualified_name_of(&table, &self.referenced_column)
    }
}

/// Qualified name of a table, with or without an enclosing schema.
pub fn table_qualified_name(database_qualified_name: &str, schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) => qualified_name_of(&qualified_name_of(database_qualified_name, schema), table),
        None => qualified_name_of(database_qualified_name, table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn orders_fk(constraint: Option<&str>) -> ForeignKeyDescriptor {
        ForeignKeyDescriptor {
            referencing_schema: Some("public".to_string()),
            referencing_table: "orders".to_string(),
            referencing_column: "customer_id".to_string(),
            referenced_schema: Some("public".to_string()),
            referenced_table: "customers".to_string(),
            referenced_column: "id".to_string(),
            constraint_name: constraint.map(str::to_string),
        }
    }

    #[test]
    fn test_foreign_key_dedup_by_value() {
        let mut keys = HashSet::new();
        assert!(keys.insert(orders_fk(Some("orders_customer_fk"))));
        assert!(!keys.insert(orders_fk(Some("orders_customer_fk"))));
        assert!(keys.insert(orders_fk(None)));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_foreign_key_column_names() {
        let fk = orders_fk(None);
        assert_eq!(
            fk.referencing_column_qualified_name("pg::shop"),
            "pg::shop::public::orders::customer_id"
        );
        assert_eq!(fk.referenced_column_qualified_name("pg::shop"), "pg::shop::public::customers::id");
    }

    #[test]
    fn test_schemaless_table_name() {
        assert_eq!(table_qualified_name("db", None, "t"), "db::t");
        assert_eq!(table_qualified_name("db", Some("s"), "t"), "db::s::t");
    }

    #[test]
    fn test_column_properties() {
        let column = ColumnDescriptor {
            name: "id".to_string(),
            ordinal: 1,
            data_type: "INTEGER".to_string(),
            nullable: false,
            default_value: None,
            parent_qualified_name: "db::main::orders".to_string(),
        };
        let props = column.element_props();
        assert_eq!(props.qualified_name, "db::main::orders::id");
        assert_eq!(props.display_name, "id");
        assert_eq!(props.properties.get("ordinal"), Some(&1i64.into()));
        assert!(!props.properties.contains_key("default_value"));
    }
}
