//! Schema snapshot types
//!
//! These are read-only snapshots of catalog state. Filtering (e.g. removing
//! ignored columns) always produces a new value; a snapshot is never mutated
//! once shared. The `Serialize` output is the JSON shape consumed by the
//! external expression validator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Attribute flags of a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnAttributes {
    /// True for identity columns and `serial`-style `nextval()` defaults
    #[serde(default)]
    pub auto_increment: bool,
}

/// Constraint flags of a single column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConstraints {
    #[serde(default)]
    pub not_null: bool,
}

/// One table column as introspected from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Default expression, verbatim from the catalog
    pub default: Option<String>,
    pub attributes: ColumnAttributes,
    pub constraints: ColumnConstraints,
}

impl Column {
    /// Create a plain column with no default and no flags set.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            default: None,
            attributes: ColumnAttributes::default(),
            constraints: ColumnConstraints::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    #[serde(rename = "type")]
    pub index_type: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// A trigger as attached to a table in the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub name: String,
    /// INSERT/UPDATE/DELETE events the trigger fires on
    pub events: Vec<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub condition: Option<String>,
    pub for_each_row: bool,
    pub execute_procedure: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyReference {
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub references: ForeignKeyReference,
    pub on_delete: String,
}

/// One table snapshot. `schema` is the namespace the table lives in; `name`
/// is unqualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub indexes: Option<Vec<Index>>,
    pub triggers: Option<Vec<TriggerInfo>>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Option<Vec<ForeignKey>>,
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_schema() -> String {
    "public".to_string()
}

impl Table {
    /// Minimal table snapshot, useful for tests and planning helpers.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            schema: default_schema(),
            name: name.into(),
            columns,
            indexes: None,
            triggers: None,
            primary_key: Vec::new(),
            foreign_keys: None,
            is_deleted: false,
        }
    }

    /// Names of all columns in this snapshot.
    pub fn column_names(&self) -> HashSet<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_trigger(&self, trigger_name: &str) -> bool {
        self.triggers
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|t| t.name == trigger_name)
    }

    /// New snapshot with the given columns removed. The receiver is untouched.
    pub fn without_columns(&self, excluded: &HashSet<String>) -> Table {
        let mut filtered = self.clone();
        filtered.columns.retain(|c| !excluded.contains(&c.name));
        filtered
            .primary_key
            .retain(|name| !excluded.contains(name));
        filtered
    }
}

/// Ordered snapshot of every table in the target schema, produced once per
/// run by the introspector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: Vec<Table>,
}

impl DatabaseSchema {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Look up a table by name, accepting both `users` and `public.users`
    /// spellings.
    pub fn find_table(&self, name: &str) -> Option<&Table> {
        let (schema, bare) = match name.split_once('.') {
            Some((schema, bare)) => (Some(schema), bare),
            None => (None, name),
        };
        self.tables
            .iter()
            .find(|t| t.name == bare && schema.map_or(true, |s| t.schema == s))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> Table {
        Table::new(
            "users",
            vec![
                Column::new("id", "bigint"),
                Column::new("email", "text"),
                Column::new("password_hash", "text"),
            ],
        )
    }

    #[test]
    fn test_find_table_accepts_qualified_names() {
        let schema = DatabaseSchema::new(vec![users_table()]);

        assert!(schema.find_table("users").is_some());
        assert!(schema.find_table("public.users").is_some());
        assert!(schema.find_table("audit.users").is_none());
        assert!(schema.find_table("orders").is_none());
        assert_eq!(schema.table_names(), vec!["users"]);
        assert!(!schema.is_empty());
    }

    #[test]
    fn test_without_columns_is_a_new_snapshot() {
        let table = users_table();
        let excluded: HashSet<String> = ["password_hash".to_string()].into();

        let filtered = table.without_columns(&excluded);

        assert_eq!(filtered.column_names().len(), 2);
        assert!(!filtered.column_names().contains("password_hash"));
        // The source snapshot is untouched
        assert_eq!(table.columns.len(), 3);
    }

    #[test]
    fn test_serializes_to_validator_wire_shape() {
        let table = users_table();
        let json = serde_json::to_value(&table).unwrap();

        assert_eq!(json["name"], "users");
        assert_eq!(json["columns"][0]["type"], "bigint");
        assert_eq!(json["isDeleted"], false);
        assert!(json["primaryKey"].as_array().unwrap().is_empty());
    }
}
