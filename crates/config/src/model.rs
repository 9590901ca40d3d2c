//! Configuration value types
//!
//! The typed form of a validated configuration file, plus the ignore-rule
//! engine that turns `ignore` declarations into effective capturable column
//! sets per table.

use pg_track_events_schema::{DatabaseSchema, Table};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// Row-change operation a tracked event is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a `{table}.{insert|update|delete}` track key into its parts.
///
/// Returns `None` when the key does not match the required pattern.
pub fn parse_track_key(key: &str) -> Option<(&str, Operation)> {
    let (table, op) = key.rsplit_once('.')?;
    if table.is_empty()
        || !table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let operation = match op {
        "insert" => Operation::Insert,
        "update" => Operation::Update,
        "delete" => Operation::Delete,
        _ => return None,
    };
    Some((table, operation))
}

/// One event mapping. Exactly one of the two variants holds for any entry;
/// the discriminating key (`cond` vs `event`) decides which.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventConfig {
    /// A condition expression selects one of several named outcomes, each
    /// with its own property map.
    Conditional {
        cond: String,
        outcomes: BTreeMap<String, BTreeMap<String, String>>,
    },
    /// A fixed event name with an optional property map.
    Simple {
        event: String,
        properties: BTreeMap<String, String>,
    },
}

/// Per-table ignore declaration: everything, or a list of columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreRule {
    All,
    Columns(Vec<String>),
}

impl Serialize for IgnoreRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IgnoreRule::All => serializer.serialize_str("*"),
            IgnoreRule::Columns(columns) => columns.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for IgnoreRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Columns(Vec<String>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) if s == "*" => Ok(IgnoreRule::All),
            Raw::Text(other) => Err(D::Error::custom(format!(
                "expected \"*\" or a list of column names, got \"{other}\""
            ))),
            Raw::Columns(columns) => Ok(IgnoreRule::Columns(columns)),
        }
    }
}

/// The ignore-rule engine: maps unqualified table names to ignore rules and
/// applies them over a schema snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreConfig {
    pub rules: BTreeMap<String, IgnoreRule>,
}

impl IgnoreConfig {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_fully_ignored(&self, table: &str) -> bool {
        matches!(self.rules.get(table), Some(IgnoreRule::All))
    }

    pub fn fully_ignored_tables(&self) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|(_, rule)| matches!(rule, IgnoreRule::All))
            .map(|(table, _)| table.as_str())
            .collect()
    }

    /// Columns ignored for a table. Empty for fully-ignored tables, which
    /// must be checked separately via [`IgnoreConfig::is_fully_ignored`].
    pub fn ignored_columns(&self, table: &str) -> HashSet<String> {
        match self.rules.get(table) {
            Some(IgnoreRule::Columns(columns)) => columns.iter().cloned().collect(),
            _ => HashSet::new(),
        }
    }

    /// Effective capturable column set: all columns minus the ignore list.
    pub fn effective_columns(&self, table: &Table) -> HashSet<String> {
        let ignored = self.ignored_columns(&table.name);
        table
            .column_names()
            .into_iter()
            .filter(|name| !ignored.contains(name))
            .collect()
    }

    /// New schema snapshot with fully-ignored tables removed and ignored
    /// columns filtered out of the remaining tables. The input is untouched.
    pub fn filter_schema(&self, schema: &DatabaseSchema) -> DatabaseSchema {
        let tables = schema
            .tables
            .iter()
            .filter(|t| !self.is_fully_ignored(&t.name))
            .map(|t| t.without_columns(&self.ignored_columns(&t.name)))
            .collect();
        DatabaseSchema::new(tables)
    }

}

/// Destination declaration (`destinations` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Static key or `$ENV_VAR` reference
    #[serde(rename = "apiKey")]
    pub api_key: String,
    /// Event filter pattern; `*` forwards everything
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "*".to_string()
}

/// A fully validated configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackConfig {
    pub track: BTreeMap<String, EventConfig>,
    pub ignore: IgnoreConfig,
    pub destinations: BTreeMap<String, DestinationConfig>,
}

/// Read just the `ignore` section of a configuration file.
///
/// A missing file or a missing section yields an empty config (a fresh
/// installation has nothing ignored); unreadable or unparseable files are
/// fatal.
pub fn load_ignore(path: &Path) -> anyhow::Result<IgnoreConfig> {
    use anyhow::Context;

    if !path.exists() {
        return Ok(IgnoreConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let value: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    match value.get("ignore") {
        None => Ok(IgnoreConfig::default()),
        Some(ignore) => serde_yaml::from_value(ignore.clone())
            .with_context(|| format!("invalid `ignore` section in {}", path.display())),
    }
}

/// Record tables as fully ignored in the configuration file on disk.
///
/// Reads the file, updates (or creates) the `ignore` section and writes the
/// document back. This is best-effort bookkeeping for the sync flow: it is
/// never part of the database transaction, and callers report failures
/// without rolling anything back.
pub fn add_to_ignore(path: &Path, tables: &[String]) -> anyhow::Result<()> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let mut doc: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;

    let root = doc
        .as_mapping_mut()
        .context("config file root is not a mapping")?;

    let ignore_key = serde_yaml::Value::from("ignore");
    let ignore = root
        .entry(ignore_key)
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    let ignore = ignore
        .as_mapping_mut()
        .context("`ignore` section is not a mapping")?;

    for table in tables {
        ignore.insert(
            serde_yaml::Value::from(table.as_str()),
            serde_yaml::Value::from("*"),
        );
    }

    let rendered = serde_yaml::to_string(&doc).context("failed to render updated config")?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pg_track_events_schema::Column;

    fn ignore_from_yaml(yaml: &str) -> IgnoreConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_track_key() {
        assert_eq!(
            parse_track_key("users.insert"),
            Some(("users", Operation::Insert))
        );
        assert_eq!(
            parse_track_key("org_members.delete"),
            Some(("org_members", Operation::Delete))
        );
        assert_eq!(parse_track_key("users.upsert"), None);
        assert_eq!(parse_track_key("users"), None);
        assert_eq!(parse_track_key(".insert"), None);
        assert_eq!(parse_track_key("bad-name.update"), None);
    }

    #[test]
    fn test_ignore_rule_parsing() {
        let config = ignore_from_yaml("sessions: \"*\"\nusers:\n  - password_hash\n");

        assert!(config.is_fully_ignored("sessions"));
        assert!(!config.is_fully_ignored("users"));
        assert_eq!(
            config.ignored_columns("users"),
            HashSet::from(["password_hash".to_string()])
        );
        assert_eq!(config.fully_ignored_tables(), vec!["sessions"]);
    }

    #[test]
    fn test_ignore_rule_rejects_other_strings() {
        let result: Result<IgnoreConfig, _> = serde_yaml::from_str("users: everything\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_effective_columns() {
        let table = Table::new(
            "users",
            vec![
                Column::new("id", "bigint"),
                Column::new("email", "text"),
                Column::new("password_hash", "text"),
            ],
        );
        let config = ignore_from_yaml("users:\n  - password_hash\n");

        assert_eq!(
            config.effective_columns(&table),
            HashSet::from(["id".to_string(), "email".to_string()])
        );
    }

    #[test]
    fn test_filter_schema_removes_ignored() {
        let schema = DatabaseSchema::new(vec![
            Table::new("users", vec![Column::new("id", "bigint"), Column::new("ssn", "text")]),
            Table::new("sessions", vec![Column::new("id", "bigint")]),
        ]);
        let config = ignore_from_yaml("sessions: \"*\"\nusers:\n  - ssn\n");

        let filtered = config.filter_schema(&schema);

        assert!(filtered.find_table("sessions").is_none());
        let users = filtered.find_table("users").unwrap();
        assert_eq!(users.column_names(), HashSet::from(["id".to_string()]));
        // Source snapshot unchanged
        assert_eq!(schema.tables.len(), 2);
    }

    #[test]
    fn test_load_ignore_tolerates_missing_file_and_section() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("nope.yaml");
        assert!(load_ignore(&missing).unwrap().is_empty());

        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "track: {}\n").unwrap();
        assert!(load_ignore(&path).unwrap().is_empty());

        std::fs::write(&path, "ignore:\n  sessions: \"*\"\n").unwrap();
        assert!(load_ignore(&path).unwrap().is_fully_ignored("sessions"));
    }

    #[test]
    fn test_add_to_ignore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "track:\n  users.insert:\n    event: user_signup\n").unwrap();

        add_to_ignore(&path, &["sessions".to_string(), "audit_log".to_string()]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(value["ignore"]["sessions"], "*");
        assert_eq!(value["ignore"]["audit_log"], "*");
        // Existing sections survive the rewrite
        assert!(value["track"].get("users.insert").is_some());
    }
}
