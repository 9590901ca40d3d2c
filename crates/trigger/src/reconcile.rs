//! Trigger state reconciliation
//!
//! Compares desired capture state (schema columns minus ignore rules)
//! against what is actually deployed (live triggers plus the column sets
//! recovered from their function sources) and computes the minimal set of
//! create/update/drop operations. Planning is pure; loading deployed state
//! and staging SQL are separate steps.
//!
//! Functions are always replaced wholesale with `CREATE OR REPLACE
//! FUNCTION`, never patched, so the forward compiler stays the single
//! source of truth for SQL shape.

use crate::log_changes::{extract_columns_from_function, log_changes_function};
use crate::set_utils::is_equal;
use crate::{audit_function_name, audit_trigger_name, qualified_audit_function_name, AUDIT_SCHEMA};
use crate::sql_builder::SqlBuilder;
use anyhow::Result;
use pg_track_events_config::IgnoreConfig;
use pg_track_events_schema::{fetch_function_source, DatabaseSchema};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One table whose trigger function must be (re)deployed with a column set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerChange {
    pub table: String,
    pub columns: HashSet<String>,
}

/// The minimal set of operations that brings deployed trigger state in line
/// with the configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    /// Tables without a trigger that should get one
    pub creates: Vec<TriggerChange>,
    /// Tables whose deployed function captures the wrong column set
    pub updates: Vec<TriggerChange>,
    /// Tables newly marked fully-ignored that still carry a trigger
    pub drops: Vec<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.drops.is_empty()
    }

    /// Names of newly-discovered tables, for offering to a selection layer.
    pub fn tables_without_triggers(&self) -> Vec<&str> {
        self.creates.iter().map(|c| c.table.as_str()).collect()
    }

    /// Drop creates for tables the user rejected.
    pub fn retain_creates(&mut self, selected: &HashSet<String>) {
        self.creates.retain(|c| selected.contains(&c.table));
    }
}

/// Compute the reconciliation plan.
///
/// `deployed_functions` maps table name to the source text of its deployed
/// audit function, which is ground truth for the currently-captured column
/// set.
pub fn plan_sync(
    schema: &DatabaseSchema,
    deployed_functions: &HashMap<String, String>,
    ignore: &IgnoreConfig,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for table in &schema.tables {
        let trigger_name = audit_trigger_name(&table.name);
        let has_trigger = table.has_trigger(&trigger_name);

        if ignore.is_fully_ignored(&table.name) {
            if has_trigger {
                plan.drops.push(table.name.clone());
            }
            continue;
        }

        let desired = ignore.effective_columns(table);

        if !has_trigger {
            plan.creates.push(TriggerChange {
                table: table.name.clone(),
                columns: desired,
            });
            continue;
        }

        match deployed_functions.get(&table.name) {
            Some(function_sql) => {
                let captured = extract_columns_from_function(function_sql);
                if !is_equal(&desired, &captured) {
                    debug!(
                        "table {} captures {} columns, wants {}",
                        table.name,
                        captured.len(),
                        desired.len()
                    );
                    plan.updates.push(TriggerChange {
                        table: table.name.clone(),
                        columns: desired,
                    });
                }
            }
            // Trigger attached but its function is gone: redeploy
            None => plan.updates.push(TriggerChange {
                table: table.name.clone(),
                columns: desired,
            }),
        }
    }

    plan
}

/// Translate a plan into described statements on the builder. Drops are
/// staged first, then function updates, then new trigger installations.
pub fn stage_plan(plan: &SyncPlan, target_schema: &str, builder: &mut SqlBuilder<'_>) {
    for table in &plan.drops {
        let trigger = audit_trigger_name(table);
        builder.add(
            format!("DROP TRIGGER IF EXISTS {trigger} ON {target_schema}.\"{table}\";"),
            Some(format!(
                "- {trigger} will be removed from {table} (table ignored in config)"
            )),
        );
    }

    for update in &plan.updates {
        let (function_name, function_sql) = log_changes_function(&update.table, &update.columns);
        builder.add(
            function_sql,
            Some(format!(
                "~ {function_name} will be updated to capture: {}",
                sorted_list(&update.columns)
            )),
        );
    }

    for create in &plan.creates {
        let table = &create.table;
        let trigger = audit_trigger_name(table);
        let (function_name, function_sql) = log_changes_function(table, &create.columns);
        builder.add(
            function_sql,
            Some(format!(
                "+ {function_name} function capturing: {}",
                sorted_list(&create.columns)
            )),
        );
        builder.add(
            format!(
                "CREATE TRIGGER {trigger}
    AFTER INSERT OR UPDATE OR DELETE ON {target_schema}.\"{table}\"
    FOR EACH ROW
    EXECUTE FUNCTION {}();",
                qualified_audit_function_name(table)
            ),
            Some(format!("+ {trigger} trigger on {table} table")),
        );
    }
}

fn sorted_list(columns: &HashSet<String>) -> String {
    let mut columns: Vec<&String> = columns.iter().collect();
    columns.sort();
    columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load the source text of every deployed audit function for tables that
/// currently carry our trigger.
pub async fn load_deployed_functions(
    client: &tokio_postgres::Client,
    schema: &DatabaseSchema,
) -> Result<HashMap<String, String>> {
    let mut deployed = HashMap::new();
    for table in &schema.tables {
        if !table.has_trigger(&audit_trigger_name(&table.name)) {
            continue;
        }
        if let Some(source) =
            fetch_function_source(client, AUDIT_SCHEMA, &audit_function_name(&table.name)).await?
        {
            deployed.insert(table.name.clone(), source);
        }
    }
    Ok(deployed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_builder::SqlExecutor;
    use async_trait::async_trait;
    use pg_track_events_schema::{Column, Table, TriggerInfo};

    struct NullExecutor;

    #[async_trait]
    impl SqlExecutor for NullExecutor {
        async fn execute(&self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn table(name: &str, columns: &[&str]) -> Table {
        Table::new(
            name,
            columns.iter().map(|c| Column::new(*c, "text")).collect(),
        )
    }

    fn with_audit_trigger(mut table: Table) -> Table {
        let name = audit_trigger_name(&table.name);
        table.triggers = Some(vec![TriggerInfo {
            name,
            events: vec!["INSERT".into(), "UPDATE".into(), "DELETE".into()],
            arguments: Vec::new(),
            condition: None,
            for_each_row: true,
            execute_procedure: format!(
                "EXECUTE FUNCTION {}()",
                qualified_audit_function_name(&table.name)
            ),
        }]);
        table
    }

    fn ignore(yaml: &str) -> IgnoreConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn deployed_for(table_name: &str, columns: &[&str]) -> HashMap<String, String> {
        let (_, sql) = log_changes_function(table_name, &set(columns));
        HashMap::from([(table_name.to_string(), sql)])
    }

    #[test]
    fn test_column_drift_stages_exactly_one_update() {
        let schema = DatabaseSchema::new(vec![with_audit_trigger(table("users", &["a", "b", "c"]))]);
        let deployed = deployed_for("users", &["a", "b", "c"]);
        let ignore = ignore("users:\n  - b\n");

        let plan = plan_sync(&schema, &deployed, &ignore);

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].columns, set(&["a", "c"]));
        assert!(plan.creates.is_empty());
        assert!(plan.drops.is_empty());
    }

    #[test]
    fn test_in_sync_table_is_left_alone() {
        let schema = DatabaseSchema::new(vec![with_audit_trigger(table("users", &["a", "b", "c"]))]);
        let deployed = deployed_for("users", &["a", "c"]);
        let ignore = ignore("users:\n  - b\n");

        let plan = plan_sync(&schema, &deployed, &ignore);

        assert!(plan.is_empty());
    }

    #[test]
    fn test_fully_ignored_table_with_trigger_stages_only_a_drop() {
        let schema =
            DatabaseSchema::new(vec![with_audit_trigger(table("sessions", &["id", "token"]))]);
        let deployed = deployed_for("sessions", &["id", "token"]);
        let ignore = ignore("sessions: \"*\"\n");

        let plan = plan_sync(&schema, &deployed, &ignore);
        assert_eq!(plan.drops, vec!["sessions"]);
        assert!(plan.creates.is_empty());
        assert!(plan.updates.is_empty());

        let executor = NullExecutor;
        let mut builder = SqlBuilder::new(&executor);
        stage_plan(&plan, "public", &mut builder);

        assert_eq!(builder.len(), 1);
        let dump = builder.dump();
        assert!(dump.contains("DROP TRIGGER IF EXISTS sessions_audit_trigger"));
        assert!(!dump.contains("CREATE OR REPLACE FUNCTION"));
    }

    #[test]
    fn test_fully_ignored_table_without_trigger_is_skipped() {
        let schema = DatabaseSchema::new(vec![table("sessions", &["id"])]);

        let plan = plan_sync(&schema, &HashMap::new(), &ignore("sessions: \"*\"\n"));

        assert!(plan.is_empty());
    }

    #[test]
    fn test_new_table_stages_function_and_trigger() {
        let schema = DatabaseSchema::new(vec![table("orders", &["id", "total"])]);

        let mut plan = plan_sync(&schema, &HashMap::new(), &IgnoreConfig::default());
        assert_eq!(plan.tables_without_triggers(), vec!["orders"]);

        plan.retain_creates(&set(&["orders"]));
        let executor = NullExecutor;
        let mut builder = SqlBuilder::new(&executor);
        stage_plan(&plan, "public", &mut builder);

        assert_eq!(builder.len(), 2);
        let dump = builder.dump();
        assert!(dump
            .contains("CREATE OR REPLACE FUNCTION schema_pg_track_events.log_orders_changes()"));
        assert!(dump.contains("CREATE TRIGGER orders_audit_trigger"));
        assert!(dump.contains("EXECUTE FUNCTION schema_pg_track_events.log_orders_changes();"));
    }

    #[test]
    fn test_rejected_creates_can_be_filtered_out() {
        let schema = DatabaseSchema::new(vec![
            table("orders", &["id"]),
            table("payments", &["id"]),
        ]);

        let mut plan = plan_sync(&schema, &HashMap::new(), &IgnoreConfig::default());
        assert_eq!(plan.creates.len(), 2);

        plan.retain_creates(&set(&["orders"]));

        assert_eq!(plan.tables_without_triggers(), vec!["orders"]);
    }

    #[test]
    fn test_missing_function_behind_trigger_is_redeployed() {
        let schema = DatabaseSchema::new(vec![with_audit_trigger(table("users", &["id"]))]);

        let plan = plan_sync(&schema, &HashMap::new(), &IgnoreConfig::default());

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].table, "users");
    }

    #[test]
    fn test_legacy_unquoted_deployment_diffs_correctly() {
        // A function deployed by the earlier compiler shape still reads back
        // exactly, so an unchanged column set stays a no-op.
        let legacy_sql = "json_build_object('id', NEW.id, 'total', NEW.total)";
        let schema = DatabaseSchema::new(vec![with_audit_trigger(table("orders", &["id", "total"]))]);
        let deployed = HashMap::from([("orders".to_string(), legacy_sql.to_string())]);

        let plan = plan_sync(&schema, &deployed, &IgnoreConfig::default());

        assert!(plan.is_empty());
    }
}
