//! End-to-end reconciliation scenarios without a live database: plan from a
//! schema snapshot, stage through the SQL builder, deliver against a mock
//! executor.

use async_trait::async_trait;
use pg_track_events_config::IgnoreConfig;
use pg_track_events_schema::{Column, DatabaseSchema, Table, TriggerInfo};
use pg_track_events_trigger::{
    audit_trigger_name, log_changes_function, plan_sync, qualified_audit_function_name,
    stage_plan, SqlBuilder, SqlExecutor,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct MockExecutor {
    log: Mutex<Vec<String>>,
    fail_on: Option<&'static str>,
}

impl MockExecutor {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    fn failing_on(marker: &'static str) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            fail_on: Some(marker),
        }
    }

    fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for MockExecutor {
    async fn execute(&self, sql: &str) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(sql.to_string());
        if let Some(marker) = self.fail_on {
            if sql.contains(marker) {
                anyhow::bail!("simulated database failure");
            }
        }
        Ok(())
    }
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

/// users drifted (captures an extra column), sessions is newly ignored but
/// still carries a trigger, orders is newly discovered.
fn drifted_fixture() -> (DatabaseSchema, HashMap<String, String>, IgnoreConfig) {
    let schema = DatabaseSchema::new(vec![
        with_audit_trigger(table("users", &["id", "email", "password_hash"])),
        with_audit_trigger(table("sessions", &["id", "token"])),
        table("orders", &["id", "total"]),
    ]);

    let all_users: HashSet<String> = ["id", "email", "password_hash"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let all_sessions: HashSet<String> = ["id", "token"].iter().map(|s| s.to_string()).collect();
    let deployed = HashMap::from([
        (
            "users".to_string(),
            log_changes_function("users", &all_users).1,
        ),
        (
            "sessions".to_string(),
            log_changes_function("sessions", &all_sessions).1,
        ),
    ]);

    let ignore: IgnoreConfig =
        serde_yaml::from_str("sessions: \"*\"\nusers:\n  - password_hash\n").unwrap();

    (schema, deployed, ignore)
}

#[test]
fn test_plan_covers_drift_ignore_and_discovery() {
    let (schema, deployed, ignore) = drifted_fixture();

    let plan = plan_sync(&schema, &deployed, &ignore);

    assert_eq!(plan.drops, vec!["sessions"]);
    assert_eq!(plan.updates.len(), 1);
    assert_eq!(plan.updates[0].table, "users");
    assert_eq!(
        plan.updates[0].columns,
        ["id", "email"].iter().map(|s| s.to_string()).collect()
    );
    assert_eq!(plan.tables_without_triggers(), vec!["orders"]);
}

#[tokio::test]
async fn test_staged_changes_apply_in_one_transaction() {
    let (schema, deployed, ignore) = drifted_fixture();
    let plan = plan_sync(&schema, &deployed, &ignore);

    let executor = MockExecutor::new();
    let mut builder = SqlBuilder::new(&executor);
    stage_plan(&plan, "public", &mut builder);

    // drop + function update + (function + trigger) for the new table
    assert_eq!(builder.len(), 4);
    builder.commit(true).await.unwrap();

    let executed = executor.executed();
    assert_eq!(executed.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(executed.last().map(String::as_str), Some("COMMIT"));
    assert!(executed[1].contains("DROP TRIGGER IF EXISTS sessions_audit_trigger"));
    assert!(executed[2].contains("log_users_changes"));
    assert!(!executed[2].contains("password_hash"));
    assert!(executed[4].contains("CREATE TRIGGER orders_audit_trigger"));
}

#[tokio::test]
async fn test_mid_batch_failure_rolls_back_everything() {
    let (schema, deployed, ignore) = drifted_fixture();
    let plan = plan_sync(&schema, &deployed, &ignore);

    let executor = MockExecutor::failing_on("orders_audit_trigger");
    let mut builder = SqlBuilder::new(&executor);
    stage_plan(&plan, "public", &mut builder);

    let err = builder.commit(true).await.unwrap_err();

    let executed = executor.executed();
    assert_eq!(executed.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!executed.contains(&"COMMIT".to_string()));
    // The failure names the statement that broke the batch
    assert!(err.to_string().contains("orders_audit_trigger"));
    assert!(builder.is_empty());
}

#[test]
fn test_staged_sql_is_deterministic() {
    let (schema, deployed, ignore) = drifted_fixture();

    let executor = MockExecutor::new();
    let mut first = SqlBuilder::new(&executor);
    stage_plan(&plan_sync(&schema, &deployed, &ignore), "public", &mut first);
    let mut second = SqlBuilder::new(&executor);
    stage_plan(&plan_sync(&schema, &deployed, &ignore), "public", &mut second);

    assert_eq!(first.dump(), second.dump());
}
