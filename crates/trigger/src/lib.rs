//! Audit trigger deployment for pg-track-events
//!
//! Compiles per-table trigger functions that capture row changes into the
//! `schema_pg_track_events.event_log` audit table, stages SQL through an
//! ordered, described builder with transactional apply, and reconciles
//! deployed trigger state against the desired configuration.

pub mod log_changes;
pub mod reconcile;
pub mod set_utils;
pub mod sql_builder;

pub use log_changes::{extract_columns_from_function, log_changes_function};
pub use reconcile::{load_deployed_functions, plan_sync, stage_plan, SyncPlan, TriggerChange};
pub use sql_builder::{SqlBuilder, SqlBuilderError, SqlExecutor};

/// Schema that holds the audit table, the event-type enum and every
/// generated trigger function.
pub const AUDIT_SCHEMA: &str = "schema_pg_track_events";

/// Fully qualified audit table.
pub const EVENT_LOG_TABLE: &str = "schema_pg_track_events.event_log";

/// Name of the trigger attached to a tracked table.
pub fn audit_trigger_name(table: &str) -> String {
    format!("{table}_audit_trigger")
}

/// Unqualified name of a table's generated trigger function.
pub fn audit_function_name(table: &str) -> String {
    format!("log_{}_changes", table.to_lowercase())
}

/// Schema-qualified name of a table's generated trigger function.
pub fn qualified_audit_function_name(table: &str) -> String {
    format!("{AUDIT_SCHEMA}.{}", audit_function_name(table))
}
