//! Installation bootstrap
//!
//! Creates the dedicated audit schema, the `event_type` enum and the
//! `event_log` table, then compiles and attaches audit triggers for every
//! non-ignored table. The old/new payload asymmetry per operation is
//! enforced by CHECK constraints on the audit table itself, not just by the
//! generated functions.

use anyhow::{Context, Result};
use pg_track_events_config::load_ignore;
use pg_track_events_schema::introspect_schema;
use pg_track_events_trigger::{
    plan_sync, stage_plan, SqlBuilder, AUDIT_SCHEMA, EVENT_LOG_TABLE,
};
use std::collections::HashMap;
use std::path::Path;
use tokio_postgres::Client;
use tracing::info;

pub struct InitOptions {
    /// Drop and recreate an existing installation
    pub reset: bool,
    /// Print the staged statements instead of applying them
    pub dry_run: bool,
}

pub async fn init(client: &Client, config_path: &Path, opts: InitOptions) -> Result<()> {
    if pg_track_events_schema::schema_exists(client, AUDIT_SCHEMA).await? {
        if !opts.reset {
            info!("already initialized; run with --reset to drop and reinitialize");
            return Ok(());
        }
        info!("dropping {AUDIT_SCHEMA} schema to reset the installation");
        client
            .simple_query(&format!("DROP SCHEMA {AUDIT_SCHEMA} CASCADE"))
            .await
            .context("failed to drop existing audit schema")?;
    }

    let ignore = load_ignore(config_path)?;
    let schema = introspect_schema(client, "public").await?;

    let mut builder = SqlBuilder::new(client);

    builder.add(
        format!("CREATE SCHEMA {AUDIT_SCHEMA};"),
        Some(format!("+ {AUDIT_SCHEMA} schema")),
    );
    builder.add(
        format!("CREATE TYPE {AUDIT_SCHEMA}.event_type AS ENUM ('insert', 'update', 'delete');"),
        Some(format!("+ {AUDIT_SCHEMA}.event_type enum")),
    );
    builder.add(
        format!(
            "CREATE TABLE {EVENT_LOG_TABLE} (
    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    event_type {AUDIT_SCHEMA}.event_type NOT NULL,
    row_table_name TEXT NOT NULL,
    old_row JSONB,
    new_row JSONB,
    CONSTRAINT event_type_update_check CHECK (
        (event_type = 'update' AND old_row IS NOT NULL AND new_row IS NOT NULL) OR
        (event_type != 'update')
    ),
    CONSTRAINT event_type_insert_check CHECK (
        (event_type = 'insert' AND old_row IS NULL AND new_row IS NOT NULL) OR
        (event_type != 'insert')
    ),
    CONSTRAINT event_type_delete_check CHECK (
        (event_type = 'delete' AND old_row IS NOT NULL AND new_row IS NULL) OR
        (event_type != 'delete')
    )
);"
        ),
        Some(format!("+ {EVENT_LOG_TABLE} audit table")),
    );

    // A fresh installation has no triggers deployed, so the plan is a
    // create for every non-ignored table.
    let plan = plan_sync(&schema, &HashMap::new(), &ignore);
    let tracked = plan.creates.len();
    stage_plan(&plan, "public", &mut builder);

    if opts.dry_run {
        println!("{}", builder.dump());
        builder.clear();
        info!("dry run, no database changes made");
        return Ok(());
    }

    builder
        .commit(true)
        .await
        .context("failed to initialize analytics schema")?;
    info!("initialized; tracking changes on {tracked} tables");
    Ok(())
}
