//! Installation teardown

use anyhow::{Context, Result};
use pg_track_events_trigger::AUDIT_SCHEMA;
use tokio_postgres::Client;
use tracing::info;

use crate::agent_user::AGENT_ROLE;

/// Remove every pg-track-events component from the database.
///
/// Role cleanup runs inside a DO block that downgrades failures to notices
/// (the role may never have been created); the schema drop itself is not
/// forgiven.
pub async fn drop_installation(client: &Client) -> Result<()> {
    info!("dropping pg-track-events database components");

    let role_cleanup = format!(
        "DO $$
BEGIN
    REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA public FROM {AGENT_ROLE};
    REVOKE ALL PRIVILEGES ON SCHEMA public FROM {AGENT_ROLE};
    REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA {AUDIT_SCHEMA} FROM {AGENT_ROLE};
    REVOKE ALL PRIVILEGES ON SCHEMA {AUDIT_SCHEMA} FROM {AGENT_ROLE};
    DROP ROLE IF EXISTS {AGENT_ROLE};
EXCEPTION
    WHEN OTHERS THEN
        RAISE NOTICE 'error dropping {AGENT_ROLE} role: %', SQLERRM;
END $$;"
    );
    client
        .simple_query(&role_cleanup)
        .await
        .context("failed to clean up agent role")?;

    client
        .simple_query(&format!("DROP SCHEMA {AUDIT_SCHEMA} CASCADE"))
        .await
        .context("failed to drop audit schema")?;

    info!("removed all pg-track-events components from the database");
    Ok(())
}
