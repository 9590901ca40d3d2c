//! Agent role provisioning
//!
//! Creates (or re-keys) the limited-access database role the event-shipping
//! agent connects with: SELECT and TRIGGER on application tables, SELECT and
//! INSERT on the audit table, nothing else.

use anyhow::{Context, Result};
use pg_track_events_trigger::{AUDIT_SCHEMA, EVENT_LOG_TABLE};
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio_postgres::Client;
use tracing::info;

pub const AGENT_ROLE: &str = "schema_pg_track_events_agent";

pub async fn create_agent_user(client: &Client, database_url: &str) -> Result<()> {
    // Alphanumeric only, so embedding in the DO block below is quoting-safe
    let password: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    let sql = format!(
        "DO $$
DECLARE
    password text := '{password}';
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = '{AGENT_ROLE}') THEN
        EXECUTE 'CREATE ROLE {AGENT_ROLE} LOGIN PASSWORD ' || quote_literal(password);
    ELSE
        EXECUTE 'ALTER ROLE {AGENT_ROLE} WITH PASSWORD ' || quote_literal(password);
    END IF;
    EXECUTE 'GRANT CONNECT ON DATABASE ' || current_database() || ' TO {AGENT_ROLE}';
    GRANT USAGE ON SCHEMA public TO {AGENT_ROLE};
    GRANT SELECT ON ALL TABLES IN SCHEMA public TO {AGENT_ROLE};
    ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT ON TABLES TO {AGENT_ROLE};
    GRANT TRIGGER ON ALL TABLES IN SCHEMA public TO {AGENT_ROLE};
    ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT TRIGGER ON TABLES TO {AGENT_ROLE};
    GRANT USAGE ON SCHEMA {AUDIT_SCHEMA} TO {AGENT_ROLE};
    GRANT SELECT, INSERT ON {EVENT_LOG_TABLE} TO {AGENT_ROLE};
    ALTER DEFAULT PRIVILEGES IN SCHEMA {AUDIT_SCHEMA} GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {AGENT_ROLE};
END $$;"
    );

    client
        .simple_query(&sql)
        .await
        .with_context(|| format!("failed to create {AGENT_ROLE} role"))?;

    info!("created limited-access {AGENT_ROLE} role with a random password");

    // Reuse the host/port/database part of the admin connection string
    let host = database_url
        .split_once('@')
        .map(|(_, host)| host)
        .unwrap_or(database_url);
    info!("agent connection string: postgresql://{AGENT_ROLE}:{password}@{host}");
    info!("provide this connection string in the environment when deploying the analytics agent");

    Ok(())
}
