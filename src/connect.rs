//! Database connection setup

use anyhow::{Context, Result};
use tokio_postgres::{Client, NoTls};
use tracing::error;

/// Connect to PostgreSQL and spawn the connection driver task.
///
/// The returned client is the single shared database resource for one
/// command invocation.
pub async fn connect(database_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .context("failed to connect to database")?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("database connection error: {e}");
        }
    });

    Ok(client)
}
