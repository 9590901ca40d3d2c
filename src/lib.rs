//! pg-track-events library
//!
//! Trigger-based analytics event capture for PostgreSQL. A declarative YAML
//! file maps table operations to analytics events; this crate deploys the
//! audit triggers that capture row changes into
//! `schema_pg_track_events.event_log`, keeps deployed trigger state
//! reconciled with the configuration, and validates the configuration
//! against the live schema.
//!
//! # CLI Usage
//!
//! ```bash
//! # Bootstrap the audit schema and initial triggers
//! pg-track-events init --database-url postgresql://...
//!
//! # Reconcile triggers after schema or config drift
//! pg-track-events sync --auto-apply
//!
//! # Or stage the changes into a migration file instead
//! pg-track-events sync --append-migration-file add_triggers.sql
//!
//! # Validate the event mapping against the live schema
//! pg-track-events validate --config pg-track-events.yaml
//! ```

use clap::Parser;
use std::path::PathBuf;

pub mod agent_user;
pub mod connect;
pub mod drop;
pub mod init;
pub mod sync;
pub mod validate;

pub use connect::connect;

/// Connection options shared by every command.
#[derive(Parser, Clone)]
pub struct DatabaseOpts {
    /// PostgreSQL connection URI
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,
}

/// Location of the event-mapping configuration file.
#[derive(Parser, Clone)]
pub struct ConfigOpts {
    /// Path to the YAML configuration
    #[arg(long, default_value = "pg-track-events.yaml")]
    pub config: PathBuf,
}
