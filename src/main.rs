//! Command-line interface for pg-track-events
//!
//! # Usage Examples
//!
//! ```bash
//! # Bootstrap the audit schema and triggers for every table
//! pg-track-events init --database-url postgresql://localhost/app
//!
//! # Reconcile triggers after the schema or config changed
//! pg-track-events sync --auto-apply
//!
//! # Stage the reconciliation into a migration file for review
//! pg-track-events sync --append-migration-file add_triggers.sql
//!
//! # Validate the event mapping, including CEL expression compilation
//! pg-track-events validate --config pg-track-events.yaml
//!
//! # Create the limited-access role the event-shipping agent uses
//! pg-track-events create-agent-user
//!
//! # Remove everything pg-track-events installed
//! pg-track-events drop
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use pg_track_events::{
    agent_user, connect, drop, init, sync, validate, ConfigOpts, DatabaseOpts,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pg-track-events")]
#[command(about = "Trigger-based analytics event capture for PostgreSQL")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the audit schema, event log and initial triggers
    Init {
        #[command(flatten)]
        db: DatabaseOpts,

        #[command(flatten)]
        config: ConfigOpts,

        /// Drop an existing installation first and reinitialize
        #[arg(long)]
        reset: bool,

        /// Print the staged statements without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Reconcile deployed triggers with the schema and configuration
    Sync {
        #[command(flatten)]
        db: DatabaseOpts,

        #[command(flatten)]
        config: ConfigOpts,

        /// Apply the staged changes in one transaction
        #[arg(long)]
        auto_apply: bool,

        /// Append the staged changes to this migration file instead
        #[arg(long, value_name = "FILE")]
        append_migration_file: Option<PathBuf>,
    },

    /// Validate the configuration against the live database schema
    Validate {
        #[command(flatten)]
        db: DatabaseOpts,

        #[command(flatten)]
        config: ConfigOpts,

        /// Expression validator binary
        #[arg(long, env = "PG_TRACK_EVENTS_VALIDATOR", value_name = "PATH")]
        validator_bin: Option<PathBuf>,

        /// Skip CEL expression compilation
        #[arg(long)]
        skip_expressions: bool,
    },

    /// Create the limited-access role for the event-shipping agent
    CreateAgentUser {
        #[command(flatten)]
        db: DatabaseOpts,
    },

    /// Remove the audit schema, triggers and agent role
    Drop {
        #[command(flatten)]
        db: DatabaseOpts,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db,
            config,
            reset,
            dry_run,
        } => {
            let client = connect(&db.database_url).await?;
            init::init(&client, &config.config, init::InitOptions { reset, dry_run }).await?;
        }
        Commands::Sync {
            db,
            config,
            auto_apply,
            append_migration_file,
        } => {
            let client = connect(&db.database_url).await?;
            sync::sync_tables(
                &client,
                &config.config,
                sync::SyncOptions {
                    auto_apply,
                    migration_file: append_migration_file,
                },
            )
            .await?;
        }
        Commands::Validate {
            db,
            config,
            validator_bin,
            skip_expressions,
        } => {
            let client = connect(&db.database_url).await?;
            validate::validate_config(
                &client,
                &config.config,
                validate::ValidateOptions {
                    validator_bin,
                    skip_expressions,
                },
            )
            .await?;
        }
        Commands::CreateAgentUser { db } => {
            let client = connect(&db.database_url).await?;
            agent_user::create_agent_user(&client, &db.database_url).await?;
        }
        Commands::Drop { db } => {
            let client = connect(&db.database_url).await?;
            drop::drop_installation(&client).await?;
        }
    }

    Ok(())
}
