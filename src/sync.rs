//! Trigger reconciliation command
//!
//! Scans the live database for tables without triggers, triggers whose
//! captured column set drifted from the configuration, and newly-ignored
//! tables that still carry a trigger, then delivers the staged changes
//! transactionally or as a migration-file append.

use anyhow::{Context, Result};
use pg_track_events_config::{add_to_ignore, load_ignore};
use pg_track_events_schema::introspect_schema;
use pg_track_events_trigger::{load_deployed_functions, plan_sync, stage_plan, SqlBuilder};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;
use tracing::{error, info};

pub struct SyncOptions {
    /// Apply the staged changes in one transaction without prompting
    pub auto_apply: bool,
    /// Append the staged changes to a migration file instead of applying
    pub migration_file: Option<PathBuf>,
}

/// Reconcile triggers, accepting every newly-discovered table.
pub async fn sync_tables(client: &Client, config_path: &Path, opts: SyncOptions) -> Result<()> {
    sync_tables_with_selection(client, config_path, opts, |offered| {
        offered.iter().map(|t| t.to_string()).collect()
    })
    .await
}

/// Reconcile triggers, letting `select` choose which newly-discovered
/// tables to track. Rejected tables are recorded in the configuration's
/// `ignore` section so later runs do not re-offer them; that file write is
/// best-effort bookkeeping and is never part of the database transaction.
pub async fn sync_tables_with_selection<F>(
    client: &Client,
    config_path: &Path,
    opts: SyncOptions,
    select: F,
) -> Result<()>
where
    F: FnOnce(&[&str]) -> Vec<String>,
{
    info!("scanning for new tables and triggers that need to be updated");

    let ignore = load_ignore(config_path)?;
    let schema = introspect_schema(client, "public").await?;
    let deployed = load_deployed_functions(client, &schema).await?;

    let mut plan = plan_sync(&schema, &deployed, &ignore);

    if plan.is_empty() {
        info!("all tracked tables have up-to-date triggers, nothing to do");
        return Ok(());
    }

    let offered: Vec<String> = plan
        .tables_without_triggers()
        .iter()
        .map(|t| t.to_string())
        .collect();

    if !offered.is_empty() {
        info!(
            "found {} tables without triggers: {}",
            offered.len(),
            offered.join(", ")
        );
        let refs: Vec<&str> = offered.iter().map(String::as_str).collect();
        let selected: HashSet<String> = select(&refs).into_iter().collect();
        let rejected: Vec<String> = offered
            .iter()
            .filter(|t| !selected.contains(*t))
            .cloned()
            .collect();
        plan.retain_creates(&selected);

        if !rejected.is_empty() {
            match add_to_ignore(config_path, &rejected) {
                Ok(()) => info!(
                    "added {} to ignore in {}",
                    rejected.join(", "),
                    config_path.display()
                ),
                Err(e) => error!(
                    "failed to record ignored tables in {}: {e:#}",
                    config_path.display()
                ),
            }
        }
    }

    if plan.is_empty() {
        info!("no trigger changes selected, nothing to do");
        return Ok(());
    }

    let mut builder = SqlBuilder::new(client);
    stage_plan(&plan, "public", &mut builder);

    info!("planned database changes:");
    for description in builder.descriptions() {
        info!("  {description}");
    }

    if opts.auto_apply {
        builder
            .commit(true)
            .await
            .context("failed to apply trigger changes")?;
    } else if let Some(file) = &opts.migration_file {
        let statements = builder.len();
        append_migration(file, &builder.dump())?;
        builder.clear();
        info!("appended {statements} statements to {}", file.display());
    } else {
        info!("preview only; re-run with --auto-apply or --append-migration-file to deliver");
    }

    Ok(())
}

/// Append a dump to a migration file, creating it when absent. A blank line
/// separates appends so repeated dumps stay reviewable.
fn append_migration(path: &Path, dump: &str) -> Result<()> {
    let needs_separator = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open migration file {}", path.display()))?;

    if needs_separator {
        writeln!(file)?;
    }
    file.write_all(dump.as_bytes())
        .with_context(|| format!("failed to write migration file {}", path.display()))?;
    Ok(())
}
