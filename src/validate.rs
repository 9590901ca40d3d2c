//! Configuration validation command

use anyhow::{bail, Context, Result};
use pg_track_events_config::{CelValidatorCommand, ConfigValidator, ValidationOutcome};
use pg_track_events_schema::introspect_schema;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;
use tracing::info;

/// Default name of the expression validator binary, resolved via PATH.
const DEFAULT_VALIDATOR_BIN: &str = "pg-track-events-celcheck";

pub struct ValidateOptions {
    /// Expression validator binary (defaults to `pg-track-events-celcheck`)
    pub validator_bin: Option<PathBuf>,
    /// Skip expression compilation, run only shape and cross-reference checks
    pub skip_expressions: bool,
}

/// Validate the configuration file against the live schema. Prints every
/// diagnostic with its source excerpt; fails when any are found.
pub async fn validate_config(
    client: &Client,
    config_path: &Path,
    opts: ValidateOptions,
) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;

    let schema = introspect_schema(client, "public").await?;

    let bridge = CelValidatorCommand::new(
        opts.validator_bin
            .unwrap_or_else(|| PathBuf::from(DEFAULT_VALIDATOR_BIN)),
    );
    let mut validator = ConfigValidator::new(&schema, &bridge);
    if opts.skip_expressions {
        validator = validator.skip_expression_validation();
    }

    match validator.validate(&text).await? {
        ValidationOutcome::Valid(config) => {
            info!(
                "configuration valid: {} tracked events, {} ignore rules, {} destinations",
                config.track.len(),
                config.ignore.rules.len(),
                config.destinations.len()
            );
            Ok(())
        }
        ValidationOutcome::Invalid(diagnostics) => {
            for diagnostic in &diagnostics {
                println!("{diagnostic}");
            }
            bail!(
                "configuration invalid: {} problem(s) found in {}",
                diagnostics.len(),
                config_path.display()
            )
        }
    }
}
