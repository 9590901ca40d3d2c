//! Expression validation bridge
//!
//! Submits every CEL expression extracted from the configuration, together
//! with the ignore-filtered schema snapshot, to an external pre-compiled
//! validator in one batched call. The validator resolves `old`/`new` row
//! identifiers against the schema, so the schema must already have ignored
//! tables and columns removed before it gets here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pg_track_events_schema::DatabaseSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Whether an expression is an event condition or a property getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionKind {
    Cond,
    Prop,
}

/// One expression with the context the compiler needs to type-check it.
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionSpec {
    pub table: String,
    pub operation: String,
    #[serde(rename = "exprKind")]
    pub kind: ExpressionKind,
    pub expr: String,
    /// For conditions: the outcome event names the condition may yield
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<String>,
}

/// Per-expression result, ordered 1:1 with the submitted batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionVerdict {
    pub valid: bool,
    #[serde(rename = "validationError", default)]
    pub message: Option<String>,
}

/// The external semantic validator, injected into the configuration
/// validator at construction time. One batched call per validation run.
#[async_trait]
pub trait ExpressionValidator: Send + Sync {
    async fn validate(
        &self,
        schema: &DatabaseSchema,
        expressions: &[ExpressionSpec],
    ) -> Result<Vec<ExpressionVerdict>>;
}

#[derive(Serialize)]
struct ValidatorRequest<'a> {
    schema: &'a [pg_track_events_schema::Table],
    expressions: &'a [ExpressionSpec],
}

/// Production bridge: spawns a pre-compiled validator binary, writes the
/// `{schema, expressions}` request as JSON on stdin and reads the verdict
/// array from stdout. No shared memory, no in-process state.
pub struct CelValidatorCommand {
    program: PathBuf,
}

impl CelValidatorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ExpressionValidator for CelValidatorCommand {
    async fn validate(
        &self,
        schema: &DatabaseSchema,
        expressions: &[ExpressionSpec],
    ) -> Result<Vec<ExpressionVerdict>> {
        let request = serde_json::to_vec(&ValidatorRequest {
            schema: &schema.tables,
            expressions,
        })
        .context("failed to encode validator request")?;

        debug!(
            "submitting {} expressions to {}",
            expressions.len(),
            self.program.display()
        );

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("failed to spawn expression validator {}", self.program.display())
            })?;

        let mut stdin = child
            .stdin
            .take()
            .context("expression validator stdin unavailable")?;
        stdin
            .write_all(&request)
            .await
            .context("failed to write validator request")?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("failed to wait for expression validator")?;

        if !output.status.success() {
            bail!(
                "expression validator exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let verdicts: Vec<ExpressionVerdict> = serde_json::from_slice(&output.stdout)
            .context("failed to decode expression validator output")?;

        if verdicts.len() != expressions.len() {
            bail!(
                "expression validator returned {} verdicts for {} expressions",
                verdicts.len(),
                expressions.len()
            );
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let spec = ExpressionSpec {
            table: "invitations".to_string(),
            operation: "update".to_string(),
            kind: ExpressionKind::Cond,
            expr: "old.status != new.status".to_string(),
            events: vec!["joined_org".to_string()],
        };
        let json = serde_json::to_value(&spec).unwrap();

        assert_eq!(json["exprKind"], "cond");
        assert_eq!(json["operation"], "update");
        assert_eq!(json["events"][0], "joined_org");
    }

    #[test]
    fn test_verdict_decoding() {
        let verdicts: Vec<ExpressionVerdict> = serde_json::from_str(
            r#"[{"valid": true}, {"valid": false, "validationError": "undeclared reference"}]"#,
        )
        .unwrap();

        assert!(verdicts[0].valid);
        assert!(!verdicts[1].valid);
        assert_eq!(verdicts[1].message.as_deref(), Some("undeclared reference"));
    }
}
