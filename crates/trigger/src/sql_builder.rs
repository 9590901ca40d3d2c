//! Ordered, described SQL staging and delivery
//!
//! A generic execution journal: statements are staged with human-readable
//! descriptions, then delivered transactionally (all-or-nothing with
//! narrated rollback), sequentially, or serialized as a reviewable
//! migration file. The builder owns no schema knowledge.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

/// Minimal SQL execution capability the builder needs. The database driver
/// sits behind this seam so delivery logic is testable without a server.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<()>;
}

#[async_trait]
impl SqlExecutor for tokio_postgres::Client {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.simple_query(sql).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStatement {
    pub sql: String,
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum SqlBuilderError {
    #[error("failed to begin transaction: {0}")]
    Begin(String),
    #[error("statement `{description}` failed: {cause}")]
    Statement { description: String, cause: String },
    #[error("failed to commit transaction: {0}")]
    Commit(String),
}

/// Staged SQL statements, executed or serialized in insertion order.
pub struct SqlBuilder<'a> {
    executor: &'a dyn SqlExecutor,
    statements: Vec<PlannedStatement>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(executor: &'a dyn SqlExecutor) -> Self {
        Self {
            executor,
            statements: Vec::new(),
        }
    }

    pub fn add(&mut self, sql: impl Into<String>, description: Option<String>) {
        self.statements.push(PlannedStatement {
            sql: sql.into(),
            description,
        });
    }

    /// Descriptions of all described statements, in staging order.
    pub fn descriptions(&self) -> Vec<String> {
        self.statements
            .iter()
            .filter_map(|s| s.description.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn clear(&mut self) {
        self.statements.clear();
    }

    /// Execute every staged statement in order.
    ///
    /// With `use_transaction`, the batch runs inside a single transaction;
    /// the first failure rolls everything back and the error names the
    /// failing statement. Without it, statements run one by one with no
    /// rollback (only for independently-idempotent housekeeping).
    ///
    /// Staged statements are cleared whether or not the commit succeeds.
    pub async fn commit(&mut self, use_transaction: bool) -> Result<(), SqlBuilderError> {
        let statements = std::mem::take(&mut self.statements);

        if use_transaction {
            info!("starting transaction");
            self.executor
                .execute("BEGIN")
                .await
                .map_err(|e| SqlBuilderError::Begin(format!("{e:#}")))?;
        }

        for statement in &statements {
            if let Some(description) = &statement.description {
                info!("{description}");
            }
            if let Err(e) = self.executor.execute(&statement.sql).await {
                let description = statement
                    .description
                    .clone()
                    .unwrap_or_else(|| "unnamed statement".to_string());
                error!("failed: {description}: {e:#}");

                if use_transaction {
                    info!("rolling back transaction");
                    match self.executor.execute("ROLLBACK").await {
                        Ok(()) => info!("rolled back, no changes were applied"),
                        Err(rollback) => error!("rollback failed: {rollback:#}"),
                    }
                }
                return Err(SqlBuilderError::Statement {
                    description,
                    cause: format!("{e:#}"),
                });
            }
        }

        if use_transaction {
            self.executor
                .execute("COMMIT")
                .await
                .map_err(|e| SqlBuilderError::Commit(format!("{e:#}")))?;
            info!("transaction committed");
        }
        Ok(())
    }

    /// Serialize all staged statements with their descriptions as SQL
    /// comments. The output ends in a newline and statements are separated
    /// by blank lines, so repeated appends to a migration file stay
    /// well-formed. Staging is left untouched; callers clear after writing.
    pub fn dump(&self) -> String {
        if self.statements.is_empty() {
            return String::new();
        }
        let rendered: Vec<String> = self
            .statements
            .iter()
            .map(|statement| match &statement.description {
                Some(description) => {
                    format!("-- Description: {description}\n{}", statement.sql)
                }
                None => statement.sql.clone(),
            })
            .collect();
        format!("{}\n", rendered.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every executed statement; fails on any SQL containing the
    /// configured marker.
    struct MockExecutor {
        log: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl MockExecutor {
        fn new() -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(marker: &'static str) -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                fail_on: Some(marker),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlExecutor for MockExecutor {
        async fn execute(&self, sql: &str) -> Result<()> {
            self.log.lock().unwrap().push(sql.to_string());
            if let Some(marker) = self.fail_on {
                if sql.contains(marker) {
                    anyhow::bail!("simulated failure");
                }
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transactional_commit_success() {
        let executor = MockExecutor::new();
        let mut builder = SqlBuilder::new(&executor);
        builder.add("CREATE TABLE a ()", Some("create a".to_string()));
        builder.add("CREATE TABLE b ()", Some("create b".to_string()));

        builder.commit(true).await.unwrap();

        assert_eq!(
            executor.executed(),
            vec!["BEGIN", "CREATE TABLE a ()", "CREATE TABLE b ()", "COMMIT"]
        );
        assert!(builder.is_empty());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_names_statement() {
        let executor = MockExecutor::failing_on("TABLE b");
        let mut builder = SqlBuilder::new(&executor);
        builder.add("CREATE TABLE a ()", Some("create a".to_string()));
        builder.add("CREATE TABLE b ()", Some("create b".to_string()));
        builder.add("CREATE TABLE c ()", Some("create c".to_string()));

        let err = builder.commit(true).await.unwrap_err();

        // Everything before the failure executed, then the whole batch
        // rolled back; statement c never ran.
        assert_eq!(
            executor.executed(),
            vec!["BEGIN", "CREATE TABLE a ()", "CREATE TABLE b ()", "ROLLBACK"]
        );
        assert!(err.to_string().contains("create b"));
        assert!(builder.is_empty());
    }

    #[tokio::test]
    async fn test_non_transactional_commit() {
        let executor = MockExecutor::new();
        let mut builder = SqlBuilder::new(&executor);
        builder.add("ANALYZE a", None);
        builder.add("ANALYZE b", None);

        builder.commit(false).await.unwrap();

        assert_eq!(executor.executed(), vec!["ANALYZE a", "ANALYZE b"]);
    }

    #[tokio::test]
    async fn test_non_transactional_failure_has_no_rollback() {
        let executor = MockExecutor::failing_on("ANALYZE b");
        let mut builder = SqlBuilder::new(&executor);
        builder.add("ANALYZE a", None);
        builder.add("ANALYZE b", Some("analyze b".to_string()));

        let err = builder.commit(false).await.unwrap_err();

        assert_eq!(executor.executed(), vec!["ANALYZE a", "ANALYZE b"]);
        assert!(err.to_string().contains("analyze b"));
    }

    #[test]
    fn test_dump_is_append_safe() {
        let executor = MockExecutor::new();
        let mut builder = SqlBuilder::new(&executor);
        builder.add("DROP TRIGGER x ON t;", Some("drop x".to_string()));
        builder.add("CREATE TRIGGER y;", None);

        let dump = builder.dump();

        assert_eq!(
            dump,
            "-- Description: drop x\nDROP TRIGGER x ON t;\n\nCREATE TRIGGER y;\n"
        );
        // Appending a second dump keeps statements separated
        let appended = format!("{dump}\n{}", builder.dump());
        assert!(appended.contains(";\n\n-- Description: drop x"));

        // Dump alone does not clear staging
        assert_eq!(builder.len(), 2);
        builder.clear();
        assert!(builder.is_empty());
        assert_eq!(builder.dump(), "");
    }

    #[test]
    fn test_descriptions() {
        let executor = MockExecutor::new();
        let mut builder = SqlBuilder::new(&executor);
        builder.add("A", Some("first".to_string()));
        builder.add("B", None);
        builder.add("C", Some("third".to_string()));

        assert_eq!(builder.descriptions(), vec!["first", "third"]);
        assert_eq!(builder.len(), 3);
    }
}
