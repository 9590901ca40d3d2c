//! Catalog introspection
//!
//! Reads `information_schema` and `pg_catalog` into a [`DatabaseSchema`]
//! snapshot. An empty database yields an empty table list; a failing
//! introspection query is fatal and is not retried here.

use crate::model::{
    Column, ColumnAttributes, ColumnConstraints, DatabaseSchema, ForeignKey, ForeignKeyReference,
    Index, Table, TriggerInfo,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio_postgres::Client;
use tracing::debug;

/// Whether a schema (namespace) exists in the database.
pub async fn schema_exists(client: &Client, schema_name: &str) -> Result<bool> {
    let rows = client
        .query(
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
            &[&schema_name],
        )
        .await
        .context("failed to query information_schema.schemata")?;
    Ok(!rows.is_empty())
}

/// Source text of a deployed function, via `pg_get_functiondef`.
///
/// Returns `None` when no function with that name exists in the schema. The
/// reconciler treats this text as ground truth for what a deployed trigger
/// function currently captures.
pub async fn fetch_function_source(
    client: &Client,
    schema_name: &str,
    function_name: &str,
) -> Result<Option<String>> {
    let rows = client
        .query(
            "SELECT pg_get_functiondef(p.oid)
             FROM pg_proc p
             JOIN pg_namespace n ON n.oid = p.pronamespace
             WHERE n.nspname = $1 AND p.proname = $2",
            &[&schema_name, &function_name],
        )
        .await
        .with_context(|| format!("failed to read definition of {schema_name}.{function_name}"))?;

    Ok(rows.first().map(|row| row.get(0)))
}

/// Introspect every base table of `schema_name` into a snapshot.
pub async fn introspect_schema(client: &Client, schema_name: &str) -> Result<DatabaseSchema> {
    let table_names = query_table_names(client, schema_name).await?;
    debug!("introspected {} tables in {schema_name}", table_names.len());

    let mut columns = query_columns(client, schema_name).await?;
    let mut primary_keys = query_primary_keys(client, schema_name).await?;
    let mut triggers = query_triggers(client, schema_name).await?;
    let mut indexes = query_indexes(client, schema_name).await?;
    let mut foreign_keys = query_foreign_keys(client, schema_name).await?;

    let tables = table_names
        .into_iter()
        .map(|name| Table {
            schema: schema_name.to_string(),
            columns: columns.remove(&name).unwrap_or_default(),
            primary_key: primary_keys.remove(&name).unwrap_or_default(),
            triggers: triggers.remove(&name),
            indexes: indexes.remove(&name),
            foreign_keys: foreign_keys.remove(&name),
            is_deleted: false,
            name,
        })
        .collect();

    Ok(DatabaseSchema::new(tables))
}

async fn query_table_names(client: &Client, schema_name: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'
             ORDER BY table_name",
            &[&schema_name],
        )
        .await
        .context("failed to list tables")?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

async fn query_columns(
    client: &Client,
    schema_name: &str,
) -> Result<HashMap<String, Vec<Column>>> {
    let rows = client
        .query(
            "SELECT table_name, column_name, data_type, column_default, is_nullable, is_identity
             FROM information_schema.columns
             WHERE table_schema = $1
             ORDER BY table_name, ordinal_position",
            &[&schema_name],
        )
        .await
        .context("failed to list columns")?;

    let mut columns: HashMap<String, Vec<Column>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        let name: String = row.get(1);
        let data_type: String = row.get(2);
        let default: Option<String> = row.get(3);
        let is_nullable: String = row.get(4);
        let is_identity: String = row.get(5);

        let auto_increment = is_identity == "YES"
            || default
                .as_deref()
                .map_or(false, |d| d.starts_with("nextval("));

        columns.entry(table_name).or_default().push(Column {
            name,
            data_type,
            default,
            attributes: ColumnAttributes { auto_increment },
            constraints: ColumnConstraints {
                not_null: is_nullable == "NO",
            },
        });
    }
    Ok(columns)
}

async fn query_primary_keys(
    client: &Client,
    schema_name: &str,
) -> Result<HashMap<String, Vec<String>>> {
    let rows = client
        .query(
            "SELECT t.relname, a.attname
             FROM pg_constraint c
             JOIN pg_class t ON t.oid = c.conrelid
             JOIN pg_namespace n ON n.oid = t.relnamespace
             JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY(c.conkey)
             WHERE c.contype = 'p' AND n.nspname = $1
             ORDER BY t.relname, array_position(c.conkey, a.attnum)",
            &[&schema_name],
        )
        .await
        .context("failed to detect primary key columns")?;

    let mut keys: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        keys.entry(table_name).or_default().push(row.get(1));
    }
    Ok(keys)
}

async fn query_triggers(
    client: &Client,
    schema_name: &str,
) -> Result<HashMap<String, Vec<TriggerInfo>>> {
    let rows = client
        .query(
            "SELECT event_object_table, trigger_name, event_manipulation,
                    action_statement, action_orientation, action_condition
             FROM information_schema.triggers
             WHERE trigger_schema = $1
             ORDER BY event_object_table, trigger_name, event_manipulation",
            &[&schema_name],
        )
        .await
        .context("failed to list triggers")?;

    // One row per (trigger, event); fold events into a single TriggerInfo
    let mut triggers: HashMap<String, Vec<TriggerInfo>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        let trigger_name: String = row.get(1);
        let event: String = row.get(2);
        let action_statement: String = row.get(3);
        let orientation: String = row.get(4);
        let condition: Option<String> = row.get(5);

        let table_triggers = triggers.entry(table_name).or_default();
        match table_triggers.iter_mut().find(|t| t.name == trigger_name) {
            Some(existing) => existing.events.push(event),
            None => table_triggers.push(TriggerInfo {
                name: trigger_name,
                events: vec![event],
                arguments: Vec::new(),
                condition,
                for_each_row: orientation == "ROW",
                execute_procedure: action_statement,
            }),
        }
    }
    Ok(triggers)
}

async fn query_indexes(
    client: &Client,
    schema_name: &str,
) -> Result<HashMap<String, Vec<Index>>> {
    let rows = client
        .query(
            "SELECT t.relname, i.relname, am.amname, ix.indisunique, a.attname
             FROM pg_index ix
             JOIN pg_class i ON i.oid = ix.indexrelid
             JOIN pg_class t ON t.oid = ix.indrelid
             JOIN pg_namespace n ON n.oid = t.relnamespace
             JOIN pg_am am ON am.oid = i.relam
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
             WHERE n.nspname = $1
             ORDER BY t.relname, i.relname, a.attnum",
            &[&schema_name],
        )
        .await
        .context("failed to list indexes")?;

    let mut indexes: HashMap<String, Vec<Index>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        let index_name: String = row.get(1);
        let index_type: String = row.get(2);
        let is_unique: bool = row.get(3);
        let column: String = row.get(4);

        let table_indexes = indexes.entry(table_name).or_default();
        match table_indexes.iter_mut().find(|i| i.name == index_name) {
            Some(existing) => existing.columns.push(column),
            None => table_indexes.push(Index {
                name: index_name,
                index_type,
                columns: vec![column],
                is_unique,
            }),
        }
    }
    Ok(indexes)
}

async fn query_foreign_keys(
    client: &Client,
    schema_name: &str,
) -> Result<HashMap<String, Vec<ForeignKey>>> {
    let rows = client
        .query(
            "SELECT tc.table_name, tc.constraint_name, kcu.column_name,
                    ccu.table_name, ccu.column_name, rc.delete_rule
             FROM information_schema.table_constraints tc
             JOIN information_schema.key_column_usage kcu
               ON kcu.constraint_name = tc.constraint_name
              AND kcu.table_schema = tc.table_schema
             JOIN information_schema.constraint_column_usage ccu
               ON ccu.constraint_name = tc.constraint_name
              AND ccu.table_schema = tc.table_schema
             JOIN information_schema.referential_constraints rc
               ON rc.constraint_name = tc.constraint_name
              AND rc.constraint_schema = tc.table_schema
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1
             ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position",
            &[&schema_name],
        )
        .await
        .context("failed to list foreign keys")?;

    let mut foreign_keys: HashMap<String, Vec<ForeignKey>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        let constraint_name: String = row.get(1);
        let column: String = row.get(2);
        let ref_table: String = row.get(3);
        let ref_column: String = row.get(4);
        let delete_rule: String = row.get(5);

        let table_fks = foreign_keys.entry(table_name).or_default();
        match table_fks.iter_mut().find(|fk| fk.name == constraint_name) {
            Some(existing) => {
                existing.columns.push(column);
                existing.references.columns.push(ref_column);
            }
            None => table_fks.push(ForeignKey {
                name: constraint_name,
                columns: vec![column],
                references: ForeignKeyReference {
                    table: ref_table,
                    columns: vec![ref_column],
                },
                on_delete: delete_rule,
            }),
        }
    }
    Ok(foreign_keys)
}
