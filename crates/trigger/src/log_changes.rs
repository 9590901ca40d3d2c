//! Trigger function compiler
//!
//! Forward direction: emit the SQL of a per-table audit trigger function
//! capturing an explicit column set. Inverse direction: recover the captured
//! column set from a previously-deployed function's source text.
//!
//! The emitted text is a versioned contract with the inverse parser. Columns
//! are sorted lexically before emission so that equal column sets always
//! produce byte-identical SQL; the reconciler's diffing depends on that.
//! A capture failure aborts the originating transaction: the function has no
//! exception handler, so event loss is never silent.

use crate::{qualified_audit_function_name, EVENT_LOG_TABLE};
use regex::Regex;
use std::collections::HashSet;

/// Compile the audit trigger function for `table`, capturing exactly
/// `included_columns`. Returns the schema-qualified function name and the
/// `CREATE OR REPLACE FUNCTION` statement.
pub fn log_changes_function(
    table: &str,
    included_columns: &HashSet<String>,
) -> (String, String) {
    let function_name = qualified_audit_function_name(table);

    let mut columns: Vec<&String> = included_columns.iter().collect();
    columns.sort();

    let new_payload = json_build_object("NEW", &columns);
    let old_payload = json_build_object("OLD", &columns);

    let sql = format!(
        "CREATE OR REPLACE FUNCTION {function_name}()
RETURNS TRIGGER
SECURITY DEFINER
AS $$
BEGIN
    IF (TG_OP = 'INSERT') THEN
        INSERT INTO {EVENT_LOG_TABLE} (
            event_type,
            row_table_name,
            old_row,
            new_row
        ) VALUES (
            'insert',
            TG_TABLE_NAME,
            NULL,
            {new_payload}
        );
    ELSIF (TG_OP = 'UPDATE') THEN
        INSERT INTO {EVENT_LOG_TABLE} (
            event_type,
            row_table_name,
            old_row,
            new_row
        ) VALUES (
            'update',
            TG_TABLE_NAME,
            {old_payload},
            {new_payload}
        );
    ELSIF (TG_OP = 'DELETE') THEN
        INSERT INTO {EVENT_LOG_TABLE} (
            event_type,
            row_table_name,
            old_row,
            new_row
        ) VALUES (
            'delete',
            TG_TABLE_NAME,
            {old_payload},
            NULL
        );
    END IF;

    RETURN NULL;
END;
$$ LANGUAGE plpgsql;"
    );

    (function_name, sql)
}

fn json_build_object(prefix: &str, columns: &[&String]) -> String {
    let pairs: Vec<String> = columns
        .iter()
        .map(|col| format!("'{col}', {prefix}.\"{col}\""))
        .collect();
    format!("json_build_object({})", pairs.join(", "))
}

/// Recover the column set a deployed trigger function captures.
///
/// Matches the `'col', NEW."col"` / `'col', OLD."col"` pairs the compiler
/// emits, and the unquoted `'col', NEW.col` idiom of earlier deployments.
/// A pair only counts when the quoted name and the referenced column agree,
/// which keeps extraction exact for any text this compiler family produced.
pub fn extract_columns_from_function(sql: &str) -> HashSet<String> {
    let pair = Regex::new(
        r#"'([^']+)',\s*(?:NEW|OLD)\.(?:"([^"]+)"|([A-Za-z_][A-Za-z0-9_$]*))"#,
    )
    .unwrap();

    let mut columns = HashSet::new();
    for captures in pair.captures_iter(sql) {
        let name = &captures[1];
        let referenced = captures
            .get(2)
            .or_else(|| captures.get(3))
            .map(|m| m.as_str());
        if referenced == Some(name) {
            columns.insert(name.to_string());
        }
    }
    columns
}
