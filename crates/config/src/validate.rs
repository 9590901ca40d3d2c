//! Two-stage configuration validation pipeline
//!
//! Order matters and is deliberate:
//!
//! 1. parse the text into the value tree and the marker-carrying document
//!    tree (both from the same string);
//! 2. cross-check every tracked table key against the introspected schema;
//! 3. batch-compile every expression through the injected external
//!    validator (skippable);
//! 4. only when stages 2-3 produced no diagnostics, run full shape
//!    validation and build the typed configuration.
//!
//! Expected failures are collected as [`Diagnostic`]s, never thrown, so one
//! run reports every problem. Only I/O and YAML syntax errors are fatal.

use crate::cel::{ExpressionKind, ExpressionSpec, ExpressionValidator};
use crate::diagnostics::Diagnostic;
use crate::document::ConfigDocument;
use crate::model::{
    parse_track_key, DestinationConfig, EventConfig, IgnoreConfig, IgnoreRule, TrackConfig,
};
use anyhow::{Context, Result};
use pg_track_events_schema::DatabaseSchema;
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashSet};

/// Tagged result of one validation run: a usable configuration or the full
/// list of problems, never both.
#[derive(Debug)]
pub enum ValidationOutcome {
    Valid(TrackConfig),
    Invalid(Vec<Diagnostic>),
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_))
    }
}

/// Validates configuration text against a schema snapshot and an external
/// expression validator (both injected at construction).
pub struct ConfigValidator<'a> {
    schema: &'a DatabaseSchema,
    expressions: &'a dyn ExpressionValidator,
    skip_expressions: bool,
}

struct ExtractedExpression {
    spec: ExpressionSpec,
    path: Vec<String>,
    entry_key: String,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(schema: &'a DatabaseSchema, expressions: &'a dyn ExpressionValidator) -> Self {
        Self {
            schema,
            expressions,
            skip_expressions: false,
        }
    }

    /// Skip the external expression compilation stage (shape and
    /// cross-reference checks still run).
    pub fn skip_expression_validation(mut self) -> Self {
        self.skip_expressions = true;
        self
    }

    /// Validate configuration text.
    ///
    /// `Err` is reserved for YAML syntax errors and bridge failures; every
    /// expected problem comes back inside [`ValidationOutcome::Invalid`].
    pub async fn validate(&self, text: &str) -> Result<ValidationOutcome> {
        let value: Value =
            serde_yaml::from_str(text).context("failed to parse YAML configuration")?;
        let document = ConfigDocument::parse(text)?;

        let mut diagnostics = Vec::new();

        // Stage 2: cross-reference tracked tables against the schema.
        let mut unknown_tables = HashSet::new();
        if let Some(track) = value.get("track").and_then(Value::as_mapping) {
            for key in track.keys() {
                let Some(key) = key.as_str() else { continue };
                match parse_track_key(key) {
                    None => {
                        diagnostics.push(entry_diagnostic(
                            &document,
                            text,
                            key,
                            format!(
                                "tracked events must be named {{table}}.{{insert|update|delete}}, got `{key}`"
                            ),
                        ));
                    }
                    Some((table, _)) => {
                        if self.schema.find_table(table).is_none() {
                            unknown_tables.insert(table.to_string());
                            diagnostics.push(entry_diagnostic(
                                &document,
                                text,
                                key,
                                format!("unknown table `{table}`: not present in the database schema"),
                            ));
                        }
                    }
                }
            }
        }

        // Stage 3: batch every expression through the external validator.
        // Entries whose table is already reported unknown are excluded; the
        // compiler would only echo the same root cause per expression.
        if !self.skip_expressions {
            let extracted = extract_expressions(&value, &unknown_tables);
            if !extracted.is_empty() {
                let ignore = ignore_section(&value);
                let filtered = ignore.filter_schema(self.schema);
                let specs: Vec<ExpressionSpec> =
                    extracted.iter().map(|e| e.spec.clone()).collect();
                let verdicts = self.expressions.validate(&filtered, &specs).await?;

                for (expr, verdict) in extracted.iter().zip(verdicts) {
                    if verdict.valid {
                        continue;
                    }
                    let message = clean_compiler_message(
                        verdict
                            .message
                            .as_deref()
                            .unwrap_or("expression failed to compile"),
                    );
                    let path: Vec<&str> = expr.path.iter().map(String::as_str).collect();
                    let error_line = document.line_of(&path).unwrap_or(1);
                    let start_line = document
                        .key_line_of(&["track", expr.entry_key.as_str()])
                        .unwrap_or(error_line);
                    diagnostics.push(Diagnostic::new(message, start_line, error_line, text));
                }
            }
        }

        // Stage 4: full shape validation, only on an otherwise-clean run.
        if diagnostics.is_empty() {
            return Ok(match shape_validate(&value, &document, text) {
                Ok(config) => ValidationOutcome::Valid(config),
                Err(shape_diagnostics) => ValidationOutcome::Invalid(shape_diagnostics),
            });
        }

        Ok(ValidationOutcome::Invalid(diagnostics))
    }
}

/// Diagnostic anchored at a track entry's own key line.
fn entry_diagnostic(
    document: &ConfigDocument,
    text: &str,
    entry_key: &str,
    message: String,
) -> Diagnostic {
    let line = document.key_line_of(&["track", entry_key]).unwrap_or(1);
    Diagnostic::new(message, line, line, text)
}

/// Lenient read of the `ignore` section for schema filtering. Shape problems
/// in it are stage-4 business; here they just mean "no filtering".
fn ignore_section(value: &Value) -> IgnoreConfig {
    value
        .get("ignore")
        .cloned()
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_default()
}

fn extract_expressions(value: &Value, unknown_tables: &HashSet<String>) -> Vec<ExtractedExpression> {
    let Some(track) = value.get("track").and_then(Value::as_mapping) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (key, entry) in track {
        let Some(key) = key.as_str() else { continue };
        let Some((table, operation)) = parse_track_key(key) else {
            continue;
        };
        if unknown_tables.contains(table) {
            continue;
        }
        let Some(entry) = entry.as_mapping() else { continue };

        if let Some(cond) = entry.get("cond") {
            // Outcome names type the condition's result on the compiler side
            let events: Vec<String> = entry
                .iter()
                .filter(|(k, v)| k.as_str() != Some("cond") && v.is_mapping())
                .filter_map(|(k, _)| k.as_str().map(String::from))
                .collect();

            if let Some(cond) = cond.as_str() {
                out.push(ExtractedExpression {
                    spec: ExpressionSpec {
                        table: table.to_string(),
                        operation: operation.as_str().to_string(),
                        kind: ExpressionKind::Cond,
                        expr: cond.to_string(),
                        events: events.clone(),
                    },
                    path: path_of(&["track", key, "cond"]),
                    entry_key: key.to_string(),
                });
            }

            for (outcome, props) in entry {
                let (Some(outcome), Some(props)) = (outcome.as_str(), props.as_mapping()) else {
                    continue;
                };
                if outcome == "cond" {
                    continue;
                }
                for (prop, expr) in props {
                    let (Some(prop), Some(expr)) = (prop.as_str(), expr.as_str()) else {
                        continue;
                    };
                    out.push(ExtractedExpression {
                        spec: ExpressionSpec {
                            table: table.to_string(),
                            operation: operation.as_str().to_string(),
                            kind: ExpressionKind::Prop,
                            expr: expr.to_string(),
                            events: Vec::new(),
                        },
                        path: path_of(&["track", key, outcome, prop]),
                        entry_key: key.to_string(),
                    });
                }
            }
        } else if entry.get("event").is_some() {
            let Some(props) = entry.get("properties").and_then(Value::as_mapping) else {
                continue;
            };
            for (prop, expr) in props {
                let (Some(prop), Some(expr)) = (prop.as_str(), expr.as_str()) else {
                    continue;
                };
                out.push(ExtractedExpression {
                    spec: ExpressionSpec {
                        table: table.to_string(),
                        operation: operation.as_str().to_string(),
                        kind: ExpressionKind::Prop,
                        expr: expr.to_string(),
                        events: Vec::new(),
                    },
                    path: path_of(&["track", key, "properties", prop]),
                    entry_key: key.to_string(),
                });
            }
        }
    }
    out
}

fn path_of(segments: &[&str]) -> Vec<String> {
    segments.iter().map(|s| s.to_string()).collect()
}

/// Strip generic positional prefixes and source-echo lines from a compiler
/// message; the document location already pins the source down.
fn clean_compiler_message(message: &str) -> String {
    let prefix = Regex::new(r"(?i)^(?:ERROR:\s*)?<input>:\d+:\d+:\s*|^at offset \d+:?\s*").unwrap();

    let cleaned: Vec<String> = message
        .lines()
        .filter(|line| !line.trim_start().starts_with('|'))
        .map(|line| prefix.replace(line.trim_end(), "").into_owned())
        .filter(|line| !line.trim().is_empty())
        .collect();

    let cleaned = cleaned.join("\n").trim().to_string();
    if cleaned.is_empty() {
        "expression failed to compile".to_string()
    } else {
        cleaned
    }
}

fn shape_validate(
    value: &Value,
    document: &ConfigDocument,
    text: &str,
) -> Result<TrackConfig, Vec<Diagnostic>> {
    let mut diags = Vec::new();

    let Some(root) = value.as_mapping() else {
        return Err(vec![Diagnostic::new(
            "configuration root must be a mapping",
            1,
            1,
            text,
        )]);
    };

    for key in root.keys() {
        match key.as_str() {
            Some("track") | Some("ignore") | Some("destinations") => {}
            Some(other) => {
                let line = document.key_line_of(&[other]).unwrap_or(1);
                diags.push(Diagnostic::new(
                    format!("unknown top-level key `{other}`"),
                    line,
                    line,
                    text,
                ));
            }
            None => diags.push(Diagnostic::new("top-level keys must be strings", 1, 1, text)),
        }
    }

    let mut track_out = BTreeMap::new();
    match root.get("track") {
        None => diags.push(Diagnostic::new(
            "missing required `track` section",
            1,
            1,
            text,
        )),
        Some(track) => match track.as_mapping() {
            None => {
                let line = document.key_line_of(&["track"]).unwrap_or(1);
                diags.push(Diagnostic::new(
                    "`track` must be a mapping of {table}.{operation} entries",
                    line,
                    line,
                    text,
                ));
            }
            Some(track) => {
                for (key, entry) in track {
                    let Some(key) = key.as_str() else {
                        let line = document.key_line_of(&["track"]).unwrap_or(1);
                        diags.push(Diagnostic::new(
                            "track keys must be strings",
                            line,
                            line,
                            text,
                        ));
                        continue;
                    };
                    match validate_event_entry(key, entry, document, text) {
                        Ok(config) => {
                            track_out.insert(key.to_string(), config);
                        }
                        Err(entry_diags) => diags.extend(entry_diags),
                    }
                }
            }
        },
    }

    let ignore_out = match root.get("ignore") {
        None => IgnoreConfig::default(),
        Some(ignore) => validate_ignore(ignore, document, text, &mut diags),
    };

    let destinations_out = match root.get("destinations") {
        None => BTreeMap::new(),
        Some(destinations) => validate_destinations(destinations, document, text, &mut diags),
    };

    if diags.is_empty() {
        Ok(TrackConfig {
            track: track_out,
            ignore: ignore_out,
            destinations: destinations_out,
        })
    } else {
        Err(diags)
    }
}

/// Validate one event-mapping entry.
///
/// The discriminating key decides the variant before any field validation,
/// so a broken entry is reported in terms of the variant it was trying to
/// be, never as a generic matched-neither-variant failure.
fn validate_event_entry(
    key: &str,
    entry: &Value,
    document: &ConfigDocument,
    text: &str,
) -> Result<EventConfig, Vec<Diagnostic>> {
    let entry_line = document.key_line_of(&["track", key]).unwrap_or(1);
    let at_entry = |message: String| Diagnostic::new(message, entry_line, entry_line, text);
    let inner = |path: &[&str], message: String| {
        let line = document.line_of(path).unwrap_or(entry_line);
        Diagnostic::new(message, entry_line, line, text)
    };

    let Some(map) = entry.as_mapping() else {
        return Err(vec![at_entry(format!(
            "event mapping `{key}` must be a mapping"
        ))]);
    };

    let has_cond = map.get("cond").is_some();
    let has_event = map.get("event").is_some();

    match (has_cond, has_event) {
        (true, true) => {
            return Err(vec![at_entry(format!(
                "event mapping `{key}` must not declare both `cond` and `event`"
            ))]);
        }
        (false, false) => {
            return Err(vec![at_entry(format!(
                "event mapping `{key}` must declare either `cond` (conditional event) or `event` (simple event)"
            ))]);
        }
        _ => {}
    }

    let mut diags = Vec::new();

    if has_cond {
        let cond = match map.get("cond").and_then(Value::as_str) {
            Some(cond) => cond.to_string(),
            None => {
                diags.push(inner(
                    &["track", key, "cond"],
                    "`cond` must be a string expression".to_string(),
                ));
                String::new()
            }
        };

        let mut outcomes = BTreeMap::new();
        for (outcome, props) in map {
            let Some(outcome) = outcome.as_str() else {
                diags.push(at_entry(format!(
                    "outcome names in `{key}` must be strings"
                )));
                continue;
            };
            if outcome == "cond" {
                continue;
            }
            let Some(props) = props.as_mapping() else {
                diags.push(inner(
                    &["track", key, outcome],
                    format!("outcome `{outcome}` must be a mapping of property names to expressions"),
                ));
                continue;
            };
            let mut properties = BTreeMap::new();
            for (prop, expr) in props {
                let Some(prop) = prop.as_str() else {
                    diags.push(inner(
                        &["track", key, outcome],
                        format!("property names in outcome `{outcome}` must be strings"),
                    ));
                    continue;
                };
                match expr.as_str() {
                    Some(expr) => {
                        properties.insert(prop.to_string(), expr.to_string());
                    }
                    None => diags.push(inner(
                        &["track", key, outcome, prop],
                        format!("property `{prop}` must be a string expression"),
                    )),
                }
            }
            outcomes.insert(outcome.to_string(), properties);
        }

        if diags.is_empty() {
            Ok(EventConfig::Conditional { cond, outcomes })
        } else {
            Err(diags)
        }
    } else {
        let event = match map.get("event").and_then(Value::as_str) {
            Some(event) => event.to_string(),
            None => {
                diags.push(inner(
                    &["track", key, "event"],
                    "`event` must be a string".to_string(),
                ));
                String::new()
            }
        };

        for (field, _) in map {
            if let Some(field) = field.as_str() {
                if field != "event" && field != "properties" {
                    diags.push(inner(
                        &["track", key, field],
                        format!(
                            "unknown key `{field}` in simple event entry (expected `event` and `properties`)"
                        ),
                    ));
                }
            }
        }

        let mut properties = BTreeMap::new();
        if let Some(props) = map.get("properties") {
            match props.as_mapping() {
                None => diags.push(inner(
                    &["track", key, "properties"],
                    "`properties` must be a mapping of property names to expressions".to_string(),
                )),
                Some(props) => {
                    for (prop, expr) in props {
                        let Some(prop) = prop.as_str() else {
                            diags.push(inner(
                                &["track", key, "properties"],
                                "property names must be strings".to_string(),
                            ));
                            continue;
                        };
                        match expr.as_str() {
                            Some(expr) => {
                                properties.insert(prop.to_string(), expr.to_string());
                            }
                            None => diags.push(inner(
                                &["track", key, "properties", prop],
                                format!("property `{prop}` must be a string expression"),
                            )),
                        }
                    }
                }
            }
        }

        if diags.is_empty() {
            Ok(EventConfig::Simple { event, properties })
        } else {
            Err(diags)
        }
    }
}

fn validate_ignore(
    ignore: &Value,
    document: &ConfigDocument,
    text: &str,
    diags: &mut Vec<Diagnostic>,
) -> IgnoreConfig {
    let mut out = IgnoreConfig::default();
    let Some(mapping) = ignore.as_mapping() else {
        let line = document.key_line_of(&["ignore"]).unwrap_or(1);
        diags.push(Diagnostic::new(
            "`ignore` must be a mapping of table names",
            line,
            line,
            text,
        ));
        return out;
    };

    for (table, rule) in mapping {
        let Some(table) = table.as_str() else {
            let line = document.key_line_of(&["ignore"]).unwrap_or(1);
            diags.push(Diagnostic::new(
                "ignore table names must be strings",
                line,
                line,
                text,
            ));
            continue;
        };
        let rule_line = || {
            document
                .line_of(&["ignore", table])
                .or_else(|| document.key_line_of(&["ignore", table]))
                .unwrap_or(1)
        };
        match rule {
            Value::String(s) if s == "*" => {
                out.rules.insert(table.to_string(), IgnoreRule::All);
            }
            Value::Sequence(items) => {
                let mut columns = Vec::new();
                let mut ok = true;
                for item in items {
                    match item.as_str() {
                        Some(column) => columns.push(column.to_string()),
                        None => {
                            let line = rule_line();
                            diags.push(Diagnostic::new(
                                format!("ignored columns of `{table}` must be strings"),
                                line,
                                line,
                                text,
                            ));
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    out.rules
                        .insert(table.to_string(), IgnoreRule::Columns(columns));
                }
            }
            _ => {
                let line = rule_line();
                diags.push(Diagnostic::new(
                    format!("ignore rule for `{table}` must be \"*\" or a list of column names"),
                    line,
                    line,
                    text,
                ));
            }
        }
    }
    out
}

fn validate_destinations(
    destinations: &Value,
    document: &ConfigDocument,
    text: &str,
    diags: &mut Vec<Diagnostic>,
) -> BTreeMap<String, DestinationConfig> {
    let mut out = BTreeMap::new();
    let Some(mapping) = destinations.as_mapping() else {
        let line = document.key_line_of(&["destinations"]).unwrap_or(1);
        diags.push(Diagnostic::new(
            "`destinations` must be a mapping of destination names",
            line,
            line,
            text,
        ));
        return out;
    };

    for (name, decl) in mapping {
        let Some(name) = name.as_str() else {
            let line = document.key_line_of(&["destinations"]).unwrap_or(1);
            diags.push(Diagnostic::new(
                "destination names must be strings",
                line,
                line,
                text,
            ));
            continue;
        };
        let name_line = document
            .key_line_of(&["destinations", name])
            .unwrap_or(1);
        let Some(decl) = decl.as_mapping() else {
            diags.push(Diagnostic::new(
                format!("destination `{name}` must be a mapping"),
                name_line,
                name_line,
                text,
            ));
            continue;
        };

        let api_key = match decl.get("apiKey").and_then(Value::as_str) {
            Some(api_key) => api_key.to_string(),
            None => {
                diags.push(Diagnostic::new(
                    format!("destination `{name}` is missing a string `apiKey`"),
                    name_line,
                    name_line,
                    text,
                ));
                continue;
            }
        };
        let filter = match decl.get("filter") {
            None => "*".to_string(),
            Some(filter) => match filter.as_str() {
                Some(filter) => filter.to_string(),
                None => {
                    let line = document
                        .line_of(&["destinations", name, "filter"])
                        .unwrap_or(name_line);
                    diags.push(Diagnostic::new(
                        format!("`filter` of destination `{name}` must be a string"),
                        name_line,
                        line,
                        text,
                    ));
                    continue;
                }
            },
        };

        out.insert(name.to_string(), DestinationConfig { api_key, filter });
    }
    out
}
