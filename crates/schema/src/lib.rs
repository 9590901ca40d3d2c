//! PostgreSQL schema model and catalog introspection for pg-track-events
//!
//! Produces a normalized, read-only snapshot of the live database (tables,
//! columns, indexes, triggers, foreign keys) that the rest of the pipeline
//! treats as immutable input for the duration of one command run.

mod introspect;
mod model;

pub use introspect::{fetch_function_source, introspect_schema, schema_exists};
pub use model::{
    Column, ColumnAttributes, ColumnConstraints, DatabaseSchema, ForeignKey, ForeignKeyReference,
    Index, Table, TriggerInfo,
};
