//! Event-mapping configuration for pg-track-events
//!
//! Parses and validates the YAML file that maps table operations to
//! analytics events. Validation runs in two stages: structural shape checks
//! against the introspected database schema, and semantic compilation of
//! every CEL expression through an external validator. Every failure is
//! mapped back to its exact source line in the original document.

pub mod cel;
pub mod diagnostics;
pub mod document;
pub mod model;
pub mod validate;

pub use cel::{
    CelValidatorCommand, ExpressionKind, ExpressionSpec, ExpressionValidator, ExpressionVerdict,
};
pub use diagnostics::Diagnostic;
pub use document::ConfigDocument;
pub use model::{
    add_to_ignore, load_ignore, parse_track_key, DestinationConfig, EventConfig, IgnoreConfig,
    IgnoreRule, Operation, TrackConfig,
};
pub use validate::{ConfigValidator, ValidationOutcome};
