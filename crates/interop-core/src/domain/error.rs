//! Error taxonomy for the interop engine.
//!
//! Only [`SchemaError`] is fatal for a run. [`ParseError`] is contained at the
//! trial boundary and degrades that single trial to `error`.

use crate::domain::registry::Role;

/// Errors produced while loading or validating the implementation registry.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid implementation identifier {id:?}: expected lowercase alphanumeric groups joined by '-'")]
    InvalidIdentifier { id: String },

    #[error("implementation {id} declares the {role} role without a usable endpoint")]
    MissingEndpoint { id: String, role: Role },

    #[error("implementation {id} declares no protocol versions")]
    EmptyVersions { id: String },

    #[error("implementation {id} declares an empty protocol version tag")]
    EmptyVersionTag { id: String },

    #[error("unknown test case: {0}")]
    UnknownTestCase(String),

    #[error("malformed registry document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cannot read registry {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raised only for output that carries no TAP structure at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no TAP version line and no assertions in output of a failed client (exit {exit_code:?})")]
    Unparseable { exit_code: Option<i32> },
}

/// Engine-level errors.
#[derive(Debug, thiserror::Error)]
pub enum InteropError {
    #[error("registry error: {0}")]
    Schema(#[from] SchemaError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("outcome for trial #{sequence} was already recorded")]
    DuplicateOutcome { sequence: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, InteropError>;
