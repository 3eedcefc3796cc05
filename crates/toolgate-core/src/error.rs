//! Error taxonomy shared across the workspace (SPEC_FULL.md §7).
//!
//! Configuration and validation errors are tagged, not positional, per the
//! spec's error-handling design. Transport and authentication errors live in
//! `toolgate-transport` and `toolgate-oauth` respectively since they carry
//! crate-specific context.

use thiserror::Error;

/// Fatal, startup-time configuration problem. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("upstream '{upstream_id}' is missing required field '{field}'")]
    MissingField {
        upstream_id: String,
        field: &'static str,
    },

    #[error("upstream '{upstream_id}' has unknown transport kind '{kind}'")]
    UnknownTransportKind { upstream_id: String, kind: String },

    #[error("upstream '{upstream_id}': {reason}")]
    Invalid { upstream_id: String, reason: String },

    #[error("duplicate upstream id '{0}'")]
    DuplicateUpstreamId(String),
}

/// Malformed request from the downstream client. Does not disturb the
/// connection; surfaced as a JSON-RPC `invalid params`-class error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("missing required parameter '{0}'")]
    MissingParam(String),

    #[error("malformed params: {0}")]
    MalformedParams(String),

    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("tool name '{0}' is ambiguous across upstreams")]
    AmbiguousToolName(String),
}

/// Umbrella error for code that needs to bubble up any of the above without
/// committing to one variant (e.g. the coordinator's top-level dispatch).
#[derive(Debug, Error)]
pub enum ToolgateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Other(String),
}
