//! Authentication error taxonomy (SPEC_FULL.md §4.C).
//!
//! Kept as a flat tagged enum rather than a generic "OAuth failed" string so
//! callers (the reconnection controller, the auth-error-retry path in the
//! proxy coordinator) can branch on what kind of failure happened without
//! string-sniffing a message.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum AuthenticationError {
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("audience_mismatch: token audience does not match expected resource")]
    AudienceMismatch,
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout acquiring token")]
    Timeout,
    #[error("authorization flow expired or was never completed")]
    FlowIncomplete,
    #[error("state parameter mismatch or unknown")]
    StateMismatch,
    #[error("no refresh token available")]
    NoRefreshToken,
}

impl AuthenticationError {
    /// The OAuth semantic errors the spec calls out as not worth retrying:
    /// the client/grant/scope is wrong regardless of how many times it's
    /// retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthenticationError::InvalidClient(_)
                | AuthenticationError::InvalidGrant(_)
                | AuthenticationError::InvalidScope(_)
                | AuthenticationError::AudienceMismatch
        )
    }
}
