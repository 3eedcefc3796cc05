//! Gateway-level error taxonomy (SPEC_FULL.md §7).
//!
//! Wraps the lower-layer errors (`toolgate_transport`, `toolgate_oauth`) and
//! adds the routing-specific variants the coordinator and upstream session
//! raise directly. Retryability follows SPEC_FULL.md §7's propagation
//! policy: transport errors the reconnection controller already classifies
//! retryable stay internal; what reaches the downstream caller here is
//! either a retriable-class routing error or a verbatim tool error.

use thiserror::Error;

use toolgate_core::error::ValidationError;
use toolgate_core::jsonrpc::JsonRpcError;
use toolgate_oauth::AuthenticationError;
use toolgate_transport::TransportError;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream is not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Auth(#[from] AuthenticationError),
    /// The upstream's own JSON-RPC response carried an `error` field.
    /// Propagated verbatim to the downstream caller (SPEC_FULL.md §7 "Tool
    /// errors are always surfaced to the downstream caller but never
    /// disrupt the session").
    #[error("upstream returned a tool error: {0}")]
    ToolError(JsonRpcError),
}

impl UpstreamError {
    /// True for transport failures the reconnection controller would retry;
    /// never true for a verbatim tool error (SPEC_FULL.md §7: tool errors
    /// never trigger a reconnect).
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Transport(e) if e.is_retryable())
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Session resolved but not `Connected` at dispatch time (SPEC_FULL.md
    /// §4.I: "fail with a retriable error class; do not block indefinitely").
    #[error("upstream '{0}' is not connected")]
    UpstreamUnavailable(String),
}

impl GatewayError {
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            GatewayError::Upstream(UpstreamError::ToolError(e)) => e.clone(),
            GatewayError::Validation(ValidationError::ToolNotFound(_))
            | GatewayError::Validation(ValidationError::AmbiguousToolName(_))
            | GatewayError::Validation(ValidationError::UnknownMethod(_))
            | GatewayError::Validation(ValidationError::MissingParam(_))
            | GatewayError::Validation(ValidationError::MalformedParams(_)) => {
                JsonRpcError::invalid_params(self.to_string())
            }
            GatewayError::UpstreamUnavailable(_) | GatewayError::Upstream(_) => {
                JsonRpcError::internal(self.to_string())
            }
        }
    }
}
