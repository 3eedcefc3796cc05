//! Transport-layer error taxonomy (SPEC_FULL.md §4.D).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport closed")]
    Closed,
    #[error("malformed message: {0}")]
    Protocol(String),
    #[error("upstream reports authentication required")]
    AuthRequired,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl TransportError {
    /// `connectionFailed` and `timeout` are retryable (handed to the
    /// reconnection controller); `protocolError` and `invalidUrl`-class
    /// errors are fatal and surfaced via `onerror` instead (SPEC_FULL.md §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::ConnectFailed(_) | TransportError::Io(_) | TransportError::Timeout)
    }
}
