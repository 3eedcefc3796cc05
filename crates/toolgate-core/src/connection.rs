//! Connection state machine (SPEC_FULL.md §3, §4.A, §4.J).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One of the five states an upstream connection can be in.
///
/// Transitions are monotonic within an attempt:
/// `Disconnected -> Connecting -> Connected` on success;
/// `Connecting|Connected -> Reconnecting` on retryable loss;
/// `Reconnecting -> Failed` after max attempts;
/// any state -> `Disconnected` on explicit close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ConnectionState::Failed)
    }
}

/// A published state transition, as observed by the reconnection controller's
/// subscribers (SPEC_FULL.md §4.A: "State observers receive a value with
/// `{from,to,retryCount,nextRetryDelay?,error?}`").
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub retry_count: u32,
    pub next_retry_delay: Option<Duration>,
    pub error: Option<String>,
}

impl StateTransition {
    pub fn new(from: ConnectionState, to: ConnectionState, retry_count: u32) -> Self {
        Self {
            from,
            to,
            retry_count,
            next_retry_delay: None,
            error: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.next_retry_delay = Some(delay);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
