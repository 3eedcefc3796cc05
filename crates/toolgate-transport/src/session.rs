//! Shared transport trait and the events every implementation emits toward
//! its owning upstream session (SPEC_FULL.md §4.D, §4.E).

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use toolgate_core::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

use crate::error::TransportError;

/// A base transport's wire session id (SPEC_FULL.md §4.D: "a session id
/// (random 128-bit, textual) is assigned on each successful connect and
/// cleared on close"). Each `ClientTransport` impl owns one and regenerates
/// it from its own `connect`/`close`.
#[derive(Default)]
pub struct WireSessionId(Mutex<Option<String>>);

impl WireSessionId {
    pub fn regenerate(&self) {
        *self.0.lock().unwrap() = Some(uuid::Uuid::new_v4().to_string());
    }

    pub fn clear(&self) {
        *self.0.lock().unwrap() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Pushed from a transport to whoever owns it: either a server-initiated
/// notification (no id, forwarded as-is) or a report that the connection
/// dropped.
#[derive(Debug)]
pub enum TransportEvent {
    Notification(JsonRpcRequest),
    Closed(Option<String>),
}

pub type NotificationSink = mpsc::UnboundedSender<TransportEvent>;

/// Capability every wire shape implements: send a request and wait for its
/// correlated response, fire-and-forget a notification, and close down.
/// Reconnection lives one layer up, in the reconnection controller — a
/// transport only reports that it closed, it never reconnects itself.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Performs the handshake/initial connection. Idempotent: calling it
    /// again on an already-connected transport is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Sends a request and awaits its correlated response.
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Sends a notification with no expectation of a reply.
    async fn notify(&self, notification: JsonRpcRequest) -> Result<(), TransportError>;

    async fn close(&self);

    fn is_connected(&self) -> bool;

    fn description(&self) -> String;

    /// The session id assigned on the most recent successful `connect`, or
    /// `None` before the first connect or after `close`.
    fn wire_session_id(&self) -> Option<String>;
}
