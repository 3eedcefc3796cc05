//! Upstream session (SPEC_FULL.md §4.G) — component G.
//!
//! One logical connection to one configured upstream: owns the transport,
//! drives the `initialize` → `tools/list` handshake, republishes discovered
//! tools into the shared registry, and hands connection loss to its own
//! `ReconnectController`. Grounded on `mcpmux-gateway::pool::instance`'s
//! `ServerInstance` (state tracking, `mark_connected`/`mark_failed`) and
//! `pool::service`'s reconnect-and-rediscover loop, rebuilt over the spec's
//! `ClientTransport` instead of `rmcp`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use toolgate_core::connection::ConnectionState;
use toolgate_core::event::DomainEvent;
use toolgate_core::jsonrpc::{JsonRpcId, JsonRpcRequest};
use toolgate_core::reconnect::{connect_fn, ReconnectConfig, ReconnectController};
use toolgate_core::tool::ToolDescriptor;
use toolgate_oauth::AuthProvider;
use toolgate_transport::factory::{Identity, TransportFactory};
use toolgate_transport::session::{ClientTransport, TransportEvent};

use crate::error::UpstreamError;
use crate::registry::ToolRegistry;

const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";

#[derive(Debug, Clone)]
pub struct UpstreamStatus {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// One configured upstream's live connection. Shared via `Arc` between the
/// coordinator (dispatch) and its own background notification-forwarding
/// task.
pub struct UpstreamSession {
    pub upstream_id: String,
    transport_config: toolgate_core::config::TransportConfig,
    factory: Arc<TransportFactory>,
    auth: Option<Arc<dyn AuthProvider>>,
    auth_identity: Identity,
    storage_identity: Identity,
    transport: Mutex<Option<Arc<dyn ClientTransport>>>,
    reconnect: Arc<ReconnectController>,
    registry: Arc<ToolRegistry>,
    events: mpsc::UnboundedSender<DomainEvent>,
    auto_reconnect: bool,
    last_error: Mutex<Option<String>>,
    disconnect_requested: AtomicBool,
}

impl UpstreamSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        upstream_id: impl Into<String>,
        transport_config: toolgate_core::config::TransportConfig,
        reconnect_config: ReconnectConfig,
        factory: Arc<TransportFactory>,
        auth: Option<Arc<dyn AuthProvider>>,
        registry: Arc<ToolRegistry>,
        events: mpsc::UnboundedSender<DomainEvent>,
        auto_reconnect: bool,
    ) -> Arc<Self> {
        // Each session owns its own distinct `AuthProvider` (and, through it,
        // its own token store), so a config-identical upstream with no auth
        // still shares a transport while one with auth never shares with
        // another session's provider (SPEC_FULL.md §4.F).
        let (auth_identity, storage_identity) = match &auth {
            Some(_) => (Identity::fresh(), Identity::fresh()),
            None => (Identity::none(), Identity::none()),
        };
        Arc::new(Self {
            upstream_id: upstream_id.into(),
            transport_config,
            factory,
            auth,
            auth_identity,
            storage_identity,
            transport: Mutex::new(None),
            reconnect: ReconnectController::new(reconnect_config),
            registry,
            events,
            auto_reconnect,
            last_error: Mutex::new(None),
            disconnect_requested: AtomicBool::new(false),
        })
    }

    /// Wires the reconnection controller's transitions into the shared
    /// event channel (SPEC_FULL.md §4.I: "the coordinator subscribes to
    /// state transitions, logs them"). Call once before the first `start`.
    pub async fn subscribe_state_changes(self: &Arc<Self>) {
        let upstream_id = self.upstream_id.clone();
        let events = self.events.clone();
        self.reconnect
            .subscribe(Arc::new(move |transition: &toolgate_core::connection::StateTransition| {
                info!(
                    upstream_id = %upstream_id,
                    from = ?transition.from,
                    to = ?transition.to,
                    retry_count = transition.retry_count,
                    "upstream connection state changed"
                );
                let _ = events.send(DomainEvent::ConnectionStateChanged {
                    upstream_id: upstream_id.clone(),
                    transition: transition.clone(),
                });
            }))
            .await;
    }

    pub async fn status(&self) -> UpstreamStatus {
        UpstreamStatus {
            state: self.reconnect.state().await,
            retry_count: self.reconnect.retry_count().await,
            last_error: self.last_error.lock().await.clone(),
        }
    }

    /// Performs the first connection attempt. Failures are handed to the
    /// reconnection controller rather than returned, matching the
    /// coordinator's `Promise.allSettled`-style init (SPEC_FULL.md §4.I):
    /// one upstream's failure never blocks the others.
    pub async fn start(self: &Arc<Self>) {
        self.disconnect_requested.store(false, Ordering::SeqCst);
        self.reconnect.on_connecting().await;
        self.attempt_connect().await;
    }

    /// Attempts one connect + handshake. On success, resets the reconnect
    /// controller and publishes tools. On failure, records the error and,
    /// if auto-reconnect is enabled, schedules a retry.
    async fn attempt_connect(self: &Arc<Self>) {
        match self.connect_and_discover().await {
            Ok(()) => {
                self.reconnect.on_connected().await;
                *self.last_error.lock().await = None;
            }
            Err(err) => {
                warn!(upstream_id = %self.upstream_id, error = %err, "upstream connect attempt failed");
                *self.last_error.lock().await = Some(err.to_string());
                self.reconnect.on_disconnected(Some(err.to_string())).await;
                if self.auto_reconnect && !self.disconnect_requested.load(Ordering::SeqCst) {
                    let this = Arc::clone(self);
                    self.reconnect
                        .schedule(connect_fn(move || {
                            let this = Arc::clone(&this);
                            async move { this.attempt_connect().await }
                        }))
                        .await;
                }
            }
        }
    }

    async fn connect_and_discover(self: &Arc<Self>) -> Result<(), UpstreamError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = self
            .factory
            .get_or_create(
                &self.transport_config,
                self.auth.clone(),
                self.auth_identity,
                self.storage_identity,
                tx,
            )
            .map_err(UpstreamError::from)?;

        transport.connect().await.map_err(UpstreamError::from)?;

        self.handshake(&transport).await?;
        self.list_tools_via(&transport).await?;

        *self.transport.lock().await = Some(transport);
        self.spawn_notification_loop(rx);
        Ok(())
    }

    async fn handshake(&self, transport: &Arc<dyn ClientTransport>) -> Result<(), UpstreamError> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "toolgate", "version": env!("CARGO_PKG_VERSION") },
        });
        let request = JsonRpcRequest::new(JsonRpcId::String(uuid::Uuid::new_v4().to_string()), "initialize", Some(params));
        let response = transport.request(request).await.map_err(UpstreamError::from)?;
        if let Some(error) = response.error {
            return Err(UpstreamError::ToolError(error));
        }
        Ok(())
    }

    /// Re-fetches the tool catalog and replaces this session's entries in
    /// the registry atomically (SPEC_FULL.md §4.G `listTools`).
    pub async fn list_tools(self: &Arc<Self>) -> Result<(), UpstreamError> {
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(UpstreamError::NotConnected)?.clone();
        drop(guard);
        self.list_tools_via(&transport).await
    }

    async fn list_tools_via(&self, transport: &Arc<dyn ClientTransport>) -> Result<(), UpstreamError> {
        let request = JsonRpcRequest::new(JsonRpcId::String(uuid::Uuid::new_v4().to_string()), "tools/list", None);
        let response = transport.request(request).await.map_err(UpstreamError::from)?;
        if let Some(error) = response.error {
            return Err(UpstreamError::ToolError(error));
        }
        let descriptors = parse_tool_descriptors(&self.upstream_id, response.result.unwrap_or(Value::Null));
        debug!(upstream_id = %self.upstream_id, count = descriptors.len(), "discovered tools");
        self.registry.add_from_session(&self.upstream_id, descriptors);
        let _ = self.events.send(DomainEvent::ToolsListChanged {
            upstream_id: Some(self.upstream_id.clone()),
        });
        Ok(())
    }

    /// Sends `tools/call` and returns the raw result. Tool-level errors are
    /// wrapped in `UpstreamError::ToolError` so the coordinator can forward
    /// them to the downstream caller verbatim (SPEC_FULL.md §7).
    pub async fn call_tool(&self, local_name: &str, arguments: Value) -> Result<Value, UpstreamError> {
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(UpstreamError::NotConnected)?.clone();
        drop(guard);

        if self.reconnect.state().await != ConnectionState::Connected {
            return Err(UpstreamError::NotConnected);
        }

        let params = serde_json::json!({ "name": local_name, "arguments": arguments });
        let request = JsonRpcRequest::new(JsonRpcId::String(uuid::Uuid::new_v4().to_string()), "tools/call", Some(params));
        let response = transport.request(request).await.map_err(UpstreamError::from)?;
        match response.error {
            Some(error) => Err(UpstreamError::ToolError(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Closes the transport, resets the reconnection controller, and
    /// reconnects from scratch (SPEC_FULL.md §4.G `reconnect`).
    pub async fn reconnect(self: &Arc<Self>) {
        self.close_transport().await;
        self.reconnect.reset().await;
        self.start().await;
    }

    /// Closes the transport and marks the session disconnected without
    /// scheduling a retry (SPEC_FULL.md §4.G `disconnect`).
    pub async fn disconnect(self: &Arc<Self>) {
        self.disconnect_requested.store(true, Ordering::SeqCst);
        self.reconnect.cancel().await;
        self.close_transport().await;
        self.reconnect.on_disconnected(None).await;
        self.registry.remove_from_session(&self.upstream_id);
    }

    async fn close_transport(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.close().await;
        }
    }

    /// Forwards server-initiated notifications to the coordinator and
    /// reacts to an unexpected close by handing control back to
    /// `attempt_connect` (SPEC_FULL.md §4.G: "an in-flight tool call
    /// observed during a disconnect completes with a transport-closed
    /// error").
    fn spawn_notification_loop(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TransportEvent::Notification(notification) => {
                        if notification.method == TOOLS_LIST_CHANGED {
                            let this = Arc::clone(&this);
                            tokio::spawn(async move {
                                if let Err(err) = this.list_tools().await {
                                    warn!(upstream_id = %this.upstream_id, error = %err, "tool list refresh failed");
                                }
                            });
                        } else {
                            let _ = this.events.send(DomainEvent::UpstreamNotification {
                                upstream_id: this.upstream_id.clone(),
                                method: notification.method.clone(),
                                params: notification.params.clone(),
                            });
                        }
                    }
                    TransportEvent::Closed(reason) => {
                        info!(upstream_id = %this.upstream_id, reason = ?reason, "upstream transport closed");
                        *this.last_error.lock().await = reason.clone();
                        if let Some(transport) = this.transport.lock().await.take() {
                            transport.close().await;
                        }
                        this.registry.remove_from_session(&this.upstream_id);
                        this.reconnect.on_disconnected(reason).await;
                        if this.auto_reconnect && !this.disconnect_requested.load(Ordering::SeqCst) {
                            let retry_target = Arc::clone(&this);
                            this.reconnect
                                .schedule(connect_fn(move || {
                                    let retry_target = Arc::clone(&retry_target);
                                    async move { retry_target.attempt_connect().await }
                                }))
                                .await;
                        }
                        break;
                    }
                }
            }
        });
    }
}

fn parse_tool_descriptors(upstream_id: &str, result: Value) -> Vec<ToolDescriptor> {
    let Some(tools) = result.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name")?.as_str()?.to_string();
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let input_schema = tool.get("inputSchema").cloned().unwrap_or(Value::Null);
            Some(ToolDescriptor::new(upstream_id, name, description, input_schema))
        })
        .collect()
}
