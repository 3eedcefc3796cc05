//! WebSocket transport: both directions carry JSON-RPC messages as text
//! frames over one socket (SPEC_FULL.md §4.E).
//!
//! Permitted schemes are `ws/wss/http/https` (the latter two are upgraded by
//! `tokio-tungstenite` the same as `ws/wss`). Grounded on the teacher's
//! stdio transport for the connect/read-loop/pending-map shape; the wire
//! work itself has no teacher analogue (`mcpmux-gateway` delegates every
//! HTTP-family transport to `rmcp`) and is built fresh on `tokio-tungstenite`,
//! the crate the wider example pack reaches for websocket clients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use toolgate_core::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use toolgate_oauth::AuthProvider;

use crate::error::TransportError;
use crate::pending::PendingRequests;
use crate::session::{ClientTransport, NotificationSink, TransportEvent, WireSessionId};

const PING_INTERVAL: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

pub struct WebsocketTransport {
    url: String,
    subprotocol: Option<String>,
    auth: Option<Arc<dyn AuthProvider>>,
    pending: Arc<PendingRequests>,
    sink: NotificationSink,
    writer: Arc<Mutex<Option<WsSink>>>,
    connected: Arc<AtomicBool>,
    session_id: WireSessionId,
}

impl WebsocketTransport {
    pub fn new(
        url: String,
        subprotocol: Option<String>,
        auth: Option<Arc<dyn AuthProvider>>,
        sink: NotificationSink,
    ) -> Self {
        Self {
            url,
            subprotocol,
            auth,
            pending: Arc::new(PendingRequests::new()),
            sink,
            writer: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            session_id: WireSessionId::default(),
        }
    }

    async fn auth_headers(&self) -> Result<Vec<(String, String)>, TransportError> {
        match &self.auth {
            Some(provider) => provider
                .get_headers()
                .await
                .map(|m| m.into_iter().collect())
                .map_err(|e| TransportError::ConnectFailed(format!("auth: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    async fn send_frame(&self, raw: String) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;
        writer
            .send(Message::Text(raw.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl ClientTransport for WebsocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        for (name, value) in self.auth_headers().await? {
            let name = http::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            let value = http::header::HeaderValue::from_str(&value)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }
        if let Some(proto) = &self.subprotocol {
            request.headers_mut().insert(
                http::header::SEC_WEBSOCKET_PROTOCOL,
                http::header::HeaderValue::from_str(proto).map_err(|e| TransportError::Protocol(e.to_string()))?,
            );
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (writer, mut reader) = stream.split();

        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        self.session_id.regenerate();

        let pending = self.pending.clone();
        let sink = self.sink.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(message) = reader.next().await {
                match message {
                    Ok(Message::Text(text)) => match JsonRpcMessage::from_json(&text) {
                        Ok(JsonRpcMessage::Response(resp)) => {
                            pending.complete(resp);
                        }
                        Ok(JsonRpcMessage::Notification(req)) => {
                            let _ = sink.send(TransportEvent::Notification(req));
                        }
                        Err(e) => tracing::warn!(error = %e, "malformed websocket frame, dropping"),
                    },
                    Ok(Message::Close(frame)) => {
                        connected.store(false, Ordering::SeqCst);
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = sink.send(TransportEvent::Closed(reason));
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        connected.store(false, Ordering::SeqCst);
                        let _ = sink.send(TransportEvent::Closed(Some(e.to_string())));
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        });

        let ping_writer = self.writer.clone();
        let ping_connected = self.connected.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PING_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                if !ping_connected.load(Ordering::SeqCst) {
                    break;
                }
                let mut guard = ping_writer.lock().await;
                let Some(writer) = guard.as_mut() else { break };
                if writer.send(Message::Ping(Vec::new().into())).await.is_err() {
                    ping_connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let id = request
            .id
            .clone()
            .ok_or_else(|| TransportError::Protocol("request without id".to_string()))?;
        let rx = self.pending.register(&id);
        let raw = serde_json::to_string(&request).map_err(|e| TransportError::Protocol(e.to_string()))?;
        if let Err(e) = self.send_frame(raw).await {
            self.pending.cancel(&id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.cancel(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<(), TransportError> {
        let raw = serde_json::to_string(&notification).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.send_frame(raw).await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        self.pending.reject_all();
        self.session_id.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        format!("websocket:{}", self.url)
    }

    fn wire_session_id(&self) -> Option<String> {
        self.session_id.get()
    }
}
