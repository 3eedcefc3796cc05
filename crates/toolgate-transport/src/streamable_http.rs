//! Streaming-HTTP transport (SPEC_FULL.md §4.E): one URL, each `send` is a
//! POST whose response body is a stream of framed JSON-RPC messages. The
//! simplest of the four wire shapes — no separate read-loop socket, no
//! paired endpoint — so correlation happens by consuming the POST's own
//! response stream rather than a background task and a shared pending map.
//! `notifications/*` arriving on a streamed response are forwarded through
//! the same sink the other transports use, so a session sees them uniformly
//! regardless of which transport backs it.
//!
//! Grounded on the teacher's stdio transport for overall shape (401-once
//! handling lives here rather than in the teacher, which delegates it to
//! `rmcp`'s `AuthClient`); framing follows the pack's `reqwest` streaming
//! usage (`bytes_stream`, newline-delimited JSON frames per chunk).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;

use toolgate_core::jsonrpc::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use toolgate_oauth::AuthProvider;

use crate::error::TransportError;
use crate::session::{ClientTransport, NotificationSink, TransportEvent, WireSessionId};

pub struct StreamableHttpTransport {
    url: String,
    timeout: Duration,
    auth: Option<Arc<dyn AuthProvider>>,
    http: Client,
    sink: NotificationSink,
    connected: AtomicBool,
    session_id: WireSessionId,
}

impl StreamableHttpTransport {
    pub fn new(url: String, timeout: Duration, auth: Option<Arc<dyn AuthProvider>>, http: Client, sink: NotificationSink) -> Self {
        Self {
            url,
            timeout,
            auth,
            http,
            sink,
            connected: AtomicBool::new(false),
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

    /// Posts `body` and assembles the streamed response into frames,
    /// forwarding notifications to the sink and returning the first
    /// response whose id matches `wait_for` (or `Ok(None)` if `wait_for` is
    /// `None`, used for `notify`'s fire-and-forget POSTs).
    async fn post(
        &self,
        body: &JsonRpcRequest,
        wait_for: Option<&toolgate_core::jsonrpc::JsonRpcId>,
        retried_after_refresh: bool,
    ) -> Result<Option<JsonRpcResponse>, TransportError> {
        let mut builder = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        for (name, value) in self.auth_headers().await? {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::ConnectFailed(e.to_string())
            } else {
                TransportError::Io(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            if retried_after_refresh {
                return Err(TransportError::AuthRequired);
            }
            let provider = self.auth.as_ref().ok_or(TransportError::AuthRequired)?;
            provider
                .refresh()
                .await
                .map_err(|_| TransportError::AuthRequired)?;
            return Box::pin(self.post(body, wait_for, true)).await;
        }
        if !response.status().is_success() {
            return Err(TransportError::Protocol(format!("streamable-http returned {}", response.status())));
        }

        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        let mut found: Option<JsonRpcResponse> = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Io(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match JsonRpcMessage::from_json(line) {
                    Ok(JsonRpcMessage::Response(resp)) => {
                        if Some(&resp.id) == wait_for {
                            found = Some(resp);
                        } else {
                            // A response for a different id on this connection has no
                            // home here; streaming-HTTP correlates one response per POST.
                            tracing::warn!(id = %resp.id, "unexpected response id on streamable-http POST");
                        }
                    }
                    Ok(JsonRpcMessage::Notification(req)) => {
                        let _ = self.sink.send(TransportEvent::Notification(req));
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed streamable-http frame, dropping"),
                }
            }
        }
        let trailing = buffer.trim();
        if !trailing.is_empty() {
            if let Ok(JsonRpcMessage::Response(resp)) = JsonRpcMessage::from_json(trailing) {
                if Some(&resp.id) == wait_for {
                    found = Some(resp);
                }
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl ClientTransport for StreamableHttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        self.session_id.regenerate();
        Ok(())
    }

    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let id = request
            .id
            .clone()
            .ok_or_else(|| TransportError::Protocol("request without id".to_string()))?;
        match self.post(&request, Some(&id), false).await? {
            Some(resp) => Ok(resp),
            None => Err(TransportError::Protocol("streamable-http response stream ended without a matching reply".to_string())),
        }
    }

    async fn notify(&self, notification: JsonRpcRequest) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.post(&notification, None, false).await?;
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.session_id.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        format!("streamable-http:{}", self.url)
    }

    fn wire_session_id(&self) -> Option<String> {
        self.session_id.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails_with_closed() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = StreamableHttpTransport::new(
            "https://example.com/mcp".to_string(),
            Duration::from_secs(5),
            None,
            Client::new(),
            tx,
        );
        let req = JsonRpcRequest::new(toolgate_core::jsonrpc::JsonRpcId::String("1".into()), "tools/list", None);
        assert!(matches!(transport.request(req).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn request_without_id_is_rejected_once_connected() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = StreamableHttpTransport::new(
            "https://example.com/mcp".to_string(),
            Duration::from_secs(5),
            None,
            Client::new(),
            tx,
        );
        transport.connect().await.unwrap();
        let notif = JsonRpcRequest::notification("ping", None);
        assert!(matches!(transport.request(notif).await, Err(TransportError::Protocol(_))));
    }
}
