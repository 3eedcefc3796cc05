//! Config → transport instance, with a per-config singleton cache
//! (SPEC_FULL.md §4.F). Grounded on
//! `mcpmux-gateway::pool::transport::TransportFactory` (`config_hash`
//! excluding auth headers), extended with the auth-provider/token-storage
//! identity component the spec calls out: "equal configs with distinct
//! provider or storage identities do not share a transport".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use toolgate_core::config::TransportConfig;
use toolgate_oauth::AuthProvider;

use crate::error::TransportError;
use crate::session::{ClientTransport, NotificationSink};
use crate::sse::SseTransport;
use crate::stdio::StdioTransport;
use crate::streamable_http::StreamableHttpTransport;
use crate::websocket::WebsocketTransport;

/// Opaque per-instance identity marker. Not a structural hash: two distinct
/// `Arc<dyn AuthProvider>` values never compare equal here even if their
/// configuration happens to be identical, matching the spec's "opaque
/// per-instance marker" wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(u64);

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

impl Identity {
    pub fn fresh() -> Self {
        Self(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn none() -> Self {
        Self(0)
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportKey {
    serialized_config: String,
    auth_identity: Identity,
    storage_identity: Identity,
}

impl TransportKey {
    pub fn new(config: &TransportConfig, auth_identity: Identity, storage_identity: Identity) -> Result<Self, TransportError> {
        let serialized_config =
            serde_json::to_string(config).map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Self {
            serialized_config,
            auth_identity,
            storage_identity,
        })
    }
}

/// Builds and caches `ClientTransport` instances. One factory per process;
/// callers share it across every upstream so that two upstreams with
/// structurally identical config and the same auth provider/token storage
/// reuse one transport, per SPEC_FULL.md §4.F.
#[derive(Default)]
pub struct TransportFactory {
    cache: DashMap<TransportKey, Arc<dyn ClientTransport>>,
    http: reqwest::Client,
}

impl TransportFactory {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Returns the cached transport for `key` if one exists, else builds and
    /// caches a fresh one via `config`. `sink` is only used on a fresh build;
    /// an already-cached transport keeps forwarding to whichever sink it was
    /// built with.
    pub fn get_or_create(
        &self,
        config: &TransportConfig,
        auth: Option<Arc<dyn AuthProvider>>,
        auth_identity: Identity,
        storage_identity: Identity,
        sink: NotificationSink,
    ) -> Result<Arc<dyn ClientTransport>, TransportError> {
        let key = TransportKey::new(config, auth_identity, storage_identity)?;
        if let Some(existing) = self.cache.get(&key) {
            return Ok(existing.clone());
        }

        let transport = self.build(config, auth, sink)?;
        Ok(self.cache.entry(key).or_insert(transport).clone())
    }

    fn build(
        &self,
        config: &TransportConfig,
        auth: Option<Arc<dyn AuthProvider>>,
        sink: NotificationSink,
    ) -> Result<Arc<dyn ClientTransport>, TransportError> {
        config.validate("<unnamed>").map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let transport: Arc<dyn ClientTransport> = match config {
            TransportConfig::Stdio { command, args, env } => {
                Arc::new(StdioTransport::new(command.clone(), args.clone(), env.clone(), sink))
            }
            TransportConfig::Sse { url, .. } => Arc::new(SseTransport::new(url.clone(), auth, self.http.clone(), sink)),
            TransportConfig::Websocket { url, subprotocol, .. } => {
                Arc::new(WebsocketTransport::new(url.clone(), subprotocol.clone(), auth, sink))
            }
            TransportConfig::StreamableHttp { url, timeout_secs, .. } => Arc::new(StreamableHttpTransport::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
                auth,
                self.http.clone(),
                sink,
            )),
        };
        Ok(transport)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
