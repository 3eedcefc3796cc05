//! Proxy coordinator (SPEC_FULL.md §4.I) — component I.
//!
//! Owns every upstream session's lifecycle, routes downstream JSON-RPC
//! calls to the right handler (core tool, `tools/list`, or `tools/call`),
//! and re-converges the tool namespace as sessions reconnect. Grounded on
//! `mcpmux-gateway::pool::service::PoolService`'s orchestrator role, rebuilt
//! over `UpstreamSession`/`ToolRegistry` instead of `rmcp`'s server pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

use toolgate_core::config::{AuthConfig, ProxyConfig};
use toolgate_core::event::DomainEvent;
use toolgate_oauth::provider::{BearerAuthProvider, ClientCredentialsAuthProvider, CodePkceAuthProvider};
use toolgate_oauth::{AuthProvider, TokenStore};
use toolgate_storage::{
    CompositeTokenPersistence, EncryptedFileTokenPersistence, KeychainKeyProvider, KeychainTokenPersistence,
    TokenPersistence, DATA_DIR_NAME,
};
use toolgate_transport::factory::TransportFactory;

const PERSISTENCE_SERVICE_NAME: &str = "toolgate";

use crate::core_tools::{self, CoreTools, ToolDispatcher};
use crate::error::{GatewayError, UpstreamError};
use crate::registry::ToolRegistry;
use crate::upstream::{UpstreamSession, UpstreamStatus};

/// Methods the coordinator recognizes directly, ahead of the core-tool and
/// full-tool-name dispatch paths (SPEC_FULL.md §4.I).
const METHOD_TOOLS_LIST: &str = "tools/list";
const METHOD_TOOLS_CALL: &str = "tools/call";

pub struct ProxyCoordinator {
    upstreams: DashMap<String, Arc<UpstreamSession>>,
    registry: Arc<ToolRegistry>,
    core_tools: CoreTools,
    events_tx: mpsc::UnboundedSender<DomainEvent>,
    connect_concurrency: usize,
    shutdown_grace: Duration,
}

impl ProxyCoordinator {
    /// Constructs every configured upstream session (not yet connected) and
    /// registers the fixed core tools. Does not perform I/O; call
    /// `initialize` to connect.
    pub fn build(config: &ProxyConfig, events_tx: mpsc::UnboundedSender<DomainEvent>) -> Arc<Self> {
        let registry = Arc::new(ToolRegistry::new());
        core_tools::register_core_tools(&registry, config.hide_core_tools);

        let factory = Arc::new(TransportFactory::new());
        let http = reqwest::Client::new();
        let persistence = config.persist_tokens.then(build_token_persistence).flatten();

        let upstreams = DashMap::new();
        for upstream_config in &config.upstreams {
            if !upstream_config.enabled {
                continue;
            }
            let auth = build_auth_provider(
                &upstream_config.id,
                &upstream_config.auth,
                http.clone(),
                persistence.clone(),
            );
            let session = UpstreamSession::new(
                upstream_config.id.clone(),
                upstream_config.transport.clone(),
                upstream_config.reconnect.to_runtime(),
                Arc::clone(&factory),
                auth,
                Arc::clone(&registry),
                events_tx.clone(),
                config.auto_reconnect,
            );
            upstreams.insert(upstream_config.id.clone(), session);
        }

        Arc::new(Self {
            upstreams,
            core_tools: CoreTools::new(Arc::clone(&registry), config.toolsets.clone()),
            registry,
            events_tx,
            connect_concurrency: config.connect_concurrency.max(1),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Connects every upstream in parallel, bounded by `connect_concurrency`.
    /// `Promise.allSettled`-style: one upstream's failure is logged and does
    /// not abort the others (SPEC_FULL.md §4.I).
    pub async fn initialize(self: &Arc<Self>) {
        let sessions: Vec<Arc<UpstreamSession>> = self.upstreams.iter().map(|e| Arc::clone(e.value())).collect();
        for session in &sessions {
            session.subscribe_state_changes().await;
        }

        let mut pending = FuturesUnordered::new();
        let mut remaining = sessions.into_iter();

        for session in remaining.by_ref().take(self.connect_concurrency) {
            pending.push(connect_one(session));
        }
        while pending.next().await.is_some() {
            if let Some(session) = remaining.next() {
                pending.push(connect_one(session));
            }
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn upstream_status(&self, upstream_id: &str) -> Option<UpstreamStatus> {
        let session = self.upstreams.get(upstream_id)?;
        Some(session.status().await)
    }

    /// Explicit operator-triggered reconnect, used when auto-reconnect is
    /// disabled and a session sits `Failed`/`Disconnected` (SPEC_FULL.md
    /// §4.I: "a `Connected → Disconnected` transition is terminal unless the
    /// downstream calls `reconnectServer`").
    pub async fn reconnect_upstream(&self, upstream_id: &str) -> Result<(), GatewayError> {
        let session = self
            .upstreams
            .get(upstream_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| GatewayError::UpstreamUnavailable(upstream_id.to_string()))?;
        session.reconnect().await;
        Ok(())
    }

    /// Top-level downstream request routing (SPEC_FULL.md §4.I):
    /// core tool → in-process dispatch; `tools/list` → union of exposed
    /// descriptors; `tools/call` → resolve name and forward.
    pub async fn handle(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        if CoreTools::is_core_tool(method) {
            return self.core_tools.handle(method, params, self).await;
        }

        match method {
            METHOD_TOOLS_LIST => Ok(self.list_tools()),
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            other => Err(toolgate_core::error::ValidationError::UnknownMethod(other.to_string()).into()),
        }
    }

    fn list_tools(&self) -> Value {
        let tools: Vec<Value> = self
            .registry
            .exposed_descriptors()
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.full_name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        serde_json::json!({ "tools": tools })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, GatewayError> {
        #[derive(serde::Deserialize)]
        struct CallParams {
            name: String,
            #[serde(default)]
            arguments: Value,
        }
        let params: CallParams = serde_json::from_value(params)
            .map_err(|e| toolgate_core::error::ValidationError::MalformedParams(e.to_string()))?;
        let full_name = self.registry.resolve(&params.name)?;
        self.dispatch(&full_name, params.arguments).await.map_err(GatewayError::from)
    }

    /// Signals every upstream to disconnect, bounded by `shutdown_grace`.
    /// Sessions still closing once the grace period elapses are left to
    /// finish in the background rather than blocking shutdown indefinitely
    /// (SPEC_FULL.md §4.I).
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<UpstreamSession>> = self.upstreams.iter().map(|e| Arc::clone(e.value())).collect();
        let closing = async {
            let mut tasks = FuturesUnordered::new();
            for session in sessions {
                tasks.push(async move { session.disconnect().await });
            }
            while tasks.next().await.is_some() {}
        };

        if tokio::time::timeout(self.shutdown_grace, closing).await.is_err() {
            warn!("shutdown grace period elapsed; some upstream sessions were orphaned");
        }
    }
}

#[async_trait]
impl ToolDispatcher for ProxyCoordinator {
    async fn dispatch(&self, full_name: &str, arguments: Value) -> Result<Value, UpstreamError> {
        let (upstream_id, local_name) = full_name
            .split_once("__")
            .ok_or(UpstreamError::NotConnected)?;
        let session = self
            .upstreams
            .get(upstream_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(UpstreamError::NotConnected)?;
        session.call_tool(local_name, arguments).await
    }
}

async fn connect_one(session: Arc<UpstreamSession>) {
    info!(upstream_id = %session.upstream_id, "connecting upstream");
    session.start().await;
}

fn build_auth_provider(
    upstream_id: &str,
    auth: &Option<AuthConfig>,
    http: reqwest::Client,
    persistence: Option<Arc<dyn TokenPersistence>>,
) -> Option<Arc<dyn AuthProvider>> {
    match auth {
        None => None,
        Some(AuthConfig::Bearer { token }) => Some(Arc::new(BearerAuthProvider::new(token.clone()))),
        Some(AuthConfig::ClientCredentials(config)) => {
            let store = Arc::new(TokenStore::new(PERSISTENCE_SERVICE_NAME, persistence));
            let provider = Arc::new(ClientCredentialsAuthProvider::new(upstream_id, config.clone(), http, store));
            provider.install_refresh_schedule();
            Some(provider)
        }
        Some(AuthConfig::CodePkce(config)) => {
            let store = Arc::new(TokenStore::new(PERSISTENCE_SERVICE_NAME, persistence));
            Some(Arc::new(CodePkceAuthProvider::new(upstream_id, config.clone(), http, store)))
        }
    }
}

/// Builds the default persistence chain (OS keychain, falling back to an
/// AES-256-GCM encrypted file) when `persist_tokens` is enabled. Returns
/// `None` on any setup failure (e.g. no home directory resolvable) rather
/// than failing startup — persistence is optional (SPEC_FULL.md §4.B).
fn build_token_persistence() -> Option<Arc<dyn TokenPersistence>> {
    let keychain = match KeychainKeyProvider::new(PERSISTENCE_SERVICE_NAME) {
        Ok(provider) => provider,
        Err(e) => {
            warn!(error = %e, "failed to initialize keychain key provider, tokens will not persist");
            return None;
        }
    };
    let data_dir = dirs::data_local_dir()?.join(DATA_DIR_NAME);
    let fallback = match EncryptedFileTokenPersistence::new(&data_dir, &keychain) {
        Ok(fallback) => fallback,
        Err(e) => {
            warn!(error = %e, "failed to initialize encrypted-file token persistence");
            return None;
        }
    };
    let keychain_store = KeychainTokenPersistence::new(PERSISTENCE_SERVICE_NAME);
    Some(Arc::new(CompositeTokenPersistence::new(keychain_store, fallback)))
}
