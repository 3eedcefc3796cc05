//! Outbound auth providers (SPEC_FULL.md §4.C).
//!
//! Grounded on `mcpmux-gateway::oauth::mod::OAuthManager` and
//! `oauth::flow::OAuthFlow`, split into one small provider per auth kind
//! instead of a single manager branching on an enum internally — the
//! upstream session only ever needs `AuthProvider`'s three methods regardless
//! of which flow backs it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, Duration};

use toolgate_core::config::{ClientCredentialsConfig, CodePkceConfig};

use crate::authz_state::AuthorizationStateTable;
use crate::error::AuthenticationError;
use crate::pkce::PkceChallenge;
use crate::token::{TokenRecord, TokenStore};

/// A caller-supplied check on a token response's `audience` claim
/// (SPEC_FULL.md §4.C). Only invoked when the response actually carries an
/// audience; responses that omit it are accepted unconditionally.
pub type AudienceValidator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Capability every upstream session authenticates through, regardless of
/// which OAuth grant (or none) backs it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Header name/value pairs to attach to the next request.
    async fn get_headers(&self) -> Result<HashMap<String, String>, AuthenticationError>;

    /// Forces a refresh, ignoring any cached token that still looks valid.
    async fn refresh(&self) -> Result<(), AuthenticationError>;

    /// Cheap local check of whether the provider currently holds a usable
    /// token, without making a network call.
    async fn is_valid(&self) -> bool;
}

/// Static bearer token, configured once and never refreshed.
pub struct BearerAuthProvider {
    token: String,
}

impl BearerAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl AuthProvider for BearerAuthProvider {
    async fn get_headers(&self) -> Result<HashMap<String, String>, AuthenticationError> {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", self.token));
        Ok(headers)
    }

    async fn refresh(&self) -> Result<(), AuthenticationError> {
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        true
    }
}

const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// OAuth2 client-credentials grant, refreshed proactively through the
/// shared `TokenStore`.
pub struct ClientCredentialsAuthProvider {
    config: ClientCredentialsConfig,
    upstream_id: String,
    http: Client,
    store: Arc<TokenStore>,
    acquiring: Mutex<()>,
    audience_validator: Option<AudienceValidator>,
}

impl ClientCredentialsAuthProvider {
    pub fn new(
        upstream_id: impl Into<String>,
        config: ClientCredentialsConfig,
        http: Client,
        store: Arc<TokenStore>,
    ) -> Self {
        Self {
            config,
            upstream_id: upstream_id.into(),
            http,
            store,
            acquiring: Mutex::new(()),
            audience_validator: None,
        }
    }

    /// Installs a caller-supplied predicate the response's `audience` claim
    /// must satisfy. Without one, a configured `audience` still gets a
    /// default exact-match check against what the token endpoint returns.
    pub fn with_audience_validator(mut self, validator: AudienceValidator) -> Self {
        self.audience_validator = Some(validator);
        self
    }

    /// Registers this provider's token store to call back into `refresh()`
    /// at `expiry - skew`, so a token is renewed ahead of expiry instead of
    /// waiting for the next caller's `get_headers` to notice it's stale
    /// (SPEC_FULL.md §4.B `scheduleRefresh`). Call once after wrapping the
    /// provider in an `Arc`; a no-op for any upstream that never stores a
    /// token through this provider.
    pub fn install_refresh_schedule(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.store.set_refresh_callback(
            self.upstream_id.clone(),
            Arc::new(move || {
                let weak = weak.clone();
                Box::pin(async move {
                    let Some(this) = weak.upgrade() else { return };
                    if let Err(e) = AuthProvider::refresh(&*this).await {
                        tracing::warn!(upstream_id = %this.upstream_id, error = %e, "scheduled token refresh failed");
                    }
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
        );
    }

    fn check_audience(&self, response_audience: Option<&str>) -> Result<(), AuthenticationError> {
        let Some(audience) = response_audience else {
            return Ok(());
        };
        let accepted = match &self.audience_validator {
            Some(validator) => validator(audience),
            None => self.config.audience.as_deref() == Some(audience),
        };
        if accepted {
            Ok(())
        } else {
            Err(AuthenticationError::AudienceMismatch)
        }
    }

    async fn fetch_token(&self) -> Result<TokenRecord, AuthenticationError> {
        let mut params = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &self.config.scope {
            params.push(("scope", scope.as_str()));
        }
        if let Some(audience) = &self.config.audience {
            params.push(("audience", audience.as_str()));
        }

        let mut last_err = AuthenticationError::Network("no attempt made".to_string());
        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(RETRY_DELAYS).enumerate() {
            if attempt > 0 {
                sleep(delay).await;
            }
            let request = self
                .http
                .post(&self.config.token_endpoint)
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&params);
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let body: TokenExchangeResponse = response
                        .json()
                        .await
                        .map_err(|e| AuthenticationError::Network(e.to_string()))?;
                    self.check_audience(body.audience.as_deref())?;
                    return Ok(body.into_record());
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let err = classify_oauth_error(status.as_u16(), &body);
                    if err.is_terminal() {
                        return Err(err);
                    }
                    last_err = err;
                }
                Err(e) if e.is_timeout() => last_err = AuthenticationError::Timeout,
                Err(e) => last_err = AuthenticationError::Network(e.to_string()),
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl AuthProvider for ClientCredentialsAuthProvider {
    async fn get_headers(&self) -> Result<HashMap<String, String>, AuthenticationError> {
        if self.store.needs_refresh(&self.upstream_id).await {
            self.refresh().await?;
        }
        let record = self
            .store
            .retrieve(&self.upstream_id)
            .await
            .ok_or(AuthenticationError::NoRefreshToken)?;
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", record.access_token));
        Ok(headers)
    }

    async fn refresh(&self) -> Result<(), AuthenticationError> {
        // At-most-one concurrent token acquisition per upstream.
        let _guard = self.acquiring.lock().await;
        if !self.store.needs_refresh(&self.upstream_id).await {
            return Ok(());
        }
        let record = self.fetch_token().await?;
        self.store.store(&self.upstream_id, record).await;
        Ok(())
    }

    async fn is_valid(&self) -> bool {
        !self.store.needs_refresh(&self.upstream_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodePkceState {
    Idle,
    AwaitingAuthorization,
    CodeReceived,
    Exchanging,
    Acquired,
}

/// How long `refresh()` blocks waiting for `complete_oauth_flow` (its own or
/// a concurrent caller's) to resolve the authorization it published,
/// matching the authorization-state table's own entry lifetime.
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(600);

/// OAuth2 authorization-code + PKCE grant. Unlike the other two providers,
/// `refresh()` cannot complete itself in-process: it publishes an
/// authorization URL for an operator to open out-of-band and then blocks,
/// up to `AUTHORIZATION_TIMEOUT`, for an external `complete_oauth_flow` call
/// to resolve the flow it just started. A second concurrent `refresh()`
/// caller joins that same in-flight wait instead of starting a competing
/// flow.
pub struct CodePkceAuthProvider {
    config: CodePkceConfig,
    upstream_id: String,
    http: Client,
    store: Arc<TokenStore>,
    states: AuthorizationStateTable,
    phase: Mutex<CodePkceState>,
    authorization_url: Mutex<Option<String>>,
    in_flight: Mutex<Option<broadcast::Sender<Result<(), AuthenticationError>>>>,
}

impl CodePkceAuthProvider {
    pub fn new(upstream_id: impl Into<String>, config: CodePkceConfig, http: Client, store: Arc<TokenStore>) -> Self {
        Self {
            config,
            upstream_id: upstream_id.into(),
            http,
            store,
            states: AuthorizationStateTable::new(),
            phase: Mutex::new(CodePkceState::Idle),
            authorization_url: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// Builds the authorization URL the caller opens in a browser, staking
    /// out a fresh state/PKCE pair, without waiting on `refresh()`'s
    /// blocking join. Moves the state machine from `Idle` to
    /// `AwaitingAuthorization`.
    pub async fn start_authorization(&self) -> Result<String, AuthenticationError> {
        self.publish_authorization_url().await
    }

    /// The URL published by the most recent `start_authorization`/`refresh`
    /// call, if a flow is currently awaiting its callback.
    pub async fn pending_authorization_url(&self) -> Option<String> {
        self.authorization_url.lock().await.clone()
    }

    async fn publish_authorization_url(&self) -> Result<String, AuthenticationError> {
        let pending = self.states.begin(self.config.redirect_uri.clone());
        let mut url = url::Url::parse(&self.config.authorization_endpoint)
            .map_err(|e| AuthenticationError::Network(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.config.client_credentials.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            if let Some(scope) = &self.config.client_credentials.scope {
                query.append_pair("scope", scope);
            }
            query.append_pair("state", &pending.state);
            query.append_pair("code_challenge", &pending.pkce.challenge);
            query.append_pair("code_challenge_method", &pending.pkce.method);
        }
        *self.phase.lock().await = CodePkceState::AwaitingAuthorization;
        let url = url.to_string();
        *self.authorization_url.lock().await = Some(url.clone());
        Ok(url)
    }

    /// Drives the state machine through `CodeReceived` → `Exchanging` →
    /// `Acquired`, resolving `state` against the table staked out by
    /// `start_authorization`/`refresh`, exchanging `code` for a token, and
    /// waking every caller currently blocked inside `refresh()` for this
    /// flow with the outcome.
    pub async fn complete_oauth_flow(&self, state: &str, code: &str) -> Result<(), AuthenticationError> {
        let result = self.exchange_code(state, code).await;
        *self.authorization_url.lock().await = None;
        if let Some(sender) = self.in_flight.lock().await.take() {
            let _ = sender.send(result.clone());
        }
        result
    }

    async fn exchange_code(&self, state: &str, code: &str) -> Result<(), AuthenticationError> {
        *self.phase.lock().await = CodePkceState::CodeReceived;
        let pending = self.states.complete(state)?;

        *self.phase.lock().await = CodePkceState::Exchanging;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", pending.redirect_uri.as_str()),
            ("code_verifier", pending.pkce.verifier.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.client_credentials.token_endpoint)
            .basic_auth(
                &self.config.client_credentials.client_id,
                Some(&self.config.client_credentials.client_secret),
            )
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthenticationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_oauth_error(status.as_u16(), &body));
        }

        let body: TokenExchangeResponse = response
            .json()
            .await
            .map_err(|e| AuthenticationError::Network(e.to_string()))?;
        self.store.store(&self.upstream_id, body.into_record()).await;
        *self.phase.lock().await = CodePkceState::Acquired;
        Ok(())
    }

    pub async fn verify_pkce(verifier: &str, challenge: &str) -> bool {
        PkceChallenge::verify(verifier, challenge)
    }
}

#[async_trait]
impl AuthProvider for CodePkceAuthProvider {
    async fn get_headers(&self) -> Result<HashMap<String, String>, AuthenticationError> {
        if self.store.needs_refresh(&self.upstream_id).await {
            self.refresh().await?;
        }
        let record = self
            .store
            .retrieve(&self.upstream_id)
            .await
            .ok_or(AuthenticationError::FlowIncomplete)?;
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {}", record.access_token));
        Ok(headers)
    }

    /// Publishes an authorization URL (or joins the one a concurrent caller
    /// already published) and blocks for an external `complete_oauth_flow`
    /// to resolve it, up to `AUTHORIZATION_TIMEOUT`.
    async fn refresh(&self) -> Result<(), AuthenticationError> {
        if !self.store.needs_refresh(&self.upstream_id).await {
            return Ok(());
        }

        let mut receiver = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(sender) = in_flight.as_ref() {
                sender.subscribe()
            } else {
                self.publish_authorization_url().await?;
                let (sender, receiver) = broadcast::channel(1);
                *in_flight = Some(sender);
                receiver
            }
        };

        match tokio::time::timeout(AUTHORIZATION_TIMEOUT, receiver.recv()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AuthenticationError::FlowIncomplete),
            Err(_) => {
                self.in_flight.lock().await.take();
                *self.phase.lock().await = CodePkceState::Idle;
                *self.authorization_url.lock().await = None;
                Err(AuthenticationError::Timeout)
            }
        }
    }

    async fn is_valid(&self) -> bool {
        !self.store.needs_refresh(&self.upstream_id).await
    }
}

#[derive(serde::Deserialize)]
struct TokenExchangeResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    audience: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenExchangeResponse {
    fn into_record(self) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(self.expires_in),
            token_type: self.token_type,
            scope: self.scope,
        }
    }
}

/// Maps an OAuth token-endpoint error body to a typed `AuthenticationError`,
/// distinguishing semantic (non-retryable) errors from transient ones.
fn classify_oauth_error(status: u16, body: &str) -> AuthenticationError {
    let error_code = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string));

    match error_code.as_deref() {
        Some("invalid_client") => AuthenticationError::InvalidClient(body.to_string()),
        Some("invalid_grant") => AuthenticationError::InvalidGrant(body.to_string()),
        Some("invalid_scope") => AuthenticationError::InvalidScope(body.to_string()),
        _ if status == 401 || status == 403 => AuthenticationError::InvalidClient(body.to_string()),
        _ => AuthenticationError::Network(format!("HTTP {status}: {body}")),
    }
}
