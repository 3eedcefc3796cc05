//! In-memory token cache with optional persistence (SPEC_FULL.md §4.B-C).
//!
//! Grounded on `mcpmux-gateway::oauth::token::TokenManager`, generalized from
//! a single refresh-buffer constant to a per-upstream configurable skew and
//! wired to the `toolgate-storage` persistence trait instead of direct
//! SQLite calls. Also takes over `TokenManager`'s proactive-refresh timer:
//! each `store` reschedules a single callback to fire at `expiry - skew`, so
//! a provider's `refresh()` runs ahead of expiry instead of waiting for a
//! caller to notice via `needs_refresh`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use toolgate_storage::{PersistedToken, TokenPersistence};

/// Default lead time before expiry at which a refresh is attempted
/// proactively, rather than waiting for a caller to hit an expired token.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 300;

/// A no-argument callback invoked from the scheduled-refresh timer. Providers
/// register one per upstream so the store can call back into `refresh()`
/// without holding a reference to the provider type itself.
pub type RefreshCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True once within `skew` of expiry — the point at which a proactive
    /// refresh should be attempted instead of waiting for outright expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        now + skew >= self.expires_at
    }

    fn to_persisted(&self) -> PersistedToken {
        PersistedToken {
            access_token: self.access_token.clone(),
            expires_at: self.expires_at,
            token_type: self.token_type.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Per-upstream cache of the current token, with an at-most-one-in-flight
/// refresh guarantee enforced by a per-key mutex.
pub struct TokenStore {
    service_name: String,
    refresh_skew: Duration,
    persistence: Option<Arc<dyn TokenPersistence>>,
    records: Mutex<HashMap<String, TokenRecord>>,
    refresh_callbacks: StdMutex<HashMap<String, RefreshCallback>>,
    scheduled: StdMutex<HashMap<String, JoinHandle<()>>>,
}

impl TokenStore {
    pub fn new(service_name: impl Into<String>, persistence: Option<Arc<dyn TokenPersistence>>) -> Self {
        Self {
            service_name: service_name.into(),
            refresh_skew: Duration::seconds(DEFAULT_REFRESH_SKEW_SECS),
            persistence,
            records: Mutex::new(HashMap::new()),
            refresh_callbacks: StdMutex::new(HashMap::new()),
            scheduled: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    fn persistence_key(&self, upstream_id: &str) -> String {
        format!("{}:{}", self.service_name, upstream_id)
    }

    /// Caches a freshly acquired token in memory and, if persistence is
    /// configured, writes it through to the backing store. Persistence
    /// failures are logged but never fail the call — a token that's good in
    /// memory should still be usable even if disk/keychain write fails.
    pub async fn store(&self, upstream_id: &str, record: TokenRecord) {
        if let Some(persistence) = &self.persistence {
            let key = self.persistence_key(upstream_id);
            let persisted = record.to_persisted();
            if let Err(e) = persistence.save(&key, &persisted) {
                tracing::warn!(upstream_id, error = %e, "failed to persist token");
            }
        }
        let expires_at = record.expires_at;
        self.records.lock().await.insert(upstream_id.to_string(), record);
        self.schedule_refresh(upstream_id, expires_at);
    }

    /// Registers the callback a scheduled refresh fires for this upstream.
    /// Replaces any previously registered callback; does not itself schedule
    /// anything (that happens the next time `store` caches a token).
    pub fn set_refresh_callback(&self, upstream_id: impl Into<String>, callback: RefreshCallback) {
        self.refresh_callbacks.lock().unwrap().insert(upstream_id.into(), callback);
    }

    /// Schedules the registered callback (if any) to fire at `expires_at -
    /// skew`. At most one timer exists per upstream: a call here cancels
    /// whatever timer it already had running. If the fire time has already
    /// passed, no timer is scheduled — the next `get_headers`/`needs_refresh`
    /// check will catch it lazily instead (SPEC_FULL.md §4.B).
    fn schedule_refresh(&self, upstream_id: &str, expires_at: DateTime<Utc>) {
        if let Some(handle) = self.scheduled.lock().unwrap().remove(upstream_id) {
            handle.abort();
        }

        let callback = match self.refresh_callbacks.lock().unwrap().get(upstream_id).cloned() {
            Some(cb) => cb,
            None => return,
        };

        let fire_at = expires_at - self.refresh_skew;
        let now = Utc::now();
        if fire_at <= now {
            return;
        }
        let delay = (fire_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(0));

        let upstream_id = upstream_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        });
        self.scheduled.lock().unwrap().insert(upstream_id, handle);
    }

    /// Returns the cached token, loading it from persistence on a cold start
    /// if memory has nothing for this upstream yet.
    pub async fn retrieve(&self, upstream_id: &str) -> Option<TokenRecord> {
        {
            let records = self.records.lock().await;
            if let Some(record) = records.get(upstream_id) {
                return Some(record.clone());
            }
        }

        let persistence = self.persistence.as_ref()?;
        let key = self.persistence_key(upstream_id);
        let persisted = persistence.load(&key).ok()??;
        let record = TokenRecord {
            access_token: persisted.access_token,
            refresh_token: None,
            expires_at: persisted.expires_at,
            token_type: persisted.token_type,
            scope: persisted.scope,
        };
        self.records
            .lock()
            .await
            .insert(upstream_id.to_string(), record.clone());
        Some(record)
    }

    pub async fn clear(&self, upstream_id: &str) {
        self.records.lock().await.remove(upstream_id);
        if let Some(handle) = self.scheduled.lock().unwrap().remove(upstream_id) {
            handle.abort();
        }
        if let Some(persistence) = &self.persistence {
            let key = self.persistence_key(upstream_id);
            if let Err(e) = persistence.delete(&key) {
                tracing::warn!(upstream_id, error = %e, "failed to delete persisted token");
            }
        }
    }

    /// Whether the cached token (if any) needs a proactive refresh right
    /// now, given this store's configured skew.
    pub async fn needs_refresh(&self, upstream_id: &str) -> bool {
        match self.retrieve(upstream_id).await {
            Some(record) => record.needs_refresh_at(Utc::now(), self.refresh_skew),
            None => true,
        }
    }
}
