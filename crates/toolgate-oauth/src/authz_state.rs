//! In-flight authorization-code-flow bookkeeping (SPEC_FULL.md §4.C, §9 Q1).
//!
//! Each call to `start_authorization` stakes out a state nonce with its own
//! PKCE verifier. The nonce is single-use and expires 10 minutes after
//! creation, measured against wall-clock time (`chrono::Utc`) rather than a
//! monotonic clock, per the Open Question decision recorded in DESIGN.md.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::AuthenticationError;
use crate::pkce::PkceChallenge;

const STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub state: String,
    pub pkce: PkceChallenge,
    pub redirect_uri: String,
    created_at: DateTime<Utc>,
}

impl PendingAuthorization {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > Duration::minutes(STATE_TTL_MINUTES)
    }
}

/// Tracks outstanding authorization attempts keyed by state nonce. One table
/// per upstream requiring the authorization-code flow.
#[derive(Default)]
pub struct AuthorizationStateTable {
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl AuthorizationStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stakes out a new state nonce and PKCE pair, returning both for the
    /// caller to fold into the authorization URL.
    pub fn begin(&self, redirect_uri: impl Into<String>) -> PendingAuthorization {
        let entry = PendingAuthorization {
            state: crate::pkce::generate_state(),
            pkce: PkceChallenge::generate(),
            redirect_uri: redirect_uri.into(),
            created_at: Utc::now(),
        };
        self.pending
            .lock()
            .unwrap()
            .insert(entry.state.clone(), entry.clone());
        entry
    }

    /// Consumes a state nonce, returning the associated PKCE verifier and
    /// redirect URI. Fails if the nonce is unknown, already consumed, or
    /// expired. Single-use: a second call with the same state always fails.
    pub fn complete(&self, state: &str) -> Result<PendingAuthorization, AuthenticationError> {
        let mut pending = self.pending.lock().unwrap();
        let entry = pending
            .remove(state)
            .ok_or(AuthenticationError::StateMismatch)?;
        if entry.is_expired(Utc::now()) {
            return Err(AuthenticationError::FlowIncomplete);
        }
        Ok(entry)
    }

    /// Drops any pending entries past their TTL. Callers may run this on a
    /// timer; not required for correctness since `complete` re-checks
    /// expiry, but keeps the table from growing unbounded for flows that are
    /// abandoned before the callback ever arrives.
    pub fn sweep_expired(&self) {
        let now = Utc::now();
        self.pending.lock().unwrap().retain(|_, v| !v.is_expired(now));
    }
}
