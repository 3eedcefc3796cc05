//! Typed proxy configuration (SPEC_FULL.md §1 ambient stack, §3, §4.F).
//!
//! The file format and admin surface that produce this structure are out of
//! scope (SPEC_FULL.md §1); the typed shape and its validation are not.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::reconnect::ReconnectConfig as ReconnectRuntimeConfig;

/// Reconnect knobs as they appear in configuration (milliseconds on the
/// wire), converted to the runtime `ReconnectConfig` (which uses
/// `std::time::Duration`) by `ReconnectConfig::to_runtime`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_attempts() -> u32 {
    5
}
fn default_jitter() -> f64 {
    0.1
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectConfig {
    pub fn to_runtime(self) -> ReconnectRuntimeConfig {
        ReconnectRuntimeConfig {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }

    /// `maxAttempts >= 0 and integer; initialDelayMs >= 0; maxDelayMs >= 0;
    /// backoffMultiplier > 1` (SPEC_FULL.md §4.F).
    fn validate(&self, upstream_id: &str) -> Result<(), ConfigError> {
        if self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::Invalid {
                upstream_id: upstream_id.to_string(),
                reason: "backoffMultiplier must be > 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Transport configuration: a tagged variant over the four wire shapes
/// (SPEC_FULL.md §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: std::collections::HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        reconnect: ReconnectConfig,
    },
    Websocket {
        url: String,
        #[serde(default)]
        subprotocol: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        reconnect: ReconnectConfig,
    },
    StreamableHttp {
        url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default)]
        reconnect: ReconnectConfig,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

impl TransportConfig {
    /// Validator rules from SPEC_FULL.md §4.F's table.
    pub fn validate(&self, upstream_id: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            upstream_id: upstream_id.to_string(),
            reason: reason.to_string(),
        };

        match self {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ConfigError::MissingField {
                        upstream_id: upstream_id.to_string(),
                        field: "command",
                    });
                }
                Ok(())
            }
            TransportConfig::Sse { url, reconnect } => {
                Url::parse(url).map_err(|_| invalid("sse url is not a valid URL"))?;
                reconnect.validate(upstream_id)
            }
            TransportConfig::Websocket {
                url,
                timeout_secs,
                reconnect,
                ..
            } => {
                let parsed = Url::parse(url).map_err(|_| invalid("websocket url is not a valid URL"))?;
                let allowed: HashSet<&str> = ["ws", "wss", "http", "https"].into_iter().collect();
                if !allowed.contains(parsed.scheme()) {
                    return Err(invalid("websocket url scheme must be ws, wss, http, or https"));
                }
                if *timeout_secs == 0 {
                    return Err(invalid("websocket timeout must be > 0"));
                }
                reconnect.validate(upstream_id)
            }
            TransportConfig::StreamableHttp {
                url,
                timeout_secs,
                reconnect,
            } => {
                let parsed = Url::parse(url).map_err(|_| invalid("streamable-http url is not a valid URL"))?;
                let allowed: HashSet<&str> = ["http", "https"].into_iter().collect();
                if !allowed.contains(parsed.scheme()) {
                    return Err(invalid("streamable-http url scheme must be http or https"));
                }
                if *timeout_secs == 0 {
                    return Err(invalid("streamable-http timeout must be > 0"));
                }
                reconnect.validate(upstream_id)
            }
        }
    }
}

/// Outbound OAuth2 client-credentials configuration (SPEC_FULL.md §4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentialsConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Outbound OAuth2 authorization-code + PKCE configuration (SPEC_FULL.md
/// §4.C). Extends the client-credentials fields with the authorization
/// endpoint and redirect URI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePkceConfig {
    #[serde(flatten)]
    pub client_credentials: ClientCredentialsConfig,
    pub authorization_endpoint: String,
    pub redirect_uri: String,
}

/// Auth provider configuration (SPEC_FULL.md §4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AuthConfig {
    Bearer { token: String },
    ClientCredentials(ClientCredentialsConfig),
    CodePkce(CodePkceConfig),
}

/// One configured upstream (SPEC_FULL.md §3 "Upstream").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub id: String,
    pub transport: TransportConfig,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Logging configuration realizing SPEC_FULL.md §6's environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub file_enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub run_id: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file_enabled: false,
            level: default_log_level(),
            run_id: None,
        }
    }
}

/// Top-level proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub upstreams: Vec<UpstreamConfig>,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_connect_concurrency")]
    pub connect_concurrency: usize,
    /// Hides the always-on core tools (`discover_tools_by_words`, etc.) from
    /// `tools/list` (SPEC_FULL.md §4.H: "unless configuration explicitly
    /// hides them"). The tools still dispatch if called by name.
    #[serde(default)]
    pub hide_core_tools: bool,
    /// Named pre-built lists of full tool names the `load_toolset` core tool
    /// enables atomically (SPEC_FULL.md §4.H `load_toolset(name)`).
    #[serde(default)]
    pub toolsets: std::collections::HashMap<String, Vec<String>>,
    /// Enables the keychain/encrypted-file token persistence path (SPEC_FULL.md
    /// §4.B, §6). Off by default — an in-memory-only token store already
    /// satisfies the full store contract.
    #[serde(default)]
    pub persist_tokens: bool,
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_connect_concurrency() -> usize {
    8
}

impl ProxyConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Validates every upstream (missing fields, unknown kinds, malformed
    /// URLs, duplicate ids). Returns the first error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for upstream in &self.upstreams {
            if !seen.insert(upstream.id.clone()) {
                return Err(ConfigError::DuplicateUpstreamId(upstream.id.clone()));
            }
            upstream.transport.validate(&upstream.id)?;
            upstream.reconnect.validate(&upstream.id)?;
        }
        Ok(())
    }
}
