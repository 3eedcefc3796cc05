//! Config loader (SPEC_FULL.md §2 component K, §6 environment variables).
//!
//! The file format itself is out of scope (SPEC_FULL.md §1); this loader
//! reads a JSON document into the typed `ProxyConfig` `toolgate-core` already
//! defines, applies the spec's environment-variable overrides on top, then
//! runs the same validation the coordinator would refuse to start without.
//! Grounded on `mcpmux-core::domain::config`'s "typed struct via serde_json"
//! shape.

use std::path::Path;

use toolgate_core::config::{LogConfig, ProxyConfig};
use toolgate_core::error::ConfigError;

const ENV_LOG_ENABLED: &str = "TOOLGATE_LOG_ENABLED";
const ENV_LOG_LEVEL: &str = "TOOLGATE_LOG_LEVEL";
const ENV_RUN_ID: &str = "TOOLGATE_RUN_ID";

const KNOWN_TRANSPORT_KINDS: &[&str] = &["stdio", "sse", "websocket", "streamable-http"];

/// Reads `path` as JSON into a `ProxyConfig`, applies environment overrides,
/// and validates the result.
pub fn load(path: &Path) -> anyhow::Result<ProxyConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    check_transport_shapes(&document).map_err(ConfigError::into_anyhow)?;

    let mut config: ProxyConfig = serde_json::from_value(document)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    apply_env_overrides(&mut config);
    config.validate().map_err(ConfigError::into_anyhow)?;
    Ok(config)
}

/// Rejects an upstream missing its `transport` field, or one whose
/// `transport.kind` tag names a wire shape this build doesn't know, with a
/// `Configuration` error naming the offending upstream id (SPEC_FULL.md §8
/// SUPPLEMENT) rather than letting serde's own untagged-enum error — which
/// names a JSON path, not the upstream — surface instead.
fn check_transport_shapes(document: &serde_json::Value) -> Result<(), ConfigError> {
    let Some(upstreams) = document.get("upstreams").and_then(serde_json::Value::as_array) else {
        return Ok(());
    };
    for upstream in upstreams {
        let upstream_id = upstream
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        let Some(transport) = upstream.get("transport") else {
            return Err(ConfigError::MissingField {
                upstream_id,
                field: "transport",
            });
        };
        let Some(kind) = transport.get("kind").and_then(serde_json::Value::as_str) else {
            return Err(ConfigError::MissingField {
                upstream_id,
                field: "transport.kind",
            });
        };
        if !KNOWN_TRANSPORT_KINDS.contains(&kind) {
            return Err(ConfigError::UnknownTransportKind {
                upstream_id,
                kind: kind.to_string(),
            });
        }
    }
    Ok(())
}

/// Applies the spec's three named environment variables on top of whatever
/// the file specified. Unset variables leave the file's value untouched;
/// a truthy `TOOLGATE_LOG_ENABLED` is any of `1/true/yes/on` (case
/// insensitive), matching the spec's "truthy enables file logging" wording.
fn apply_env_overrides(config: &mut ProxyConfig) {
    if let Ok(raw) = std::env::var(ENV_LOG_ENABLED) {
        config.log.file_enabled = is_truthy(&raw);
    }
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
        config.log.level = level;
    }
    if let Ok(run_id) = std::env::var(ENV_RUN_ID) {
        config.log.run_id = Some(run_id);
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Used by tests and the entrypoint when no config file is supplied — an
/// empty upstream list is valid (a proxy with zero upstreams still serves
/// core tools).
pub fn default_config() -> ProxyConfig {
    ProxyConfig {
        upstreams: Vec::new(),
        log: LogConfig::default(),
        shutdown_grace_secs: 5,
        auto_reconnect: true,
        connect_concurrency: 8,
        hide_core_tools: false,
        toolsets: Default::default(),
        persist_tokens: false,
    }
}

trait ConfigErrorExt {
    fn into_anyhow(self) -> anyhow::Error;
}

impl ConfigErrorExt for ConfigError {
    fn into_anyhow(self) -> anyhow::Error {
        anyhow::anyhow!(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_truthy_accepts_common_spellings() {
        assert!(is_truthy("1"));
        assert!(is_truthy("true"));
        assert!(is_truthy("True"));
        assert!(is_truthy("YES"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn load_rejects_a_missing_file() {
        let result = load(Path::new("/nonexistent/toolgate.json"));
        assert!(result.is_err());
    }

    #[test]
    fn load_parses_and_validates_a_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.json");
        std::fs::write(
            &path,
            r#"{"upstreams":[{"id":"svc","transport":{"kind":"stdio","command":"echo"}}]}"#,
        )
        .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.upstreams.len(), 1);
        assert_eq!(config.upstreams[0].id, "svc");
    }

    #[test]
    fn missing_transport_field_names_the_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.json");
        std::fs::write(&path, r#"{"upstreams":[{"id":"svc"}]}"#).unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("svc"));
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn unknown_transport_kind_names_the_upstream_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.json");
        std::fs::write(
            &path,
            r#"{"upstreams":[{"id":"svc","transport":{"kind":"carrier-pigeon"}}]}"#,
        )
        .unwrap();
        let err = load(&path).unwrap_err();
        assert!(err.to_string().contains("svc"));
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn env_overrides_apply_on_top_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolgate.json");
        std::fs::write(&path, r#"{"upstreams":[]}"#).unwrap();

        std::env::set_var(ENV_LOG_LEVEL, "debug");
        std::env::set_var(ENV_RUN_ID, "run-123");
        let config = load(&path).unwrap();
        std::env::remove_var(ENV_LOG_LEVEL);
        std::env::remove_var(ENV_RUN_ID);

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.run_id.as_deref(), Some("run-123"));
    }
}
