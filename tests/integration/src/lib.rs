//! Shared fixtures for the cross-crate integration tests. Grounded on
//! `tests/mocks.rs`'s "hand-rolled test doubles, not mocking frameworks"
//! shape, adapted to this workspace's upstream-session surface.
//!
//! The fake upstream used across the gateway tests is a real child process
//! (a tiny POSIX shell script), not an in-process stub, the same way the
//! teacher's stdio transport tests exercise real subprocess spawning rather
//! than faking `tokio::process`.

use std::collections::HashMap;
use std::path::Path;

use toolgate_core::config::{ProxyConfig, ReconnectConfig, TransportConfig, UpstreamConfig};

/// Builds the (command, args) pair for a `sh`-scripted fake MCP server that
/// answers `initialize` unconditionally, answers `tools/list` with the given
/// canned tool array (already-serialized JSON), and echoes the tool name
/// back out of `tools/call`.
///
/// The script extracts `id` and `params.name` with `sed` rather than a real
/// JSON parser; fine for controlled fixture traffic where neither field's
/// value ever contains a literal quote.
pub fn fake_stdio_server(tag: &str, tools_json: &str) -> (String, Vec<String>) {
    let mut script = String::new();
    script.push_str("while IFS= read -r line; do\n");
    script.push_str("  id=$(printf '%s' \"$line\" | sed -n 's/.*\"id\":\"\\([^\"]*\\)\".*/\\1/p')\n");
    script.push_str("  case \"$line\" in\n");
    script.push_str("    *'\"method\":\"initialize\"'*)\n");
    script.push_str("      printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{}}\\n' \"$id\"\n");
    script.push_str("      ;;\n");
    script.push_str("    *'\"method\":\"tools/list\"'*)\n");
    let list_line = "      printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{\"tools\":TOOLS_JSON}}\\n' \"$id\"\n"
        .replace("TOOLS_JSON", tools_json);
    script.push_str(&list_line);
    script.push_str("      ;;\n");
    script.push_str("    *'\"method\":\"tools/call\"'*)\n");
    script.push_str("      name=$(printf '%s' \"$line\" | sed -n 's/.*\"name\":\"\\([^\"]*\\)\".*/\\1/p')\n");
    let call_line = "      printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{\"called\":\"%s\",\"upstream\":\"TAG\"}}\\n' \"$id\" \"$name\"\n"
        .replace("TAG", tag);
    script.push_str(&call_line);
    script.push_str("      ;;\n");
    script.push_str("  esac\n");
    script.push_str("done\n");
    ("sh".to_string(), vec!["-c".to_string(), script])
}

/// Like `fake_stdio_server`, but `tools/list` answers differently depending
/// on whether `phase_file` already exists on disk: absent the first time (so
/// the script creates it and answers with `first_tools_json`), present on
/// every respawn after that (so it answers with `second_tools_json`). Used
/// to make a reconnect's re-discovery observe a genuinely different tool
/// catalog without the test needing to fake process failure/restart timing.
pub fn fake_stdio_server_with_phase(
    phase_file: &Path,
    first_tools_json: &str,
    second_tools_json: &str,
) -> (String, Vec<String>, HashMap<String, String>) {
    let mut script = String::new();
    script.push_str("if [ -f \"$TOOLGATE_TEST_PHASE_FILE\" ]; then\n");
    script.push_str(&format!("  TOOLS='{second_tools_json}'\n"));
    script.push_str("else\n");
    script.push_str("  touch \"$TOOLGATE_TEST_PHASE_FILE\"\n");
    script.push_str(&format!("  TOOLS='{first_tools_json}'\n"));
    script.push_str("fi\n");
    script.push_str("while IFS= read -r line; do\n");
    script.push_str("  id=$(printf '%s' \"$line\" | sed -n 's/.*\"id\":\"\\([^\"]*\\)\".*/\\1/p')\n");
    script.push_str("  case \"$line\" in\n");
    script.push_str("    *'\"method\":\"initialize\"'*)\n");
    script.push_str("      printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{}}\\n' \"$id\"\n");
    script.push_str("      ;;\n");
    script.push_str("    *'\"method\":\"tools/list\"'*)\n");
    script.push_str("      printf '{\"jsonrpc\":\"2.0\",\"id\":\"%s\",\"result\":{\"tools\":%s}}\\n' \"$id\" \"$TOOLS\"\n");
    script.push_str("      ;;\n");
    script.push_str("  esac\n");
    script.push_str("done\n");

    let mut env = HashMap::new();
    env.insert(
        "TOOLGATE_TEST_PHASE_FILE".to_string(),
        phase_file.to_string_lossy().to_string(),
    );
    ("sh".to_string(), vec!["-c".to_string(), script], env)
}

/// A stdio transport config pointing at `fake_stdio_server`'s script.
pub fn stdio_transport_config(tag: &str, tools_json: &str) -> TransportConfig {
    let (command, args) = fake_stdio_server(tag, tools_json);
    TransportConfig::Stdio {
        command,
        args,
        env: HashMap::new(),
    }
}

/// A tool-list JSON literal for one tool, shaped the way `fake_stdio_server`
/// expects it (the wire shape `UpstreamSession::list_tools` parses).
pub fn one_tool_json(name: &str, description: &str) -> String {
    format!(
        "[{{\"name\":\"{name}\",\"description\":\"{description}\",\"inputSchema\":{{\"type\":\"object\"}}}}]"
    )
}

/// Reconnect knobs tuned for tests: tiny delays, few attempts, so a failing
/// upstream reaches `Failed` in milliseconds rather than the spec's
/// production defaults.
pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2.0,
        max_attempts: 3,
        jitter: 0.0,
    }
}

pub fn upstream_config(id: &str, transport: TransportConfig) -> UpstreamConfig {
    UpstreamConfig {
        id: id.to_string(),
        transport,
        auth: None,
        reconnect: fast_reconnect(),
        enabled: true,
    }
}

/// A `ProxyConfig` with fast shutdown/connect knobs, suitable for a test
/// that brings up real subprocess upstreams and tears them down again.
pub fn test_proxy_config(upstreams: Vec<UpstreamConfig>) -> ProxyConfig {
    ProxyConfig {
        upstreams,
        log: Default::default(),
        shutdown_grace_secs: 2,
        auto_reconnect: true,
        connect_concurrency: 8,
        hide_core_tools: false,
        toolsets: Default::default(),
        persist_tokens: false,
    }
}
