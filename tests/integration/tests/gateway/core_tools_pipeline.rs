//! Exercises the full core-tool pipeline end to end against a real upstream:
//! a freshly discovered tool starts unexposed, `discover_tools_by_words`
//! with `enable_all` makes it routable, `bridge_tool_request` forwards to
//! the live upstream, and `load_toolset` re-enables the same full name by a
//! configured list rather than a search.

use std::collections::HashMap;

use serde_json::json;
use tokio::sync::mpsc;

use toolgate_core::config::ProxyConfig;
use toolgate_gateway::ProxyCoordinator;
use toolgate_integration_tests::{one_tool_json, stdio_transport_config, upstream_config};

fn tool_names(list_result: &serde_json::Value) -> Vec<String> {
    list_result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn discover_enable_and_bridge_reach_a_real_upstream_tool() {
    let tools = one_tool_json("read", "reads a file");
    let upstream = upstream_config("docs", stdio_transport_config("DOCS", &tools));

    let mut toolsets = HashMap::new();
    toolsets.insert("starter".to_string(), vec!["docs__read".to_string()]);

    let config = ProxyConfig {
        upstreams: vec![upstream],
        log: Default::default(),
        shutdown_grace_secs: 2,
        auto_reconnect: true,
        connect_concurrency: 8,
        hide_core_tools: false,
        toolsets,
        persist_tokens: false,
    };

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&config, events_tx);
    coordinator.initialize().await;

    let before = coordinator.handle("tools/list", serde_json::Value::Null).await.unwrap();
    assert!(
        !tool_names(&before).contains(&"docs__read".to_string()),
        "a freshly discovered tool is not exposed until something enables it"
    );

    let discovered = coordinator
        .handle(
            "core__discover_tools_by_words",
            json!({ "keywords": ["read"], "enable_all": true }),
        )
        .await
        .unwrap();
    let found: Vec<String> = discovered["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(found.contains(&"docs__read".to_string()));

    let after = coordinator.handle("tools/list", serde_json::Value::Null).await.unwrap();
    assert!(tool_names(&after).contains(&"docs__read".to_string()));

    let bridged = coordinator
        .handle("core__bridge_tool_request", json!({ "name": "docs__read", "arguments": {} }))
        .await
        .unwrap();
    assert_eq!(bridged["upstream"], "DOCS");
    assert_eq!(bridged["called"], "read");

    let loaded = coordinator
        .handle("core__load_toolset", json!({ "name": "starter" }))
        .await
        .unwrap();
    assert_eq!(loaded["enabled"], json!(["docs__read"]));

    coordinator.shutdown().await;
}
