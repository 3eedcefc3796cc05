//! SPEC_FULL.md §8 S1 — Namespacing: two upstreams exposing a same-named
//! tool must surface as two distinct `<upstream_id>__<name>` entries, and a
//! `tools/call` against one full name must reach that upstream only.

use serde_json::json;
use tokio::sync::mpsc;

use toolgate_gateway::ProxyCoordinator;
use toolgate_integration_tests::{one_tool_json, stdio_transport_config, test_proxy_config, upstream_config};

#[tokio::test]
async fn same_named_tools_on_different_upstreams_stay_distinct() {
    let tools = one_tool_json("read", "reads a file");
    let a = upstream_config("a", stdio_transport_config("A", &tools));
    let b = upstream_config("b", stdio_transport_config("B", &tools));

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&test_proxy_config(vec![a, b]), events_tx);
    coordinator.initialize().await;

    let listed = coordinator.handle("tools/list", serde_json::Value::Null).await.unwrap();
    let mut names: Vec<String> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert!(names.contains(&"a__read".to_string()), "{names:?}");
    assert!(names.contains(&"b__read".to_string()), "{names:?}");

    let params = json!({ "name": "a__read", "arguments": {} });
    let result = coordinator.handle("tools/call", params).await.unwrap();
    assert_eq!(result["upstream"], "A", "a__read must only reach upstream a");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn calling_a_full_name_that_does_not_exist_is_rejected() {
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&test_proxy_config(vec![]), events_tx);
    coordinator.initialize().await;

    let params = json!({ "name": "ghost__anything", "arguments": {} });
    let result = coordinator.handle("tools/call", params).await;
    assert!(result.is_err());

    coordinator.shutdown().await;
}
