//! Config-file-to-running-proxy integration tests (SPEC_FULL.md §2 component
//! K, §4.H). `toolgate-gateway::config_loader` already has thorough
//! unit-level coverage of parsing/validation in isolation; these tests cover
//! the rest of the path: a JSON file on disk feeding a live
//! `ProxyCoordinator` that actually connects upstreams and answers
//! `tools/list`/`tools/call`.

use serde_json::Value;
use tokio::sync::mpsc;

use toolgate_gateway::{config_loader, ProxyCoordinator};
use toolgate_integration_tests::fake_stdio_server;

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("toolgate.json");
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn loading_a_file_and_building_a_coordinator_exposes_its_upstream_tools() {
    let dir = tempfile::tempdir().unwrap();
    let (command, args) = fake_stdio_server("FILE", &toolgate_integration_tests::one_tool_json("read", "reads"));
    let config_json = serde_json::json!({
        "upstreams": [{
            "id": "svc",
            "transport": {"kind": "stdio", "command": command, "args": args},
        }],
    });
    let path = write_config(&dir, &config_json.to_string());

    let config = config_loader::load(&path).unwrap();
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&config, events_tx);
    coordinator.initialize().await;

    let listed = coordinator.handle("tools/list", Value::Null).await.unwrap();
    let names: Vec<String> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"svc__read".to_string()), "{names:?}");
    assert!(names.contains(&"core__discover_tools_by_words".to_string()), "{names:?}");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn hide_core_tools_from_file_suppresses_core_tool_listing_but_not_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let config_json = serde_json::json!({
        "upstreams": [],
        "hide_core_tools": true,
    });
    let path = write_config(&dir, &config_json.to_string());

    let config = config_loader::load(&path).unwrap();
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let coordinator = ProxyCoordinator::build(&config, events_tx);
    coordinator.initialize().await;

    let listed = coordinator.handle("tools/list", Value::Null).await.unwrap();
    let names: Vec<String> = listed["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.is_empty(), "{names:?}");

    let result = coordinator
        .handle(
            "core__discover_tools_by_words",
            serde_json::json!({"keywords": ["read"]}),
        )
        .await;
    assert!(result.is_ok(), "hidden core tools must still dispatch by name");

    coordinator.shutdown().await;
}

#[tokio::test]
async fn a_config_file_with_duplicate_upstream_ids_fails_before_a_coordinator_is_built() {
    let dir = tempfile::tempdir().unwrap();
    let config_json = serde_json::json!({
        "upstreams": [
            {"id": "dup", "transport": {"kind": "stdio", "command": "echo"}},
            {"id": "dup", "transport": {"kind": "stdio", "command": "echo"}},
        ],
    });
    let path = write_config(&dir, &config_json.to_string());

    let err = config_loader::load(&path).unwrap_err();
    assert!(err.to_string().contains("dup"));
}

#[tokio::test]
async fn a_config_file_naming_an_unknown_transport_kind_fails_before_a_coordinator_is_built() {
    let dir = tempfile::tempdir().unwrap();
    let config_json = serde_json::json!({
        "upstreams": [
            {"id": "svc", "transport": {"kind": "carrier-pigeon"}},
        ],
    });
    let path = write_config(&dir, &config_json.to_string());

    let err = config_loader::load(&path).unwrap_err();
    assert!(err.to_string().contains("svc"));
    assert!(err.to_string().contains("carrier-pigeon"));
}
