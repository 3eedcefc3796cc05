//! SPEC_FULL.md §8 S6 — Reconnect convergence: a re-fetched tool catalog
//! replaces the prior one atomically, stale entries disappear, and a
//! `ToolsListChanged` event fires once per successful (re)connect.

use std::sync::Arc;

use tempfile::tempdir;
use tokio::sync::mpsc;

use toolgate_core::config::TransportConfig;
use toolgate_core::event::DomainEvent;
use toolgate_gateway::{ToolRegistry, UpstreamSession};
use toolgate_transport::factory::TransportFactory;

use toolgate_integration_tests::{fake_stdio_server_with_phase, fast_reconnect, one_tool_json};

#[tokio::test]
async fn reconnect_replaces_stale_entries_and_preserves_visibility_when_the_name_survives() {
    let dir = tempdir().unwrap();
    let phase_file = dir.path().join("phase");
    let first_tools = one_tool_json("read", "reads a file");
    let second_tools = format!(
        "[{},{}]",
        one_tool_json("read", "reads a file"),
        one_tool_json("write", "writes a file")
    );
    let (command, args, env) = fake_stdio_server_with_phase(&phase_file, &first_tools, &second_tools);

    let registry = Arc::new(ToolRegistry::new());
    let factory = Arc::new(TransportFactory::new());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let session = UpstreamSession::new(
        "svc",
        TransportConfig::Stdio { command, args, env },
        fast_reconnect().to_runtime(),
        factory,
        None,
        Arc::clone(&registry),
        events_tx,
        false,
    );
    session.subscribe_state_changes().await;
    session.start().await;

    assert!(registry.get("svc__read").is_some());
    assert!(registry.get("svc__write").is_none());
    registry.enable(&["svc__read".to_string()]);
    assert!(registry.get("svc__read").unwrap().visibility.exposed());

    session.reconnect().await;

    let refreshed_read = registry
        .get("svc__read")
        .expect("a tool that survives the refresh keeps its entry");
    assert!(
        refreshed_read.visibility.exposed(),
        "a tool whose name survives the reconnect keeps its prior visibility"
    );
    let new_tool = registry.get("svc__write").expect("newly discovered tool is present");
    assert!(
        !new_tool.visibility.exposed(),
        "a tool discovered for the first time starts unexposed"
    );

    let mut list_changed = 0;
    while let Ok(event) = events_rx.try_recv() {
        if matches!(event, DomainEvent::ToolsListChanged { upstream_id: Some(ref id) } if id == "svc") {
            list_changed += 1;
        }
    }
    assert_eq!(list_changed, 2, "one ToolsListChanged per successful connect (initial + reconnect)");

    session.disconnect().await;
    assert!(registry.get("svc__read").is_none());
    assert!(registry.get("svc__write").is_none());
}
