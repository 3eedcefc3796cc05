//! Core (proxy-native) tools (SPEC_FULL.md §4.H) — component J.
//!
//! These five tools are always registered under the reserved
//! [`CORE_UPSTREAM_ID`] upstream and execute in-process rather than being
//! forwarded to a backend server. There is no direct teacher analogue for
//! this surface (concrete tool implementations are out of scope per
//! SPEC_FULL.md §1) — it is built fresh in the registry's idiom, reusing
//! `ToolDescriptor`/`ToolRegistry` exactly as an upstream-sourced tool would.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use toolgate_core::error::ValidationError;
use toolgate_core::tool::{SearchMode, ToolDescriptor};

use crate::error::{GatewayError, UpstreamError};
use crate::registry::{ToolRegistry, CORE_UPSTREAM_ID};

pub const DISCOVER_TOOLS_BY_WORDS: &str = "core__discover_tools_by_words";
pub const GET_TOOL_SCHEMA: &str = "core__get_tool_schema";
pub const BRIDGE_TOOL_REQUEST: &str = "core__bridge_tool_request";
pub const LOAD_TOOLSET: &str = "core__load_toolset";
pub const MANAGE_COMMANDS: &str = "core__manage_commands";

const FIXED_CORE_TOOLS: &[(&str, &str)] = &[
    ("discover_tools_by_words", "Searches the tool catalog by keyword and optionally enables every match."),
    ("get_tool_schema", "Returns the input schema for a full tool name."),
    ("bridge_tool_request", "Invokes a tool by full name with the given arguments."),
    ("load_toolset", "Enables every tool in a pre-named toolset."),
    ("manage_commands", "Installs, updates, or removes an in-process stub tool implementation."),
];

/// Capability the coordinator implements so `bridge_tool_request` can reach
/// upstream-sourced tools without `core_tools` depending on the coordinator
/// directly.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, full_name: &str, arguments: Value) -> Result<Value, UpstreamError>;
}

/// Registers the five fixed core tools into `registry`. Always enabled;
/// exposed in `tools/list` unless `hide_core_tools` (SPEC_FULL.md §4.H).
/// Dispatch by name still works for hidden core tools.
pub fn register_core_tools(registry: &ToolRegistry, hide_core_tools: bool) {
    for (name, description) in FIXED_CORE_TOOLS {
        let schema = serde_json::json!({ "type": "object" });
        let mut descriptor = ToolDescriptor::new(CORE_UPSTREAM_ID, *name, *description, schema);
        descriptor.visibility.enable();
        if !hide_core_tools {
            descriptor.visibility.expose();
        }
        registry.upsert(descriptor);
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverParams {
    keywords: Vec<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    enable_all: bool,
}

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

#[derive(Debug, Deserialize)]
struct BridgeParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ManageCommandParams {
    action: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

/// Holds the mutable state core tools need beyond the registry: the named
/// toolset lists from configuration, and the stub handlers `manage_commands`
/// installs.
pub struct CoreTools {
    registry: std::sync::Arc<ToolRegistry>,
    toolsets: HashMap<String, Vec<String>>,
    stubs: DashMap<String, Value>,
}

impl CoreTools {
    pub fn new(registry: std::sync::Arc<ToolRegistry>, toolsets: HashMap<String, Vec<String>>) -> Self {
        Self {
            registry,
            toolsets,
            stubs: DashMap::new(),
        }
    }

    /// True if `full_name` names one of the five fixed core tools.
    pub fn is_core_tool(full_name: &str) -> bool {
        matches!(
            full_name,
            DISCOVER_TOOLS_BY_WORDS | GET_TOOL_SCHEMA | BRIDGE_TOOL_REQUEST | LOAD_TOOLSET | MANAGE_COMMANDS
        )
    }

    /// Dispatches a core tool call by full name. `dispatcher` is consulted
    /// only by `bridge_tool_request` when the resolved name is not itself a
    /// stub or core tool.
    pub async fn handle(
        &self,
        full_name: &str,
        params: Value,
        dispatcher: &dyn ToolDispatcher,
    ) -> Result<Value, GatewayError> {
        match full_name {
            DISCOVER_TOOLS_BY_WORDS => self.discover_tools_by_words(params),
            GET_TOOL_SCHEMA => self.get_tool_schema(params),
            BRIDGE_TOOL_REQUEST => self.bridge_tool_request(params, dispatcher).await,
            LOAD_TOOLSET => self.load_toolset(params),
            MANAGE_COMMANDS => self.manage_commands(params),
            other => Err(ValidationError::ToolNotFound(other.to_string()).into()),
        }
    }

    fn discover_tools_by_words(&self, params: Value) -> Result<Value, GatewayError> {
        let params: DiscoverParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;
        let mode = match params.mode.as_deref() {
            Some("or") | Some("OR") => SearchMode::Or,
            _ => SearchMode::And,
        };
        let matches = self.registry.search(&params.keywords, mode);
        if params.enable_all {
            let full_names: Vec<String> = matches.iter().map(|t| t.full_name.clone()).collect();
            self.registry.enable(&full_names);
        }
        Ok(serde_json::json!({
            "tools": matches.iter().map(descriptor_summary).collect::<Vec<_>>(),
        }))
    }

    fn get_tool_schema(&self, params: Value) -> Result<Value, GatewayError> {
        let params: NameParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;
        let full_name = self.registry.resolve(&params.name)?;
        let descriptor = self
            .registry
            .get(&full_name)
            .ok_or_else(|| ValidationError::ToolNotFound(params.name.clone()))?;
        Ok(descriptor.input_schema)
    }

    async fn bridge_tool_request(&self, params: Value, dispatcher: &dyn ToolDispatcher) -> Result<Value, GatewayError> {
        let params: BridgeParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;
        let full_name = self.registry.resolve(&params.name)?;

        if let Some(stub) = self.stubs.get(&full_name) {
            return Ok(serde_json::json!({
                "stub": true,
                "tool": full_name,
                "echo": params.arguments,
                "implementation": stub.clone(),
            }));
        }

        dispatcher
            .dispatch(&full_name, params.arguments)
            .await
            .map_err(GatewayError::from)
    }

    fn load_toolset(&self, params: Value) -> Result<Value, GatewayError> {
        let params: NameParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;
        let full_names = self
            .toolsets
            .get(&params.name)
            .ok_or_else(|| ValidationError::ToolNotFound(format!("toolset '{}'", params.name)))?;
        let enabled = self.registry.enable(full_names);
        Ok(serde_json::json!({ "enabled": enabled }))
    }

    /// Installs/updates/removes a stub in-process tool. Concrete arbitrary
    /// tool execution is out of scope (SPEC_FULL.md §1); `manage_commands`
    /// only maintains the control surface — a registered stub echoes
    /// whatever arguments `bridge_tool_request` is later called with.
    fn manage_commands(&self, params: Value) -> Result<Value, GatewayError> {
        let params: ManageCommandParams = serde_json::from_value(params)
            .map_err(|e| ValidationError::MalformedParams(e.to_string()))?;
        let full_name = format!("{CORE_UPSTREAM_ID}__{}", params.name);

        match params.action.as_str() {
            "install" | "update" => {
                let schema = params.input_schema.unwrap_or_else(|| serde_json::json!({ "type": "object" }));
                let description = params.description.unwrap_or_else(|| format!("stub command '{}'", params.name));
                let mut descriptor = ToolDescriptor::new(CORE_UPSTREAM_ID, &params.name, description, schema);
                descriptor.visibility.enable();
                descriptor.visibility.expose();
                self.registry.upsert(descriptor);
                self.stubs.insert(full_name.clone(), serde_json::json!({ "action": params.action }));
                info!(tool = %full_name, "registered stub command");
                Ok(serde_json::json!({ "installed": full_name }))
            }
            "remove" => {
                self.stubs.remove(&full_name);
                self.registry.disable(&[full_name.clone()]);
                Ok(serde_json::json!({ "removed": full_name }))
            }
            other => Err(ValidationError::MalformedParams(format!("unknown action '{other}'")).into()),
        }
    }
}

fn descriptor_summary(descriptor: &ToolDescriptor) -> Value {
    serde_json::json!({
        "name": descriptor.full_name,
        "description": descriptor.description,
        "enabled": descriptor.visibility.enabled(),
        "exposed": descriptor.visibility.exposed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoopDispatcher;

    #[async_trait]
    impl ToolDispatcher for NoopDispatcher {
        async fn dispatch(&self, _full_name: &str, arguments: Value) -> Result<Value, UpstreamError> {
            Ok(arguments)
        }
    }

    fn registry_with_tool() -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry.add_from_session("github", vec![ToolDescriptor::new("github", "read", "reads a file", Value::Null)]);
        registry
    }

    #[tokio::test]
    async fn discover_tools_by_words_can_enable_all_matches() {
        let registry = registry_with_tool();
        let core = CoreTools::new(registry.clone(), HashMap::new());
        let params = serde_json::json!({ "keywords": ["read"], "enable_all": true });
        core.discover_tools_by_words(params).unwrap();
        assert!(registry.get("github__read").unwrap().visibility.exposed());
    }

    #[tokio::test]
    async fn get_tool_schema_resolves_short_names() {
        let registry = registry_with_tool();
        registry.enable(&["github__read".to_string()]);
        let core = CoreTools::new(registry, HashMap::new());
        let schema = core.get_tool_schema(serde_json::json!({ "name": "read" })).unwrap();
        assert_eq!(schema, Value::Null);
    }

    #[tokio::test]
    async fn bridge_tool_request_forwards_to_dispatcher() {
        let registry = registry_with_tool();
        registry.enable(&["github__read".to_string()]);
        let core = CoreTools::new(registry, HashMap::new());
        let result = core
            .handle(
                BRIDGE_TOOL_REQUEST,
                serde_json::json!({ "name": "github__read", "arguments": { "path": "a.txt" } }),
                &NoopDispatcher,
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({ "path": "a.txt" }));
    }

    #[tokio::test]
    async fn load_toolset_enables_its_full_names() {
        let registry = registry_with_tool();
        let mut toolsets = HashMap::new();
        toolsets.insert("starter".to_string(), vec!["github__read".to_string()]);
        let core = CoreTools::new(registry.clone(), toolsets);
        core.load_toolset(serde_json::json!({ "name": "starter" })).unwrap();
        assert!(registry.get("github__read").unwrap().visibility.exposed());
    }

    #[tokio::test]
    async fn manage_commands_installs_and_removes_a_stub() {
        let registry = Arc::new(ToolRegistry::new());
        let core = CoreTools::new(registry.clone(), HashMap::new());
        core.manage_commands(serde_json::json!({ "action": "install", "name": "ping" }))
            .unwrap();
        assert!(registry.get("core__ping").is_some());

        let result = core
            .handle(
                BRIDGE_TOOL_REQUEST,
                serde_json::json!({ "name": "core__ping", "arguments": { "x": 1 } }),
                &NoopDispatcher,
            )
            .await
            .unwrap();
        assert_eq!(result["stub"], serde_json::json!(true));

        core.manage_commands(serde_json::json!({ "action": "remove", "name": "ping" }))
            .unwrap();
        assert!(!registry.get("core__ping").unwrap().visibility.enabled());
    }
}
