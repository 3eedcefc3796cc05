//! Domain events forwarded from upstream sessions to the coordinator and, in
//! turn, to the downstream client (SPEC_FULL.md §4.G "forward server-
//! originated notifications", §4.I reconnect orchestration).
//!
//! Scoped down from `mcpmux-core::domain::event::DomainEvent` (which also
//! carries prompt/resource/space/permission variants tied to concepts out of
//! scope here) to the handful of events this proxy's core actually needs.

use serde_json::Value;

use crate::connection::StateTransition;

#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// An upstream's reconnection controller published a state transition.
    ConnectionStateChanged {
        upstream_id: String,
        transition: StateTransition,
    },
    /// The tool registry's public list changed (enable/disable, or a
    /// reconnect re-fetch replaced an upstream's entries).
    ToolsListChanged { upstream_id: Option<String> },
    /// A notification forwarded verbatim from an upstream (e.g.
    /// `notifications/tools/list_changed` before the registry re-fetch, or
    /// any other server-originated notification).
    UpstreamNotification {
        upstream_id: String,
        method: String,
        params: Option<Value>,
    },
}
