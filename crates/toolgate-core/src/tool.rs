//! Tool descriptor and visibility flags (SPEC_FULL.md §3, §4.H).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visibility state of a tool descriptor. Invariant: `exposed => enabled =>
/// discovered` (enforced by `ToolVisibility::set_enabled`/`set_exposed`, never
/// by callers setting fields directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolVisibility {
    discovered: bool,
    enabled: bool,
    exposed: bool,
}

impl ToolVisibility {
    /// A freshly discovered tool: visible to the registry, not yet routable.
    pub fn discovered() -> Self {
        Self {
            discovered: true,
            enabled: false,
            exposed: false,
        }
    }

    pub fn discovered_flag(&self) -> bool {
        self.discovered
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn exposed(&self) -> bool {
        self.exposed
    }

    /// Enables the tool. A no-op if already enabled (SPEC_FULL.md §8:
    /// `enable(X); enable(X)` is equivalent to `enable(X)`).
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disables the tool. Disabling also un-exposes it, preserving the
    /// invariant `exposed => enabled`.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.exposed = false;
    }

    /// Marks the tool exposed in the public `tools/list`. Requires `enabled`;
    /// a no-op otherwise (callers should `enable` first).
    pub fn expose(&mut self) {
        if self.enabled {
            self.exposed = true;
        }
    }

    pub fn unexpose(&mut self) {
        self.exposed = false;
    }
}

/// A single tool's descriptor, namespaced under its owning upstream.
///
/// `full_name` is `<upstream_id>__<local_name>` and is the only name used for
/// dispatch; `local_name` is a convenience lookup only (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub full_name: String,
    pub local_name: String,
    pub upstream_id: String,
    pub description: String,
    pub input_schema: Value,
    pub visibility: ToolVisibility,
}

impl ToolDescriptor {
    pub fn new(
        upstream_id: impl Into<String>,
        local_name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        let upstream_id = upstream_id.into();
        let local_name = local_name.into();
        let full_name = format!("{upstream_id}__{local_name}");
        Self {
            full_name,
            local_name,
            upstream_id,
            description: description.into(),
            input_schema,
            visibility: ToolVisibility::discovered(),
        }
    }

    /// True if this descriptor matches `keywords` under the given mode,
    /// case-insensitively across local name, description, and upstream id
    /// (SPEC_FULL.md §4.H `search`).
    pub fn matches(&self, keywords: &[String], mode: SearchMode) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let haystack = format!(
            "{} {} {}",
            self.local_name.to_lowercase(),
            self.description.to_lowercase(),
            self.upstream_id.to_lowercase()
        );
        let hits = keywords
            .iter()
            .map(|k| haystack.contains(&k.to_lowercase()));
        match mode {
            SearchMode::And => hits.fold(true, |acc, hit| acc && hit),
            SearchMode::Or => hits.fold(false, |acc, hit| acc || hit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    And,
    Or,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_is_prefixed_by_upstream_id() {
        let tool = ToolDescriptor::new("github", "read", "reads a file", Value::Null);
        assert_eq!(tool.full_name, "github__read");
    }

    #[test]
    fn exposed_implies_enabled_implies_discovered() {
        let mut v = ToolVisibility::discovered();
        assert!(v.discovered_flag());
        assert!(!v.enabled());
        v.expose(); // no-op: not enabled yet
        assert!(!v.exposed());
        v.enable();
        v.expose();
        assert!(v.exposed());
        assert!(v.enabled());
        v.disable();
        assert!(!v.enabled());
        assert!(!v.exposed());
    }

    #[test]
    fn search_and_mode_requires_all_keywords() {
        let tool = ToolDescriptor::new("github", "read_file", "reads a repository file", Value::Null);
        assert!(tool.matches(&["read".into(), "file".into()], SearchMode::And));
        assert!(!tool.matches(&["read".into(), "write".into()], SearchMode::And));
    }

    #[test]
    fn search_or_mode_requires_any_keyword() {
        let tool = ToolDescriptor::new("github", "read_file", "reads a repository file", Value::Null);
        assert!(tool.matches(&["nope".into(), "repository".into()], SearchMode::Or));
        assert!(!tool.matches(&["nope".into(), "nada".into()], SearchMode::Or));
    }
}
