//! Tool registry (SPEC_FULL.md §4.H) — component H.
//!
//! Maintains the full-name-indexed map of every tool discovered across every
//! upstream, plus the fixed set of always-on core tools. Grounded on
//! `mcpmux-gateway::services::prefix_cache::SpacePrefixCache`'s per-space
//! concurrent map, simplified to a single `DashMap` since `full_name` already
//! carries the upstream prefix and no separate prefix table is needed.

use std::collections::HashMap;

use dashmap::DashMap;

use toolgate_core::error::ValidationError;
use toolgate_core::tool::{SearchMode, ToolDescriptor};

/// The upstream id reserved for in-process core tools (SPEC_FULL.md §4.H).
pub const CORE_UPSTREAM_ID: &str = "core";

/// Full-name-indexed tool catalog shared by every upstream session and the
/// coordinator. Cheap to clone (wraps an `Arc`-free `DashMap` by reference;
/// callers hold it behind their own `Arc`).
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every entry previously contributed by `upstream_id` with
    /// `descriptors`, atomically from callers' point of view (no
    /// intermediate state where both old and new entries for the same
    /// upstream are visible). Entries whose full name survives the refresh
    /// keep their prior visibility — a reconnect's `tools/list` re-fetch
    /// must not silently re-hide a tool an operator already enabled
    /// (SPEC_FULL.md §8 S6 "reconnect convergence").
    pub fn add_from_session(&self, upstream_id: &str, descriptors: Vec<ToolDescriptor>) {
        let prior_visibility: HashMap<String, toolgate_core::tool::ToolVisibility> = self
            .tools
            .iter()
            .filter(|entry| entry.value().upstream_id == upstream_id)
            .map(|entry| (entry.key().clone(), entry.value().visibility))
            .collect();

        self.tools.retain(|_, tool| tool.upstream_id != upstream_id);

        for mut descriptor in descriptors {
            if let Some(visibility) = prior_visibility.get(&descriptor.full_name) {
                descriptor.visibility = *visibility;
            }
            self.tools.insert(descriptor.full_name.clone(), descriptor);
        }
    }

    /// Deletes every entry contributed by `upstream_id`. Entries from other
    /// upstreams (and core tools, which use a reserved upstream id of their
    /// own) are untouched.
    pub fn remove_from_session(&self, upstream_id: &str) {
        self.tools.retain(|_, tool| tool.upstream_id != upstream_id);
    }

    /// Inserts or replaces a single descriptor (used by core tools, which
    /// register themselves individually rather than through a session
    /// refresh).
    pub fn upsert(&self, descriptor: ToolDescriptor) {
        self.tools.insert(descriptor.full_name.clone(), descriptor);
    }

    pub fn get(&self, full_name: &str) -> Option<ToolDescriptor> {
        self.tools.get(full_name).map(|entry| entry.value().clone())
    }

    /// Case-insensitive substring search over local name + description +
    /// upstream id (SPEC_FULL.md §4.H).
    pub fn search(&self, keywords: &[String], mode: SearchMode) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|entry| entry.value().matches(keywords, mode))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Every descriptor currently exposed (the set `tools/list` returns
    /// downstream).
    pub fn exposed_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .filter(|entry| entry.value().visibility.exposed())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Enables and exposes each full name present in the registry; missing
    /// names are silently skipped (SPEC_FULL.md §4.H: "Enabling a
    /// non-existent name is a no-op"). Returns the full names that were
    /// actually toggled, for callers that need to decide whether a
    /// list-changed notification is warranted.
    pub fn enable(&self, full_names: &[String]) -> Vec<String> {
        let mut toggled = Vec::new();
        for name in full_names {
            if let Some(mut entry) = self.tools.get_mut(name) {
                entry.visibility.enable();
                entry.visibility.expose();
                toggled.push(name.clone());
            }
        }
        toggled
    }

    /// Disables (and implicitly un-exposes) each full name present in the
    /// registry. Missing names are a no-op.
    pub fn disable(&self, full_names: &[String]) -> Vec<String> {
        let mut toggled = Vec::new();
        for name in full_names {
            if let Some(mut entry) = self.tools.get_mut(name) {
                entry.visibility.disable();
                toggled.push(name.clone());
            }
        }
        toggled
    }

    /// Resolves a short (unprefixed) name to a full name if it is unique
    /// across currently enabled tools. Returns `ToolNotFound` if no enabled
    /// tool has that local name, `AmbiguousToolName` if more than one does.
    pub fn resolve(&self, short_name: &str) -> Result<String, ValidationError> {
        if self.tools.contains_key(short_name) {
            return Ok(short_name.to_string());
        }

        let matches: Vec<String> = self
            .tools
            .iter()
            .filter(|entry| entry.value().visibility.enabled() && entry.value().local_name == short_name)
            .map(|entry| entry.key().clone())
            .collect();

        match matches.len() {
            0 => Err(ValidationError::ToolNotFound(short_name.to_string())),
            1 => Ok(matches.into_iter().next().unwrap()),
            _ => Err(ValidationError::AmbiguousToolName(short_name.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
