//! Traversal and session settings, loadable from a JSON file.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DEPTH: usize = 1024;
pub const DEFAULT_MAX_WIDTH_SUPPORTED: u32 = 2048;

/// Per-pass traversal behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Deepest context stack allowed before a `DepthExceeded` fault.
    pub max_depth: usize,
    /// Visit each shared node once per pass; later arrivals get `revisit`.
    pub visit_dag_once: bool,
    /// Replace already rewritten children before preorder runs.
    pub forward_children: bool,
    /// Run the join-point setup pass and merge flows at join points (inspectors only).
    pub join_flows: bool,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        TraversalConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            visit_dag_once: true,
            forward_children: true,
            join_flows: false,
        }
    }
}

impl TraversalConfig {
    pub fn with_join_flows(mut self) -> Self {
        self.join_flows = true;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Widest `bit<N>` accepted without an "unsupported" diagnostic.
    pub max_width_supported: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig { max_width_supported: DEFAULT_MAX_WIDTH_SUPPORTED }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub traversal: TraversalConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Config::from_json(&text).with_context(|| format!("in {}", path.display()))
    }
}
