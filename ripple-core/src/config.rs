//! Runtime configuration.
//!
//! Configuration is plain data: it can be built in code or loaded from JSON.
//! None of it affects correctness except the flush limit, which only turns a
//! runaway effect loop into an error.

use serde::{Deserialize, Serialize};

/// Default upper bound on effect executions in a single flush.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 10_000;

/// Debug logging switches.
///
/// When `enabled` is false the engine emits no per-node diagnostics at all.
/// `filter` restricts output to nodes whose debug name contains the given
/// substring; unnamed nodes are only logged when no filter is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub filter: Option<String>,
    /// Log elapsed time of actions and effect runs.
    pub timing: bool,
}

impl DebugConfig {
    /// Logging on for every node.
    pub fn verbose() -> Self {
        Self {
            enabled: true,
            filter: None,
            timing: true,
        }
    }

    /// Logging on, restricted to names containing `pattern`.
    pub fn filtered(pattern: impl Into<String>) -> Self {
        Self {
            enabled: true,
            filter: Some(pattern.into()),
            timing: false,
        }
    }

    /// Whether diagnostics for a node with this name should be emitted.
    pub fn allows(&self, name: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        match (&self.filter, name) {
            (None, _) => true,
            (Some(pattern), Some(name)) => name.contains(pattern.as_str()),
            (Some(_), None) => false,
        }
    }
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_flush_iterations: usize,
    pub debug: DebugConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
            debug: DebugConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
