//! Runtime configuration.
//!
//! All settings have defaults, so an empty JSON object is a valid
//! configuration:
//!
//! ```rust
//! use cascade_core::config::{Config, CycleDetection, FailurePolicy};
//!
//! let config = Config::from_json(r#"{ "engine": { "failure_policy": "log" } }"#).unwrap();
//! assert_eq!(config.engine.failure_policy, FailurePolicy::Log);
//! assert_eq!(config.graph.cycle_detection, CycleDetection::Transitive);
//! ```

use serde::{Deserialize, Serialize};

/// What the notification engine does with handler failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Collect every failure and return them to the writer.
    #[default]
    Propagate,

    /// Log every failure and report the write as successful.
    Log,
}

/// How much of the graph is checked for cycles when an edge is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleDetection {
    /// Reject only self-links and a pair that is already linked the other
    /// way round. Longer cycles are accepted and make `value()` recurse
    /// without bound, so callers must avoid them.
    Immediate,

    /// Walk the ancestors of the prospective parent and reject any edge that
    /// would close a cycle.
    #[default]
    Transitive,
}

/// Settings for [`PropertyStore`](crate::notify::PropertyStore) dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub failure_policy: FailurePolicy,
}

/// Settings for [`StateGraph`](crate::graph::StateGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub cycle_detection: CycleDetection,
}

/// Top-level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub graph: GraphConfig,
}

impl Config {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_default() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine.failure_policy, FailurePolicy::Propagate);
        assert_eq!(config.graph.cycle_detection, CycleDetection::Transitive);
    }

    #[test]
    fn parses_all_settings() {
        let config = Config::from_json(
            r#"{
                "engine": { "failure_policy": "log" },
                "graph": { "cycle_detection": "immediate" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.engine.failure_policy, FailurePolicy::Log);
        assert_eq!(config.graph.cycle_detection, CycleDetection::Immediate);
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(Config::from_json(r#"{ "engine": { "failure_policy": "ignore" } }"#).is_err());
    }
}
