// Check Definitions
// A check is one named unit of work in a workflow: which provider runs it,
// what it depends on, and the predicates that gate or fail it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::EventKind;

/// Retry policy for a single check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. 1 means no retry.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `backoff_ms * 2^(n-1)`.
    #[serde(default)]
    pub backoff_ms: u64,
    /// Randomize each backoff within `[0.5x, 1.5x]`.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given attempt (1-based), without jitter applied.
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_ms.saturating_mul(1u64 << exp)
    }
}

/// A single check in the workflow DAG.
///
/// Fields the engine does not understand are collected into `params` and
/// handed opaquely to the provider adapter after template rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Stable identifier, unique within the workflow.
    pub id: String,
    /// Provider type that executes this check.
    #[serde(rename = "type")]
    pub check_type: String,
    /// Checks that must reach a terminal result before this one is eligible.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Event kinds that enable this check. Empty means every kind.
    #[serde(default)]
    pub on: Vec<EventKind>,
    /// Gate expression. Absent or empty means always eligible.
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    /// Evaluated against the produced result; truthy downgrades to `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_if: Option<String>,
    /// List-valued expression that fans the check out over its elements.
    #[serde(default, rename = "forEach", skip_serializing_if = "Option::is_none")]
    pub for_each: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt timeout. Absent means no engine-enforced timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Glob patterns selecting process env vars forwarded to the provider.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
    /// Provider-specific payload fields, opaque to the engine.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl CheckDefinition {
    pub fn new(id: impl Into<String>, check_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            check_type: check_type.into(),
            depends_on: Vec::new(),
            on: Vec::new(),
            gate: None,
            fail_if: None,
            for_each: None,
            retry: RetryPolicy::default(),
            timeout_ms: None,
            tags: Vec::new(),
            env_passthrough: Vec::new(),
            params: Map::new(),
        }
    }

    /// Whether this check is enabled for the given event kind.
    pub fn enabled_for(&self, kind: EventKind) -> bool {
        self.on.is_empty() || self.on.contains(&kind)
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let retry = RetryPolicy {
            max_attempts: 4,
            backoff_ms: 100,
            jitter: false,
        };
        assert_eq!(retry.backoff_for_attempt(1), 100);
        assert_eq!(retry.backoff_for_attempt(2), 200);
        assert_eq!(retry.backoff_for_attempt(3), 400);
    }

    #[test]
    fn empty_on_enables_all_kinds() {
        let check = CheckDefinition::new("lint", "command");
        assert!(check.enabled_for(EventKind::PrOpened));
        assert!(check.enabled_for(EventKind::Cron));
    }

    #[test]
    fn unknown_fields_collect_into_params() {
        let check: CheckDefinition = serde_json::from_value(serde_json::json!({
            "id": "review",
            "type": "ai",
            "prompt": "Review {{ event.payload.title }}",
            "model": "large"
        }))
        .unwrap();
        assert_eq!(check.params["prompt"], "Review {{ event.payload.title }}");
        assert_eq!(check.params["model"], "large");
    }

    #[test]
    fn if_and_for_each_use_wire_names() {
        let check: CheckDefinition = serde_json::from_value(serde_json::json!({
            "id": "fanout",
            "type": "command",
            "if": "length(outputs) > 0",
            "forEach": "[1, 2]"
        }))
        .unwrap();
        assert_eq!(check.gate.as_deref(), Some("length(outputs) > 0"));
        assert_eq!(check.for_each.as_deref(), Some("[1, 2]"));
    }
}
