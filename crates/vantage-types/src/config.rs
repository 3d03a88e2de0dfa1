// Workflow Configuration and Run Options
// The engine consumes an already-validated WorkflowConfig; loading and schema
// validation live in an external config layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::check::CheckDefinition;

/// A validated workflow: the set of checks plus run-wide policy.
///
/// `checks` is a list rather than a map so that declaration order, which
/// seeds the scheduler's FIFO ready queue, survives serialization round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Upper bound on concurrently running checks.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Named global expressions; any truthy one fails the run.
    #[serde(default)]
    pub failure_conditions: BTreeMap<String, String>,
    #[serde(default)]
    pub checks: Vec<CheckDefinition>,
    /// Opaque to the engine, forwarded to frontends in the run report.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

fn default_max_parallelism() -> usize {
    1
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            version: None,
            max_parallelism: 1,
            failure_conditions: BTreeMap::new(),
            checks: Vec::new(),
            output: Value::Null,
        }
    }
}

impl WorkflowConfig {
    pub fn check(&self, id: &str) -> Option<&CheckDefinition> {
        self.checks.iter().find(|c| c.id == id)
    }
}

/// Per-invocation options for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Run only these check ids, in isolation; their dependency edges to
    /// unselected checks are dropped.
    #[serde(default)]
    pub only: Vec<String>,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    /// Stop the run at the first truthy failure condition, local or global.
    #[serde(default)]
    pub fail_fast: bool,
    /// Evaluate gates and emit lifecycle without invoking providers.
    #[serde(default)]
    pub dry_run: bool,
    /// Maximum characters in a rendered template; overflow is truncated
    /// with a sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_cap: Option<usize>,
}

impl RunOptions {
    /// Whether the check passes the `only` / tag selection filters.
    pub fn selects(&self, check: &CheckDefinition) -> bool {
        if !self.only.is_empty() && !self.only.iter().any(|id| *id == check.id) {
            return false;
        }
        if !self.include_tags.is_empty()
            && !check.tags.iter().any(|t| self.include_tags.contains(t))
        {
            return false;
        }
        if check.tags.iter().any(|t| self.exclude_tags.contains(t)) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(id: &str, tags: &[&str]) -> CheckDefinition {
        let mut check = CheckDefinition::new(id, "command");
        check.tags = tags.iter().map(|t| t.to_string()).collect();
        check
    }

    #[test]
    fn only_filter_selects_by_id() {
        let options = RunOptions {
            only: vec!["a".to_string()],
            ..RunOptions::default()
        };
        assert!(options.selects(&tagged("a", &[])));
        assert!(!options.selects(&tagged("b", &[])));
    }

    #[test]
    fn tag_filters_compose() {
        let options = RunOptions {
            include_tags: vec!["fast".to_string()],
            exclude_tags: vec!["flaky".to_string()],
            ..RunOptions::default()
        };
        assert!(options.selects(&tagged("a", &["fast"])));
        assert!(!options.selects(&tagged("b", &["slow"])));
        assert!(!options.selects(&tagged("c", &["fast", "flaky"])));
    }

    #[test]
    fn max_parallelism_defaults_to_one() {
        let config: WorkflowConfig = serde_json::from_value(serde_json::json!({
            "checks": []
        }))
        .unwrap();
        assert_eq!(config.max_parallelism, 1);
    }
}
