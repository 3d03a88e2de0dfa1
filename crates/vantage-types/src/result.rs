// Check Results and Findings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a check.
///
/// Ordering is badness: `Ok` is best, `TimedOut` worst. A fanout parent takes
/// the maximum status across its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Skipped,
    Failed,
    Error,
    TimedOut,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Ok => "ok",
            CheckStatus::Skipped => "skipped",
            CheckStatus::Failed => "failed",
            CheckStatus::Error => "error",
            CheckStatus::TimedOut => "timed_out",
        }
    }

    /// Statuses that do not block downstream checks.
    pub fn is_passing(self) -> bool {
        matches!(self, CheckStatus::Ok | CheckStatus::Skipped)
    }
}

/// Why a check was skipped instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Its `if` expression evaluated falsey.
    ConditionFalse,
    /// The triggering event kind is not in the check's `on` set.
    EventNotMatched,
    /// A dependency finished `failed`, `error` or `timed_out`.
    UpstreamFailed,
    /// A dependency was itself skipped in a way that propagates.
    UpstreamSkipped,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::ConditionFalse => "condition_false",
            SkipReason::EventNotMatched => "event_not_matched",
            SkipReason::UpstreamFailed => "upstream_failed",
            SkipReason::UpstreamSkipped => "upstream_skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "condition_false" => Some(SkipReason::ConditionFalse),
            "event_not_matched" => Some(SkipReason::EventNotMatched),
            "upstream_failed" => Some(SkipReason::UpstreamFailed),
            "upstream_skipped" => Some(SkipReason::UpstreamSkipped),
            _ => None,
        }
    }
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One finding produced by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Check that produced this issue; filled in by the engine on commit.
    #[serde(default)]
    pub check_id: String,
    /// Optional grouping key frontends use to cluster related findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
            category: None,
            check_id: String::new(),
            group: None,
        }
    }
}

/// The committed outcome of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default)]
    pub findings: Vec<Issue>,
    /// Opaque value exposed to downstream templates and expressions.
    #[serde(default)]
    pub output: Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub attempts: u32,
    /// Present when status is not `ok`: skip reason, failing expression,
    /// provider error, `timeout`, or `cancelled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl CheckResult {
    pub fn skipped(reason: SkipReason, at: DateTime<Utc>) -> Self {
        Self {
            status: CheckStatus::Skipped,
            findings: Vec::new(),
            output: Value::Null,
            started_at: at,
            ended_at: at,
            attempts: 0,
            failure_reason: Some(reason.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_orders_by_badness() {
        assert!(CheckStatus::Ok < CheckStatus::Skipped);
        assert!(CheckStatus::Skipped < CheckStatus::Failed);
        assert!(CheckStatus::Failed < CheckStatus::Error);
        assert!(CheckStatus::Error < CheckStatus::TimedOut);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CheckStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }

    #[test]
    fn severity_orders_info_to_critical() {
        assert!(Severity::Info < Severity::Critical);
        assert!(Severity::Medium < Severity::High);
    }
}
