// Failure Aggregation and Run Report
// Collects per-check outcomes into run-level counters, evaluates the global
// failure conditions, and assembles the report handed back to the caller.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use vantage_expr::{Evaluator, ExprError};
use vantage_types::{
    CheckResult, CheckStatus, ExecutionStatistics, Issue, RunState, Severity,
};

/// What `ExecutionEngine::run` returns once the run reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub state: RunState,
    pub statistics: ExecutionStatistics,
    /// All findings, ordered by `(ended_at, check_id, file, line)`.
    pub issues: Vec<Issue>,
    pub outputs: BTreeMap<String, CheckResult>,
    /// The failure-condition name (or fail-fast reason) when state is failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// The workflow's opaque `output` section, forwarded for frontends.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub workflow_output: Value,
}

/// Aggregated counters exposed to expressions as `metadata`.
///
/// Keys are camelCase because they are read from the expression language
/// (`metadata.failedChecks == 0`).
pub fn metadata_value(results: &BTreeMap<String, CheckResult>, issues: &[Issue]) -> Value {
    let mut by_severity = [0usize; 5];
    for issue in issues {
        let idx = match issue.severity {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        };
        by_severity[idx] += 1;
    }

    let count = |status: CheckStatus| results.values().filter(|r| r.status == status).count();

    let mut map = Map::new();
    map.insert("totalIssues".to_string(), Value::from(issues.len()));
    map.insert("infoIssues".to_string(), Value::from(by_severity[0]));
    map.insert("lowIssues".to_string(), Value::from(by_severity[1]));
    map.insert("mediumIssues".to_string(), Value::from(by_severity[2]));
    map.insert("highIssues".to_string(), Value::from(by_severity[3]));
    map.insert("criticalIssues".to_string(), Value::from(by_severity[4]));
    map.insert("totalChecks".to_string(), Value::from(results.len()));
    map.insert("okChecks".to_string(), Value::from(count(CheckStatus::Ok)));
    map.insert(
        "skippedChecks".to_string(),
        Value::from(count(CheckStatus::Skipped)),
    );
    map.insert(
        "failedChecks".to_string(),
        Value::from(count(CheckStatus::Failed)),
    );
    map.insert(
        "errorChecks".to_string(),
        Value::from(count(CheckStatus::Error)),
    );
    map.insert(
        "timedOutChecks".to_string(),
        Value::from(count(CheckStatus::TimedOut)),
    );
    Value::Object(map)
}

/// Per-check metadata for `fail_if`: counters over the check's own findings.
pub fn check_metadata_value(findings: &[Issue]) -> Value {
    metadata_value(&BTreeMap::new(), findings)
}

/// Evaluate the global failure conditions in name order against a scope
/// containing `metadata` and `outputs`. Returns the first truthy condition's
/// name. Evaluation errors fail the condition loudly: a broken failure
/// condition must not silently pass the run.
pub fn first_failed_condition(
    conditions: &BTreeMap<String, String>,
    evaluator: &Evaluator,
    scope: &Value,
) -> Result<Option<String>, ExprError> {
    for (name, source) in conditions {
        if evaluator.eval_predicate(source, scope)? {
            return Ok(Some(name.clone()));
        }
    }
    Ok(None)
}

/// Stable issue ordering: `(check ended_at, check_id, file, line)`.
pub fn sort_issues(issues: &mut [Issue], results: &BTreeMap<String, CheckResult>) {
    issues.sort_by(|a, b| {
        let ended = |issue: &Issue| results.get(&issue.check_id).map(|r| r.ended_at);
        ended(a)
            .cmp(&ended(b))
            .then_with(|| a.check_id.cmp(&b.check_id))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });
}

/// Build run statistics from committed results, in commit order.
pub fn build_statistics(
    results: &BTreeMap<String, CheckResult>,
    issues: &[Issue],
    wall_time_ms: u64,
) -> ExecutionStatistics {
    let mut ordered: Vec<(&String, &CheckResult)> = results.iter().collect();
    ordered.sort_by_key(|(id, r)| (r.ended_at, (*id).clone()));

    let mut stats = ExecutionStatistics::default();
    for (id, result) in ordered {
        let duration = (result.ended_at - result.started_at)
            .num_milliseconds()
            .max(0) as u64;
        stats.record(vantage_types::CheckTiming {
            check_id: id.clone(),
            status: result.status,
            attempts: result.attempts,
            duration_ms: duration,
        });
    }
    stats.total_issues = issues.len();
    stats.wall_time_ms = wall_time_ms;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn result(status: CheckStatus, ended_offset_ms: i64) -> CheckResult {
        let now = Utc::now();
        CheckResult {
            status,
            findings: Vec::new(),
            output: Value::Null,
            started_at: now,
            ended_at: now + Duration::milliseconds(ended_offset_ms),
            attempts: 1,
            failure_reason: None,
        }
    }

    fn issue(severity: Severity, check_id: &str) -> Issue {
        let mut issue = Issue::new(severity, "finding");
        issue.check_id = check_id.to_string();
        issue
    }

    #[test]
    fn metadata_counts_by_severity_and_status() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), result(CheckStatus::Ok, 0));
        results.insert("b".to_string(), result(CheckStatus::Failed, 0));
        let issues = vec![
            issue(Severity::Critical, "b"),
            issue(Severity::Low, "b"),
            issue(Severity::Critical, "a"),
        ];
        let metadata = metadata_value(&results, &issues);
        assert_eq!(metadata["totalIssues"], 3);
        assert_eq!(metadata["criticalIssues"], 2);
        assert_eq!(metadata["lowIssues"], 1);
        assert_eq!(metadata["failedChecks"], 1);
        assert_eq!(metadata["okChecks"], 1);
    }

    #[test]
    fn first_failed_condition_respects_name_order() {
        let evaluator = Evaluator::new();
        let mut conditions = BTreeMap::new();
        conditions.insert("a_fires".to_string(), "metadata.totalIssues > 0".to_string());
        conditions.insert("b_fires".to_string(), "true".to_string());
        let scope = serde_json::json!({ "metadata": { "totalIssues": 1 }, "outputs": {} });
        assert_eq!(
            first_failed_condition(&conditions, &evaluator, &scope).unwrap(),
            Some("a_fires".to_string())
        );
    }

    #[test]
    fn failure_condition_errors_surface() {
        let evaluator = Evaluator::new();
        let mut conditions = BTreeMap::new();
        conditions.insert("broken".to_string(), "no_such_root > 1".to_string());
        let scope = serde_json::json!({ "metadata": {}, "outputs": {} });
        assert!(first_failed_condition(&conditions, &evaluator, &scope).is_err());
    }

    #[test]
    fn issues_sort_by_completion_then_location() {
        let mut results = BTreeMap::new();
        results.insert("late".to_string(), result(CheckStatus::Ok, 500));
        results.insert("early".to_string(), result(CheckStatus::Ok, 0));
        let mut issues = vec![issue(Severity::Info, "late"), issue(Severity::Info, "early")];
        sort_issues(&mut issues, &results);
        assert_eq!(issues[0].check_id, "early");
        assert_eq!(issues[1].check_id, "late");
    }

    #[test]
    fn statistics_tally_results() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), result(CheckStatus::Ok, 10));
        results.insert("b".to_string(), result(CheckStatus::TimedOut, 20));
        let stats = build_statistics(&results, &[], 1234);
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.ok_checks, 1);
        assert_eq!(stats.timed_out_checks, 1);
        assert_eq!(stats.wall_time_ms, 1234);
        assert_eq!(stats.checks.len(), 2);
    }
}
