// Check Runner
// Executes one check end to end: gate evaluation, event filtering, forEach
// fanout, the attempt loop with timeout and backoff, `fail_if` evaluation,
// and the commit into the context store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use tokio::time::Duration;

use vantage_expr::Evaluator;
use vantage_types::{
    CheckDefinition, CheckResult, CheckStatus, EngineEvent, RunOptions, SkipReason,
};

use crate::context::RunContext;
use crate::event_bus::EventBus;
use crate::registry::{
    ContextView, ProviderError, ProviderRegistry, ProviderRequest, UNKNOWN_PROVIDER_REASON,
};
use crate::report::check_metadata_value;
use crate::template::Templater;

pub const CANCELLED_REASON: &str = "cancelled";
pub const TIMEOUT_REASON: &str = "timeout";

pub struct CheckRunner {
    ctx: Arc<RunContext>,
    registry: Arc<ProviderRegistry>,
    bus: EventBus,
    evaluator: Arc<Evaluator>,
    options: Arc<RunOptions>,
}

impl CheckRunner {
    pub fn new(
        ctx: Arc<RunContext>,
        registry: Arc<ProviderRegistry>,
        bus: EventBus,
        evaluator: Arc<Evaluator>,
        options: Arc<RunOptions>,
    ) -> Self {
        Self {
            ctx,
            registry,
            bus,
            evaluator,
            options,
        }
    }

    /// Run the check to a terminal result and commit it. The committed
    /// result (also written to the context store) is returned for the
    /// scheduler's bookkeeping.
    pub async fn run_check(&self, check: &CheckDefinition) -> CheckResult {
        self.emit_started(&check.id);
        let scope = self.ctx.scope();

        // Gate evaluation.
        if let Some(gate) = check.gate.as_deref() {
            match self.evaluator.eval_predicate(gate, &scope) {
                Ok(true) => {}
                Ok(false) => {
                    return self.commit_skip(&check.id, SkipReason::ConditionFalse);
                }
                Err(e) => {
                    tracing::warn!(check_id = %check.id, error = %e, "gate evaluation failed");
                    let result = failed_result(format!("if: {e}"));
                    return self.commit(&check.id, result);
                }
            }
        }

        // Event-kind filter.
        if !check.enabled_for(self.ctx.event.kind) {
            return self.commit_skip(&check.id, SkipReason::EventNotMatched);
        }

        let mut result = match check.for_each.as_deref() {
            Some(for_each) => self.run_fanout(check, for_each, &scope).await,
            None => self.execute_attempts(check, &check.id, None).await,
        };

        // `fail_if` evaluation against the produced result.
        if let Some(fail_if) = check.fail_if.as_deref() {
            if result.status == CheckStatus::Ok {
                let mut scope = self.ctx.scope();
                if let Value::Object(root) = &mut scope {
                    root.insert(
                        "this".to_string(),
                        serde_json::to_value(&result).unwrap_or(Value::Null),
                    );
                    root.insert(
                        "metadata".to_string(),
                        check_metadata_value(&result.findings),
                    );
                }
                match self.evaluator.eval_predicate(fail_if, &scope) {
                    Ok(true) => {
                        result.status = CheckStatus::Failed;
                        result.failure_reason = Some(fail_if.to_string());
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(check_id = %check.id, error = %e, "fail_if evaluation failed");
                        result.status = CheckStatus::Failed;
                        result.failure_reason = Some(format!("fail_if: {e}"));
                    }
                }
            }
        }

        self.commit(&check.id, result)
    }

    /// Fanout: evaluate the `forEach` list and run one child per element,
    /// sequentially, each committed under `${id}[${index}]` with a local
    /// `each` binding. Children do not re-expand and do not inherit
    /// `fail_if`; the parent aggregates their outputs and worst status.
    async fn run_fanout(
        &self,
        check: &CheckDefinition,
        for_each: &str,
        scope: &Value,
    ) -> CheckResult {
        let started_at = Utc::now();
        let elements = match self.evaluator.eval_source(for_each, scope) {
            Ok(Value::Array(elements)) => elements,
            Ok(other) => {
                return failed_result(format!(
                    "forEach: expected a list, got {}",
                    vantage_expr::value::type_name(&other)
                ));
            }
            Err(e) => {
                tracing::warn!(check_id = %check.id, error = %e, "forEach evaluation failed");
                return failed_result(format!("forEach: {e}"));
            }
        };

        let mut child = check.clone();
        child.for_each = None;
        child.fail_if = None;

        let mut outputs = Vec::with_capacity(elements.len());
        let mut worst = CheckStatus::Ok;
        for (index, element) in elements.into_iter().enumerate() {
            let child_id = format!("{}[{}]", check.id, index);
            self.emit_started(&child_id);
            let child_result = self
                .execute_attempts(&child, &child_id, Some(element))
                .await;
            worst = worst.max(child_result.status);
            let child_result = self.commit(&child_id, child_result);
            outputs.push(child_result.output);
        }

        CheckResult {
            status: worst,
            findings: Vec::new(),
            output: Value::Array(outputs),
            started_at,
            ended_at: Utc::now(),
            attempts: 0,
            failure_reason: None,
        }
    }

    /// The attempt loop: render the payload, dispatch to the provider under
    /// the per-attempt timeout, and back off between failed attempts.
    async fn execute_attempts(
        &self,
        check: &CheckDefinition,
        check_id: &str,
        each: Option<Value>,
    ) -> CheckResult {
        let started_at = Utc::now();
        let max_attempts = check.retry.max_attempts.max(1);
        let mut attempts = 0;
        let mut last_failure: Option<(CheckStatus, String)> = None;

        while attempts < max_attempts {
            attempts += 1;

            // Suspension point: honor pause, observe stop.
            if !self.ctx.signals.wait_if_paused().await {
                return cancelled_result(started_at, attempts);
            }

            if self.options.dry_run {
                return CheckResult {
                    status: CheckStatus::Ok,
                    findings: Vec::new(),
                    output: Value::Null,
                    started_at,
                    ended_at: Utc::now(),
                    attempts,
                    failure_reason: None,
                };
            }

            let mut scope = self.ctx.scope();
            if let (Value::Object(root), Some(each)) = (&mut scope, each.clone()) {
                root.insert("each".to_string(), each);
            }

            let templater = Templater::new(&self.evaluator, self.options.prompt_cap);
            let payload = match templater.render_params(&check.params, &scope) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(check_id, error = %e, "payload rendering failed");
                    return CheckResult {
                        status: CheckStatus::Failed,
                        findings: Vec::new(),
                        output: Value::Null,
                        started_at,
                        ended_at: Utc::now(),
                        attempts,
                        failure_reason: Some(format!("template: {e}")),
                    };
                }
            };

            let Some(adapter) = self.registry.get(&check.check_type) else {
                return CheckResult {
                    status: CheckStatus::Error,
                    findings: Vec::new(),
                    output: Value::Null,
                    started_at,
                    ended_at: Utc::now(),
                    attempts,
                    failure_reason: Some(UNKNOWN_PROVIDER_REASON.to_string()),
                };
            };

            let request = ProviderRequest {
                check: check.clone(),
                payload,
                env: env_passthrough(&check.env_passthrough),
                dry_run: false,
            };
            let view = ContextView::new(scope);
            let attempt_token = self.ctx.signals.cancel_token().child_token();
            let invocation = adapter.execute(request, view, attempt_token.clone());

            let attempt_outcome = match check.timeout_ms {
                Some(timeout_ms) => {
                    match tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            // Tell the provider to stop doing whatever it is doing.
                            attempt_token.cancel();
                            tracing::debug!(check_id, attempt = attempts, "attempt timed out");
                            last_failure =
                                Some((CheckStatus::TimedOut, TIMEOUT_REASON.to_string()));
                            if let Some(result) = self
                                .next_attempt_or_finish(
                                    check,
                                    check_id,
                                    attempts,
                                    max_attempts,
                                    started_at,
                                    &last_failure,
                                )
                                .await
                            {
                                return result;
                            }
                            continue;
                        }
                    }
                }
                None => invocation.await,
            };

            match attempt_outcome {
                Ok(outcome) => {
                    return CheckResult {
                        status: CheckStatus::Ok,
                        findings: outcome.findings,
                        output: outcome.output,
                        started_at,
                        ended_at: Utc::now(),
                        attempts,
                        failure_reason: None,
                    };
                }
                Err(ProviderError::Cancelled) => {
                    return cancelled_result(started_at, attempts);
                }
                Err(ProviderError::Failure(message)) => {
                    tracing::debug!(check_id, attempt = attempts, error = %message, "attempt failed");
                    last_failure = Some((CheckStatus::Error, message));
                    if let Some(result) = self
                        .next_attempt_or_finish(
                            check,
                            check_id,
                            attempts,
                            max_attempts,
                            started_at,
                            &last_failure,
                        )
                        .await
                    {
                        return result;
                    }
                }
            }
        }

        let (status, reason) = last_failure
            .unwrap_or((CheckStatus::Error, "no attempts were made".to_string()));
        CheckResult {
            status,
            findings: Vec::new(),
            output: Value::Null,
            started_at,
            ended_at: Utc::now(),
            attempts,
            failure_reason: Some(reason),
        }
    }

    /// After a failed attempt: either back off before the next one (emitting
    /// `check.retry`), or build the final result when attempts are spent.
    /// Returns `Some(result)` when the loop must stop.
    async fn next_attempt_or_finish(
        &self,
        check: &CheckDefinition,
        check_id: &str,
        attempts: u32,
        max_attempts: u32,
        started_at: chrono::DateTime<Utc>,
        last_failure: &Option<(CheckStatus, String)>,
    ) -> Option<CheckResult> {
        if attempts >= max_attempts {
            let (status, reason) = last_failure
                .clone()
                .unwrap_or((CheckStatus::Error, "no attempts were made".to_string()));
            return Some(CheckResult {
                status,
                findings: Vec::new(),
                output: Value::Null,
                started_at,
                ended_at: Utc::now(),
                attempts,
                failure_reason: Some(reason),
            });
        }

        if self.ctx.signals.is_cancelled() {
            return Some(cancelled_result(started_at, attempts));
        }

        let mut delay_ms = check.retry.backoff_for_attempt(attempts);
        if check.retry.jitter && delay_ms > 0 {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.5);
            delay_ms = (delay_ms as f64 * factor) as u64;
        }
        self.bus.publish(EngineEvent::CheckRetry {
            run_id: self.ctx.run_id.clone(),
            check_id: check_id.to_string(),
            attempt: attempts + 1,
            delay_ms,
            timestamp: Utc::now(),
        });
        if delay_ms > 0 {
            let cancel = self.ctx.signals.cancel_token();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                _ = cancel.cancelled() => {
                    return Some(cancelled_result(started_at, attempts));
                }
            }
        }
        None
    }

    /// Commit a skip outcome: write the result slot and emit `check.skipped`.
    /// Also used by the scheduler for auto-skips of ineligible successors.
    pub fn commit_skip(&self, check_id: &str, reason: SkipReason) -> CheckResult {
        let result = CheckResult::skipped(reason, Utc::now());
        self.ctx.outputs.put(check_id, result.clone());
        self.bus.publish(EngineEvent::CheckSkipped {
            run_id: self.ctx.run_id.clone(),
            check_id: check_id.to_string(),
            reason,
            timestamp: Utc::now(),
        });
        result
    }

    fn commit(&self, check_id: &str, result: CheckResult) -> CheckResult {
        self.ctx.outputs.put(check_id, result.clone());
        self.ctx.append_issues(check_id, &result.findings);
        if !result.status.is_passing() {
            self.bus.publish(EngineEvent::CheckFailed {
                run_id: self.ctx.run_id.clone(),
                check_id: check_id.to_string(),
                status: result.status,
                reason: result
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| result.status.as_str().to_string()),
                timestamp: Utc::now(),
            });
        }
        self.bus.publish(EngineEvent::CheckCompleted {
            run_id: self.ctx.run_id.clone(),
            check_id: check_id.to_string(),
            status: result.status,
            attempts: result.attempts,
            timestamp: Utc::now(),
        });
        result
    }

    fn emit_started(&self, check_id: &str) {
        self.bus.publish(EngineEvent::CheckStarted {
            run_id: self.ctx.run_id.clone(),
            check_id: check_id.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn failed_result(reason: String) -> CheckResult {
    let now = Utc::now();
    CheckResult {
        status: CheckStatus::Failed,
        findings: Vec::new(),
        output: Value::Null,
        started_at: now,
        ended_at: now,
        attempts: 0,
        failure_reason: Some(reason),
    }
}

fn cancelled_result(started_at: chrono::DateTime<Utc>, attempts: u32) -> CheckResult {
    CheckResult {
        status: CheckStatus::Error,
        findings: Vec::new(),
        output: Value::Null,
        started_at,
        ended_at: Utc::now(),
        attempts,
        failure_reason: Some(CANCELLED_REASON.to_string()),
    }
}

/// Snapshot the process env vars matching the check's passthrough patterns.
fn env_passthrough(patterns: &[String]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if patterns.is_empty() {
        return env;
    }
    let compiled: Vec<glob::Pattern> = patterns
        .iter()
        .filter_map(|p| match glob::Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "invalid env_passthrough pattern");
                None
            }
        })
        .collect();
    for (key, value) in std::env::vars() {
        if compiled.iter().any(|p| p.matches(&key)) {
            env.insert(key, value);
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_passthrough_matches_globs() {
        std::env::set_var("VANTAGE_TEST_TOKEN", "abc");
        std::env::set_var("VANTAGE_TEST_REGION", "eu");
        std::env::set_var("UNRELATED_VAR", "x");
        let env = env_passthrough(&["VANTAGE_TEST_*".to_string()]);
        assert_eq!(env.get("VANTAGE_TEST_TOKEN").map(String::as_str), Some("abc"));
        assert_eq!(env.get("VANTAGE_TEST_REGION").map(String::as_str), Some("eu"));
        assert!(!env.contains_key("UNRELATED_VAR"));
    }

    #[test]
    fn empty_patterns_snapshot_nothing() {
        assert!(env_passthrough(&[]).is_empty());
    }
}
