//! End-to-end scenarios driven through the public engine surface, using the
//! built-in command and static adapters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vantage_engine::{
    EngineError, EventSubscription, ExecutionEngine, ProviderRegistry, WriterTraceSink,
};
use vantage_providers::{CommandAdapter, StaticAdapter};
use vantage_types::{
    CheckDefinition, CheckStatus, EngineEvent, EventKind, RunOptions, RunState, TriggerEvent,
    WorkflowConfig,
};

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(
        ProviderRegistry::new()
            .with_adapter(Arc::new(CommandAdapter::new()))
            .with_adapter(Arc::new(StaticAdapter::new())),
    )
}

fn command(id: &str, exec: &str) -> CheckDefinition {
    CheckDefinition::new(id, "command").with_param("exec", json!(exec))
}

fn static_check(id: &str) -> CheckDefinition {
    CheckDefinition::new(id, "static")
}

fn workflow(max_parallelism: usize, checks: Vec<CheckDefinition>) -> WorkflowConfig {
    WorkflowConfig {
        max_parallelism,
        checks,
        ..WorkflowConfig::default()
    }
}

/// Collect the check ids of `check.started` events currently queued.
async fn drain_started(events: &mut EventSubscription) -> Vec<String> {
    let mut started = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(20), events.next()).await
    {
        if let EngineEvent::CheckStarted { check_id, .. } = event {
            started.push(check_id);
        }
    }
    started
}

#[tokio::test]
async fn linear_chain_executes_in_declaration_order() {
    let engine = engine();
    let mut events = engine.subscribe();

    let checks = vec![
        command("a", "echo a"),
        command("b", "echo b").with_depends_on(&["a"]),
        command("c", "echo c").with_depends_on(&["b"]),
    ];
    let report = engine
        .run(
            workflow(4, checks),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.outputs.len(), 3);
    for id in ["a", "b", "c"] {
        let result = &report.outputs[id];
        assert_eq!(result.status, CheckStatus::Ok);
        assert_eq!(result.output, json!(id));
    }

    let started = drain_started(&mut events).await;
    assert_eq!(started, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn diamond_with_failure_skips_downstream_and_fails_run() {
    let engine = engine();

    let mut b = static_check("b");
    b.depends_on = vec!["a".to_string()];
    b.fail_if = Some("true".to_string());

    let checks = vec![
        static_check("a"),
        b,
        static_check("c").with_depends_on(&["a"]),
        static_check("d").with_depends_on(&["b", "c"]),
    ];
    let mut config = workflow(4, checks);
    config.failure_conditions = BTreeMap::from([(
        "no_failed".to_string(),
        "metadata.failedChecks > 0".to_string(),
    )]);

    let report = engine
        .run(
            config,
            TriggerEvent::new(EventKind::PrOpened),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.outputs["a"].status, CheckStatus::Ok);
    assert_eq!(report.outputs["b"].status, CheckStatus::Failed);
    assert_eq!(report.outputs["b"].failure_reason.as_deref(), Some("true"));
    assert_eq!(report.outputs["c"].status, CheckStatus::Ok);
    assert_eq!(report.outputs["d"].status, CheckStatus::Skipped);
    assert_eq!(
        report.outputs["d"].failure_reason.as_deref(),
        Some("upstream_failed")
    );

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.failure_reason.as_deref(), Some("no_failed"));
}

#[tokio::test]
async fn pause_mid_flight_then_resume_completes() {
    let engine = Arc::new(engine());
    let controller = engine.controller();
    let mut events = engine.subscribe();

    let checks = vec![
        static_check("alpha").with_param("delay_ms", json!(600)),
        static_check("beta")
            .with_param("delay_ms", json!(600))
            .with_depends_on(&["alpha"]),
        static_check("gamma")
            .with_param("delay_ms", json!(600))
            .with_depends_on(&["beta"]),
    ];

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .run(
                    workflow(1, checks),
                    TriggerEvent::new(EventKind::Manual),
                    RunOptions::default(),
                )
                .await
        })
    };

    // Wait for alpha to complete, then pause.
    loop {
        match events.next().await {
            Some(EngineEvent::CheckCompleted { check_id, .. }) if check_id == "alpha" => break,
            Some(_) => continue,
            None => panic!("bus closed before alpha completed"),
        }
    }
    controller.pause().unwrap();
    assert_eq!(controller.state(), RunState::Paused);

    // Let any already-dispatched work settle, then verify the started-span
    // count stays stable across a 900ms window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _settled = drain_started(&mut events).await;
    tokio::time::sleep(Duration::from_millis(900)).await;
    let started_during_pause = drain_started(&mut events).await;
    assert!(
        started_during_pause.is_empty(),
        "no check may start while paused, saw {started_during_pause:?}"
    );
    assert!(!run.is_finished());

    controller.resume().unwrap();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.state, RunState::Completed);
    for id in ["alpha", "beta", "gamma"] {
        assert_eq!(report.outputs[id].status, CheckStatus::Ok, "{id}");
    }
}

#[tokio::test]
async fn timeout_exhausts_retries() {
    let engine = engine();
    let mut events = engine.subscribe();

    let mut check = static_check("slow").with_param("delay_ms", json!(200));
    check.timeout_ms = Some(50);
    check.retry.max_attempts = 3;
    check.retry.backoff_ms = 10;

    let report = engine
        .run(
            workflow(1, vec![check]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let result = &report.outputs["slow"];
    assert_eq!(result.status, CheckStatus::TimedOut);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.failure_reason.as_deref(), Some("timeout"));
    assert_eq!(report.statistics.total_attempts, 3);

    let mut retries = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(20), events.next()).await
    {
        if matches!(event, EngineEvent::CheckRetry { .. }) {
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn for_each_fans_out_in_order() {
    let engine = engine();

    let mut fanout = command("fan", "echo {{ each }}");
    fanout.for_each = Some("[1, 2, 3]".to_string());

    let report = engine
        .run(
            workflow(2, vec![fanout]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let parent = &report.outputs["fan"];
    assert_eq!(parent.status, CheckStatus::Ok);
    assert_eq!(parent.output, json!([1, 2, 3]));
    for (index, expected) in [1, 2, 3].iter().enumerate() {
        let child = &report.outputs[&format!("fan[{index}]")];
        assert_eq!(child.status, CheckStatus::Ok);
        assert_eq!(child.output, json!(*expected));
    }
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn event_filter_skips_check_and_dependents() {
    let engine = engine();

    let mut gated = static_check("gated");
    gated.on = vec![EventKind::PrOpened];

    let mut opted_in = static_check("opted_in");
    opted_in.depends_on = vec!["gated".to_string()];
    opted_in.gate = Some("outputs.gated.status == 'skipped'".to_string());

    let checks = vec![
        gated,
        static_check("dependent").with_depends_on(&["gated"]),
        opted_in,
    ];
    let report = engine
        .run(
            workflow(2, checks),
            TriggerEvent::new(EventKind::PrClosed),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.outputs["gated"].status, CheckStatus::Skipped);
    assert_eq!(
        report.outputs["gated"].failure_reason.as_deref(),
        Some("event_not_matched")
    );
    assert_eq!(report.outputs["dependent"].status, CheckStatus::Skipped);
    assert_eq!(
        report.outputs["dependent"].failure_reason.as_deref(),
        Some("upstream_skipped")
    );
    // The gate referenced the upstream, so this one ran.
    assert_eq!(report.outputs["opted_in"].status, CheckStatus::Ok);
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn templates_read_upstream_outputs() {
    let engine = engine();

    let first = static_check("first").with_param("output", json!({ "grade": "A" }));
    let second = command("second", "echo grade={{ outputs.first.output.grade }}")
        .with_depends_on(&["first"]);

    let report = engine
        .run(
            workflow(1, vec![first, second]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.outputs["second"].output, json!("grade=A"));
}

#[tokio::test]
async fn only_filter_runs_checks_in_isolation() {
    let engine = engine();

    let checks = vec![
        static_check("lint"),
        static_check("build").with_depends_on(&["lint"]),
        static_check("deploy").with_depends_on(&["build"]),
    ];
    let options = RunOptions {
        only: vec!["build".to_string()],
        ..RunOptions::default()
    };
    let report = engine
        .run(
            workflow(2, checks),
            TriggerEvent::new(EventKind::Manual),
            options,
        )
        .await
        .unwrap();

    assert_eq!(report.outputs.len(), 1);
    assert_eq!(report.outputs["build"].status, CheckStatus::Ok);
    assert_eq!(report.state, RunState::Completed);
}

#[tokio::test]
async fn unknown_provider_is_fatal_at_start() {
    let engine = engine();
    let err = engine
        .run(
            workflow(1, vec![CheckDefinition::new("mystery", "nonexistent")]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    // The failed start leaves the engine idle and reusable.
    assert_eq!(engine.state(), RunState::Idle);
}

#[tokio::test]
async fn cyclic_workflow_is_fatal_at_start() {
    let engine = engine();
    let checks = vec![
        static_check("a").with_depends_on(&["b"]),
        static_check("b").with_depends_on(&["a"]),
    ];
    let err = engine
        .run(
            workflow(1, checks),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[tokio::test]
async fn reset_returns_engine_to_idle_for_reuse() {
    let engine = engine();

    let report = engine
        .run(
            workflow(1, vec![static_check("a")]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(engine.state(), RunState::Completed);

    // A second start without reset is an invalid transition.
    let err = engine
        .run(
            workflow(1, vec![static_check("a")]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStateTransition { .. }));

    engine.reset().unwrap();
    assert_eq!(engine.state(), RunState::Idle);

    let rerun = engine
        .run(
            workflow(1, vec![static_check("a")]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(rerun.state, RunState::Completed);
}

#[tokio::test]
async fn retry_recovers_after_transient_failures() {
    // Fails once via a marker file in a scratch dir, then succeeds.
    let engine = engine();
    let scratch = tempfile::tempdir().unwrap();
    let marker = scratch.path().join("first_attempt_done");

    let exec = format!(
        "if [ -f {marker} ]; then echo recovered; else touch {marker}; exit 1; fi",
        marker = marker.display()
    );
    let mut check = command("flaky", &exec);
    check.retry.max_attempts = 3;
    check.retry.backoff_ms = 10;

    let report = engine
        .run(
            workflow(1, vec![check]),
            TriggerEvent::new(EventKind::Manual),
            RunOptions::default(),
        )
        .await
        .unwrap();

    let result = &report.outputs["flaky"];
    assert_eq!(result.status, CheckStatus::Ok);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.output, json!("recovered"));
}

#[tokio::test]
async fn permission_gate_reads_event_actor() {
    let engine = engine();

    let mut privileged = static_check("privileged");
    privileged.gate = Some("hasMinPermission('MEMBER')".to_string());
    let mut open = static_check("open");
    open.gate = Some("hasMinPermission('CONTRIBUTOR')".to_string());

    let event = TriggerEvent::new(EventKind::IssueComment)
        .with_actor(vantage_types::ActorAssociation::Contributor);
    let report = engine
        .run(workflow(1, vec![privileged, open]), event, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.outputs["privileged"].status, CheckStatus::Skipped);
    assert_eq!(
        report.outputs["privileged"].failure_reason.as_deref(),
        Some("condition_false")
    );
    assert_eq!(report.outputs["open"].status, CheckStatus::Ok);
}

/// `Write` target the test can read back after the engine is done with it.
#[derive(Clone, Default)]
struct SharedBuf(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn trace_sink_records_ndjson_lifecycle() {
    let buf = SharedBuf::default();
    let engine = ExecutionEngine::new(
        ProviderRegistry::new().with_adapter(Arc::new(StaticAdapter::new())),
    )
    .with_trace_sink(Arc::new(WriterTraceSink::new(buf.clone())));

    let checks = vec![static_check("a"), static_check("b").with_depends_on(&["a"])];
    let report = engine
        .run(
            workflow(1, checks),
            TriggerEvent::new(EventKind::Cron),
            RunOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.state, RunState::Completed);

    let bytes = buf.0.lock().unwrap().clone();
    let text = String::from_utf8(bytes).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let kinds: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds.first(), Some(&"run.started"));
    assert_eq!(kinds.last(), Some(&"run.completed"));
    assert!(kinds.contains(&"check.started"));
    assert!(kinds.contains(&"check.completed"));
    assert!(events.iter().all(|e| e["run_id"] == json!(report.run_id)));
}

#[tokio::test]
async fn issues_flow_into_report_and_metadata() {
    let engine = engine();

    let noisy = static_check("noisy").with_param(
        "findings",
        json!([
            { "severity": "critical", "message": "secret committed", "file": "config.rs", "line": 3 },
            { "severity": "low", "message": "long line", "file": "main.rs", "line": 80 }
        ]),
    );
    let mut config = workflow(1, vec![noisy]);
    config.failure_conditions = BTreeMap::from([(
        "no_criticals".to_string(),
        "metadata.criticalIssues > 0".to_string(),
    )]);

    let report = engine
        .run(
            config,
            TriggerEvent::new(EventKind::PrUpdated),
            RunOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.issues.len(), 2);
    assert!(report.issues.iter().all(|i| i.check_id == "noisy"));
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.failure_reason.as_deref(), Some("no_criticals"));
    assert_eq!(report.statistics.total_issues, 2);
}
