// Execution Engine Facade
// Orchestrates a run end to end: validates the workflow, builds the work
// graph, drives the scheduler loop over a bounded worker pool, aggregates
// failures and assembles the run report. One engine hosts one run at a time;
// `reset` returns a terminal engine to idle for the next run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use vantage_expr::Evaluator;
use vantage_types::{
    CheckStatus, EngineEvent, RunOptions, RunState, SkipReason, TriggerEvent, WorkflowConfig,
};

use crate::context::RunContext;
use crate::control::RunSignals;
use crate::error::{ConfigError, EngineError};
use crate::event_bus::{EventBus, EventSubscription};
use crate::registry::ProviderRegistry;
use crate::report::{
    build_statistics, first_failed_condition, metadata_value, sort_issues, RunReport,
};
use crate::runner::CheckRunner;
use crate::scheduler::{AutoSkip, WorkGraph};
use crate::state::StateMachine;
use crate::trace::TraceSink;

/// State shared between the engine loop and controllers.
struct EngineShared {
    machine: StdMutex<StateMachine>,
    state_tx: watch::Sender<RunState>,
    signals: RunSignals,
    bus: EventBus,
    current_run_id: StdMutex<Option<String>>,
}

impl EngineShared {
    fn state(&self) -> RunState {
        self.machine.lock().expect("state machine lock poisoned").state()
    }

    /// Validated transition without event emission; callers that need a
    /// specific event ordering emit themselves.
    fn transition_silent(&self, to: RunState) -> Result<RunState, EngineError> {
        self.machine
            .lock()
            .expect("state machine lock poisoned")
            .transition(to)
    }

    fn emit_state_changed(&self, from: RunState, to: RunState) {
        let _ = self.state_tx.send(to);
        let run_id = self
            .current_run_id
            .lock()
            .expect("run id lock poisoned")
            .clone();
        if let Some(run_id) = run_id {
            self.bus.publish(EngineEvent::RunStateChanged {
                run_id,
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    fn transition(&self, to: RunState) -> Result<(), EngineError> {
        let from = self.transition_silent(to)?;
        self.emit_state_changed(from, to);
        Ok(())
    }
}

/// Handle for pausing, resuming and stopping the run the engine is driving.
/// Cheap to clone and valid across runs of its engine.
#[derive(Clone)]
pub struct RunController {
    shared: Arc<EngineShared>,
}

impl RunController {
    /// Gate new dispatches and new attempts; in-flight provider calls run to
    /// completion.
    pub fn pause(&self) -> Result<(), EngineError> {
        self.shared.transition(RunState::Paused)?;
        self.shared.signals.set_paused(true);
        tracing::info!("run paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.shared.transition(RunState::Running)?;
        self.shared.signals.set_paused(false);
        tracing::info!("run resumed");
        Ok(())
    }

    /// Raise the cancel flag; in-flight checks observe it at their next
    /// suspension point.
    pub fn stop(&self) -> Result<(), EngineError> {
        self.shared.transition(RunState::Stopped)?;
        self.shared.signals.request_stop();
        tracing::info!("run stopped");
        Ok(())
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.shared.state_tx.subscribe()
    }
}

pub struct ExecutionEngine {
    registry: Arc<ProviderRegistry>,
    shared: Arc<EngineShared>,
    trace: Option<Arc<dyn TraceSink>>,
    last_run: StdMutex<Option<Arc<RunContext>>>,
}

impl ExecutionEngine {
    pub fn new(registry: ProviderRegistry) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        Self {
            registry: Arc::new(registry),
            shared: Arc::new(EngineShared {
                machine: StdMutex::new(StateMachine::new()),
                state_tx,
                signals: RunSignals::new(),
                bus: EventBus::new(),
                current_run_id: StdMutex::new(None),
            }),
            trace: None,
            last_run: StdMutex::new(None),
        }
    }

    /// Attach an NDJSON trace sink; it receives every lifecycle event on a
    /// dedicated subscriber task.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn controller(&self) -> RunController {
        RunController {
            shared: self.shared.clone(),
        }
    }

    /// Subscribe to lifecycle events. Frontends subscribe before `run`.
    pub fn subscribe(&self) -> EventSubscription {
        self.shared.bus.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.shared.state()
    }

    /// Return a terminal engine to `idle`, clearing the retained run context
    /// and any queued work.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.shared.transition(RunState::Idle)?;
        self.shared.signals.refresh();
        *self
            .last_run
            .lock()
            .expect("last run lock poisoned") = None;
        *self
            .shared
            .current_run_id
            .lock()
            .expect("run id lock poisoned") = None;
        Ok(())
    }

    /// Drive a workflow to a terminal state for one trigger event.
    ///
    /// Rejected with `InvalidStateTransition` unless the engine is idle;
    /// workflow validation failures are fatal before anything executes.
    pub async fn run(
        &self,
        workflow: WorkflowConfig,
        event: TriggerEvent,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let mut graph = WorkGraph::build(&workflow, &options)?;
        self.validate_providers(&graph, &event)?;

        // `start` is only legal from idle; this is also what keeps two
        // concurrent `run` calls from sharing the engine.
        let from = self.shared.transition_silent(RunState::Running)?;

        self.shared.signals.refresh();
        let ctx = RunContext::new(event, self.shared.signals.clone());
        *self
            .shared
            .current_run_id
            .lock()
            .expect("run id lock poisoned") = Some(ctx.run_id.clone());
        *self
            .last_run
            .lock()
            .expect("last run lock poisoned") = Some(ctx.clone());

        let trace_task = self.spawn_trace_task(&ctx.run_id);

        self.shared.bus.publish(EngineEvent::RunStarted {
            run_id: ctx.run_id.clone(),
            event_kind: ctx.event.kind,
            timestamp: Utc::now(),
        });
        self.shared.emit_state_changed(from, RunState::Running);
        tracing::info!(
            run_id = %ctx.run_id,
            checks = graph.selected_len(),
            max_parallelism = workflow.max_parallelism,
            "run started"
        );

        let evaluator = Arc::new(Evaluator::new());
        let options = Arc::new(options);
        let runner = Arc::new(CheckRunner::new(
            ctx.clone(),
            self.registry.clone(),
            self.shared.bus.clone(),
            evaluator.clone(),
            options.clone(),
        ));

        let fail_fast_reason = self
            .drive(&mut graph, &workflow, &runner, &evaluator, &ctx, &options)
            .await;

        let report = self.finish(&workflow, &ctx, &evaluator, fail_fast_reason);

        if let Some(task) = trace_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "trace subscriber task failed");
            }
        }

        Ok(report)
    }

    /// The scheduler loop: dispatch ready checks into the bounded worker
    /// pool, absorb completions, cascade auto-skips, and honor pause/stop.
    /// Returns the fail-fast primary reason if one fired.
    async fn drive(
        &self,
        graph: &mut WorkGraph,
        workflow: &WorkflowConfig,
        runner: &Arc<CheckRunner>,
        evaluator: &Arc<Evaluator>,
        ctx: &Arc<RunContext>,
        options: &Arc<RunOptions>,
    ) -> Option<String> {
        let semaphore = Arc::new(Semaphore::new(workflow.max_parallelism.max(1)));
        let mut join_set: JoinSet<(String, CheckStatus, Option<SkipReason>)> = JoinSet::new();
        let mut pause_rx = self.shared.signals.pause_watch();
        let mut fail_fast_reason: Option<String> = None;

        loop {
            // Dispatch while running, under the parallelism cap.
            while self.shared.state() == RunState::Running
                && !self.shared.signals.is_cancelled()
                && graph.has_ready()
            {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let Some(check_id) = graph.next_ready() else {
                    break;
                };
                let Some(check) = graph.check(&check_id).cloned() else {
                    continue;
                };
                let runner = runner.clone();
                join_set.spawn(async move {
                    let _permit = permit;
                    let result = runner.run_check(&check).await;
                    let skip_reason = result
                        .failure_reason
                        .as_deref()
                        .filter(|_| result.status == CheckStatus::Skipped)
                        .and_then(SkipReason::parse);
                    (check.id, result.status, skip_reason)
                });
            }

            if join_set.is_empty() {
                let state = self.shared.state();
                if self.shared.signals.is_cancelled() || state.is_terminal() {
                    break;
                }
                if graph.is_drained() && state != RunState::Paused {
                    break;
                }
                if state == RunState::Running && !graph.has_ready() && !graph.is_drained() {
                    // Nothing running, nothing ready, not drained: a worker
                    // was lost without reporting. Bail out instead of hanging.
                    tracing::error!("scheduler wedged with unfinished checks, aborting run loop");
                    break;
                }
            }

            tokio::select! {
                joined = join_set.join_next(), if !join_set.is_empty() => {
                    let Some(joined) = joined else { continue };
                    match joined {
                        Ok((check_id, status, skip_reason)) => {
                            self.absorb_completion(
                                graph,
                                runner,
                                &check_id,
                                status,
                                skip_reason,
                            );
                            if options.fail_fast && fail_fast_reason.is_none() {
                                fail_fast_reason = self.check_fail_fast(
                                    workflow, evaluator, ctx, &check_id, status,
                                );
                                if fail_fast_reason.is_some() {
                                    self.shared.signals.request_stop();
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "check worker task failed");
                        }
                    }
                }
                _ = pause_rx.changed() => {
                    // Re-evaluate dispatch and exit conditions.
                }
            }
        }

        fail_fast_reason
    }

    /// Record a completion and commit the cascade of auto-skips it unlocks.
    fn absorb_completion(
        &self,
        graph: &mut WorkGraph,
        runner: &Arc<CheckRunner>,
        check_id: &str,
        status: CheckStatus,
        skip_reason: Option<SkipReason>,
    ) {
        let mut queue: VecDeque<AutoSkip> =
            graph.complete(check_id, status, skip_reason).into();
        while let Some(skip) = queue.pop_front() {
            runner.commit_skip(&skip.check_id, skip.reason);
            queue.extend(graph.complete(
                &skip.check_id,
                CheckStatus::Skipped,
                Some(skip.reason),
            ));
        }
    }

    /// Fail-fast probe after a completion: the first truthy condition, local
    /// (`fail_if` already downgraded the check) or global, wins.
    fn check_fail_fast(
        &self,
        workflow: &WorkflowConfig,
        evaluator: &Arc<Evaluator>,
        ctx: &Arc<RunContext>,
        check_id: &str,
        status: CheckStatus,
    ) -> Option<String> {
        if status == CheckStatus::Failed {
            let reason = ctx
                .outputs
                .get(check_id)
                .and_then(|r| r.failure_reason)
                .unwrap_or_else(|| "fail_if".to_string());
            return Some(format!("{check_id}: {reason}"));
        }

        let outputs = ctx.outputs.snapshot();
        let issues = ctx.issues();
        let mut scope = ctx.scope();
        if let serde_json::Value::Object(root) = &mut scope {
            root.insert("metadata".to_string(), metadata_value(&outputs, &issues));
        }
        match first_failed_condition(&workflow.failure_conditions, evaluator, &scope) {
            Ok(fired) => fired,
            Err(e) => {
                tracing::warn!(error = %e, "failure condition evaluation failed");
                Some(format!("failure_conditions: {e}"))
            }
        }
    }

    /// Terminal bookkeeping: final state, failure aggregation, statistics,
    /// and the `run.completed` event.
    fn finish(
        &self,
        workflow: &WorkflowConfig,
        ctx: &Arc<RunContext>,
        evaluator: &Arc<Evaluator>,
        fail_fast_reason: Option<String>,
    ) -> RunReport {
        let outputs = ctx.outputs.snapshot();
        let mut issues = ctx.issues();
        sort_issues(&mut issues, &outputs);

        let (state, failure_reason) = match self.shared.state() {
            RunState::Running => {
                if let Some(reason) = fail_fast_reason {
                    let _ = self.shared.transition(RunState::Failed);
                    (RunState::Failed, Some(reason))
                } else {
                    let mut scope = ctx.scope();
                    if let serde_json::Value::Object(root) = &mut scope {
                        root.insert("metadata".to_string(), metadata_value(&outputs, &issues));
                    }
                    match first_failed_condition(
                        &workflow.failure_conditions,
                        evaluator,
                        &scope,
                    ) {
                        Ok(Some(name)) => {
                            let _ = self.shared.transition(RunState::Failed);
                            (RunState::Failed, Some(name))
                        }
                        Ok(None) => {
                            let _ = self.shared.transition(RunState::Completed);
                            (RunState::Completed, None)
                        }
                        Err(e) => {
                            let _ = self.shared.transition(RunState::Failed);
                            (RunState::Failed, Some(format!("failure_conditions: {e}")))
                        }
                    }
                }
            }
            // A stop mid-pause leaves the machine already terminal.
            RunState::Paused => {
                let _ = self.shared.transition(RunState::Stopped);
                (RunState::Stopped, None)
            }
            terminal => (terminal, fail_fast_reason),
        };

        let wall_time_ms = (Utc::now() - ctx.started_at).num_milliseconds().max(0) as u64;
        let statistics = build_statistics(&outputs, &issues, wall_time_ms);

        self.shared.bus.publish(EngineEvent::RunCompleted {
            run_id: ctx.run_id.clone(),
            state,
            statistics: statistics.clone(),
            failure_reason: failure_reason.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            run_id = %ctx.run_id,
            state = state.as_str(),
            checks = statistics.total_checks,
            issues = statistics.total_issues,
            "run finished"
        );

        RunReport {
            run_id: ctx.run_id.clone(),
            state,
            statistics,
            issues,
            outputs,
            failure_reason,
            workflow_output: workflow.output.clone(),
        }
    }

    /// Unknown provider types are fatal at run start, but only for checks
    /// that would actually dispatch (selected and enabled for the event).
    fn validate_providers(
        &self,
        graph: &WorkGraph,
        event: &TriggerEvent,
    ) -> Result<(), EngineError> {
        for check in graph.selected_checks() {
            if check.enabled_for(event.kind) && !self.registry.contains(&check.check_type) {
                return Err(ConfigError::UnknownProvider {
                    check_id: check.id.clone(),
                    provider: check.check_type.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn spawn_trace_task(&self, run_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let sink = self.trace.clone()?;
        let mut subscription = self.shared.bus.subscribe();
        let run_id = run_id.to_string();
        Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let done = matches!(
                    &event,
                    EngineEvent::RunCompleted { run_id: id, .. } if *id == run_id
                );
                sink.record(&event).await;
                if done {
                    break;
                }
            }
        }))
    }
}
