// Engine Lifecycle Events
// Published on the event bus for frontends and tracing; the serialized tag
// names match the NDJSON trace format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventKind;
use crate::result::{CheckStatus, SkipReason};
use crate::stats::ExecutionStatistics;

/// Top-level run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Stopped | RunState::Completed | RunState::Failed
        )
    }
}

/// Lifecycle event streamed to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "run.started")]
    RunStarted {
        run_id: String,
        event_kind: EventKind,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "run.state_changed")]
    RunStateChanged {
        run_id: String,
        from: RunState,
        to: RunState,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "check.started")]
    CheckStarted {
        run_id: String,
        check_id: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "check.completed")]
    CheckCompleted {
        run_id: String,
        check_id: String,
        status: CheckStatus,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "check.failed")]
    CheckFailed {
        run_id: String,
        check_id: String,
        status: CheckStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "check.skipped")]
    CheckSkipped {
        run_id: String,
        check_id: String,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "check.retry")]
    CheckRetry {
        run_id: String,
        check_id: String,
        /// The attempt about to start (2-based: the first retry is attempt 2).
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "run.completed")]
    RunCompleted {
        run_id: String,
        state: RunState,
        statistics: ExecutionStatistics,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failure_reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            EngineEvent::RunStarted { run_id, .. }
            | EngineEvent::RunStateChanged { run_id, .. }
            | EngineEvent::CheckStarted { run_id, .. }
            | EngineEvent::CheckCompleted { run_id, .. }
            | EngineEvent::CheckFailed { run_id, .. }
            | EngineEvent::CheckSkipped { run_id, .. }
            | EngineEvent::CheckRetry { run_id, .. }
            | EngineEvent::RunCompleted { run_id, .. } => run_id,
        }
    }
}
