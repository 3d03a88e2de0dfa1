// Run State Machine
// Validates every transition of the top-level run state. The engine and the
// controller both funnel through `transition`; nothing mutates state directly.

use vantage_types::RunState;

use crate::error::EngineError;

/// Top-level run state with validated transitions.
///
/// ```text
/// idle     -> running                  (start)
/// running  -> paused                   (pause)
/// paused   -> running                  (resume)
/// running  -> stopped                  (stop)
/// paused   -> stopped                  (stop)
/// running  -> completed | failed       (terminal)
/// {stopped, completed, failed} -> idle (reset)
/// ```
#[derive(Debug)]
pub struct StateMachine {
    state: RunState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Apply a transition, rejecting anything outside the table above.
    pub fn transition(&mut self, to: RunState) -> Result<RunState, EngineError> {
        let from = self.state;
        if !Self::allowed(from, to) {
            return Err(EngineError::InvalidStateTransition { from, to });
        }
        self.state = to;
        Ok(from)
    }

    fn allowed(from: RunState, to: RunState) -> bool {
        use RunState::*;
        matches!(
            (from, to),
            (Idle, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Stopped)
                | (Paused, Stopped)
                | (Running, Completed)
                | (Running, Failed)
                | (Stopped, Idle)
                | (Completed, Idle)
                | (Failed, Idle)
        )
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
