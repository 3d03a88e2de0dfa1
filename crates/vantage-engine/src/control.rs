// Run Control Signals
// Cancellation and pause flags shared between the engine loop, check runners
// and in-flight provider calls. Stop is a cancellation token (observed at
// suspension points and by well-behaved providers); pause is a watch flag the
// scheduler and runners block on cooperatively.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RunSignals {
    cancel: Arc<Mutex<CancellationToken>>,
    pause_tx: Arc<watch::Sender<bool>>,
}

impl RunSignals {
    pub fn new() -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            pause_tx: Arc::new(pause_tx),
        }
    }

    /// Fresh token and cleared pause flag for a new run. Called on start so a
    /// stop from a previous run does not leak into the next one.
    pub fn refresh(&self) {
        *self.cancel.lock().expect("cancel token lock poisoned") = CancellationToken::new();
        self.pause_tx.send_replace(false);
    }

    /// Token for the current run; providers get children of this.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().expect("cancel token lock poisoned").clone()
    }

    pub fn request_stop(&self) {
        self.cancel.lock().expect("cancel token lock poisoned").cancel();
        // A paused run must also observe the stop.
        self.pause_tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .lock()
            .expect("cancel token lock poisoned")
            .is_cancelled()
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause_tx.send_replace(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub fn pause_watch(&self) -> watch::Receiver<bool> {
        self.pause_tx.subscribe()
    }

    /// Block while paused. Returns `false` if the run was cancelled while
    /// waiting (or already was), `true` once clear to proceed.
    pub async fn wait_if_paused(&self) -> bool {
        let cancel = self.cancel_token();
        let mut watch = self.pause_tx.subscribe();
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if !*watch.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = watch.changed() => {
                    if changed.is_err() {
                        return !cancel.is_cancelled();
                    }
                }
            }
        }
    }
}

impl Default for RunSignals {
    fn default() -> Self {
        Self::new()
    }
}
