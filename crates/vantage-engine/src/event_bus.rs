// Event Bus
// In-process pub/sub of lifecycle events. Publishing never blocks: each
// subscriber has a bounded buffer and a lagging subscriber loses the oldest
// events, with the loss surfaced through its dropped-event counter.

use tokio::sync::broadcast;

use vantage_types::EngineEvent;

const DEFAULT_CAPACITY: usize = 2048;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds each subscriber's buffer; overflow drops oldest.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        // Send only fails when there are no subscribers, which is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's ordered view of the event stream.
pub struct EventSubscription {
    rx: broadcast::Receiver<EngineEvent>,
    dropped: u64,
}

impl EventSubscription {
    /// Next event in emission order, or `None` once the bus is closed.
    /// Buffer overflow is absorbed here and tallied in `dropped`.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                    tracing::warn!(dropped = n, "event subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events lost to buffer overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
