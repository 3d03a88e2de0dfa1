// Trace Sink
// Optional NDJSON trace of every lifecycle event. The engine feeds the sink
// from a dedicated bus subscriber task, so a slow writer never blocks the
// scheduler.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use vantage_types::EngineEvent;

#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, event: &EngineEvent);
}

/// Serializes each event as one JSON object per line to any writer.
pub struct WriterTraceSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().expect("trace writer lock poisoned")
    }
}

#[async_trait]
impl<W: Write + Send> TraceSink for WriterTraceSink<W> {
    async fn record(&self, event: &EngineEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize trace event");
                return;
            }
        };
        let mut writer = self.writer.lock().expect("trace writer lock poisoned");
        if let Err(e) = writeln!(writer, "{line}") {
            tracing::warn!(error = %e, "failed to write trace event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vantage_types::EventKind;

    #[tokio::test]
    async fn writes_one_json_object_per_line() {
        let sink = WriterTraceSink::new(Vec::new());
        for run in ["r1", "r2"] {
            sink.record(&EngineEvent::RunStarted {
                run_id: run.to_string(),
                event_kind: EventKind::Cron,
                timestamp: Utc::now(),
            })
            .await;
        }
        let bytes = sink.into_inner();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "run.started");
        assert_eq!(first["run_id"], "r1");
    }
}
