//! Built-in provider adapters.
//!
//! Anything network- or LLM-shaped lives outside this workspace; what ships
//! here is the shell-command adapter and a canned-value adapter that the
//! engine's own tests (and dry harnesses) lean on.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use vantage_engine::{ContextView, ProviderAdapter, ProviderError, ProviderOutcome, ProviderRequest};
use vantage_types::Issue;

/// Runs the rendered `exec` payload field through the system shell.
///
/// Stdout that parses as JSON becomes the check output as-is; anything else
/// becomes a trimmed string. A non-zero exit status is a provider failure
/// (subject to the check's retry policy). The cancel handle kills the child.
pub struct CommandAdapter {
    shell: String,
}

impl CommandAdapter {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for CommandAdapter {
    fn type_name(&self) -> &str {
        "command"
    }

    async fn execute(
        &self,
        request: ProviderRequest,
        _ctx: ContextView,
        cancel: CancellationToken,
    ) -> Result<ProviderOutcome, ProviderError> {
        let Some(exec) = request.payload.get("exec").and_then(Value::as_str) else {
            return Err(ProviderError::Failure(
                "command check is missing the `exec` field".to_string(),
            ));
        };

        tracing::debug!(check_id = %request.check.id, exec, "running command");
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(exec)
            .envs(&request.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Failure(format!("failed to spawn shell: {e}")))?;

        let output = tokio::select! {
            // Dropping the wait future kills the child (kill_on_drop).
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            output = child.wait_with_output() => {
                output.map_err(|e| ProviderError::Failure(format!("failed to wait for command: {e}")))?
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ProviderError::Failure(format!(
                "command exited with {}: {detail}",
                output.status
            )));
        }

        let trimmed = stdout.trim();
        let output = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(_) => Value::String(trimmed.to_string()),
        };
        Ok(ProviderOutcome {
            output,
            findings: Vec::new(),
        })
    }
}

/// Returns a canned outcome described by its payload, optionally after a
/// delay. The test workhorse:
///
/// - `output`: the value to return (already template-rendered)
/// - `findings`: a list of issues to report
/// - `delay_ms`: sleep before returning, honoring the cancel handle
/// - `fail_with`: fail with this message instead of succeeding
pub struct StaticAdapter {
    type_name: String,
}

impl StaticAdapter {
    pub fn new() -> Self {
        Self {
            type_name: "static".to_string(),
        }
    }

    /// Register the same behavior under a different check `type` name.
    pub fn with_type_name(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl Default for StaticAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for StaticAdapter {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    async fn execute(
        &self,
        request: ProviderRequest,
        _ctx: ContextView,
        cancel: CancellationToken,
    ) -> Result<ProviderOutcome, ProviderError> {
        if let Some(delay_ms) = request.payload.get("delay_ms").and_then(Value::as_u64) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }

        if let Some(message) = request.payload.get("fail_with").and_then(Value::as_str) {
            return Err(ProviderError::Failure(message.to_string()));
        }

        let findings = match request.payload.get("findings") {
            Some(raw) => serde_json::from_value::<Vec<Issue>>(raw.clone())
                .map_err(|e| ProviderError::Failure(format!("invalid findings payload: {e}")))?,
            None => Vec::new(),
        };

        Ok(ProviderOutcome {
            output: request.payload.get("output").cloned().unwrap_or(Value::Null),
            findings,
        })
    }
}
