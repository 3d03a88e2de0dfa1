// Provider Registry
// Looks up the adapter that executes a check, keyed by the check's `type`.
// Adapters are injected at engine construction and must be safe to call
// concurrently from multiple workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use vantage_types::{CheckDefinition, Issue};

/// Failure reason recorded when a check names a type with no adapter.
pub const UNKNOWN_PROVIDER_REASON: &str = "unknown_provider";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Failure(String),

    #[error("cancelled")]
    Cancelled,
}

/// What an adapter produces on success. The engine owns status mapping,
/// timestamps and attempt counting; adapters only report output and findings.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutcome {
    /// Opaque value exposed to downstream templates and expressions.
    pub output: Value,
    pub findings: Vec<Issue>,
}

/// One dispatch to an adapter.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub check: CheckDefinition,
    /// The check's provider-specific params after template rendering.
    pub payload: Value,
    /// Process env vars matching the check's `env_passthrough` patterns.
    pub env: std::collections::BTreeMap<String, String>,
    /// True when the run is a dry run that still dispatches to this adapter.
    pub dry_run: bool,
}

/// Frozen view of the run context handed to adapters. Adapters must not
/// mutate run state; they only read.
#[derive(Debug, Clone)]
pub struct ContextView {
    root: Arc<Value>,
}

impl ContextView {
    pub fn new(root: Value) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn output_of(&self, check_id: &str) -> Option<&Value> {
        self.root.get("outputs")?.get(check_id)?.get("output")
    }
}

/// A pluggable executor that turns a check definition plus rendered payload
/// into a result. Must honor `cancel` within a bounded latency.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The `type` name checks use to select this adapter.
    fn type_name(&self) -> &str;

    async fn execute(
        &self,
        request: ProviderRequest,
        ctx: ContextView,
        cancel: CancellationToken,
    ) -> Result<ProviderOutcome, ProviderError>;
}

/// Adapter lookup table, populated at engine construction.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters
            .insert(adapter.type_name().to_string(), adapter);
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.adapters.contains_key(type_name)
    }
}
