// Engine Error Types

use thiserror::Error;

use vantage_types::RunState;

/// Workflow validation failures, fatal at run start.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("duplicate check id `{0}`")]
    DuplicateCheckId(String),

    #[error("check `{check_id}` depends on unknown check `{dependency_id}`")]
    UnknownDependency {
        check_id: String,
        dependency_id: String,
    },

    #[error("dependency cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("check `{check_id}` uses unknown provider type `{provider}`")]
    UnknownProvider { check_id: String, provider: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid state transition from {} to {}", from.as_str(), to.as_str())]
    InvalidStateTransition { from: RunState, to: RunState },

    #[error("engine worker failed: {0}")]
    Worker(String),
}
