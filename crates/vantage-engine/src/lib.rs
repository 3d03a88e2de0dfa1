//! The Vantage execution core: turns a validated workflow plus a triggering
//! event into an ordered, concurrency-limited, failure-aware run of checks,
//! streaming lifecycle events to subscribers.
//!
//! The engine owns scheduling, per-check execution, the shared run context,
//! failure aggregation and the event bus. Everything that touches the outside
//! world (config loading, providers, frontends) is injected.

pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod template;
pub mod trace;


pub use context::*;
pub use control::*;
pub use engine::*;
pub use error::*;
pub use event_bus::*;
pub use registry::*;
pub use report::*;
pub use scheduler::*;
pub use state::*;
pub use template::*;
pub use trace::*;
