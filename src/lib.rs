//! Bounded-concurrency task executor with a TTL and size bounded result cache.
//!
//! Callers submit key-identified async tasks; the [`Orchestrator`] runs them at
//! most `max_concurrent` at a time, reuses fresh cached results by key, and
//! returns values in submission order.

// Core infrastructure modules
pub mod core;

pub mod orchestrator;

// Re-exports for convenience
pub use crate::core::config::{OrchestratorConfig, OrchestratorConfigBuilder, Scheduling};
pub use crate::core::errors::{OrchestratorError, Result};
pub use crate::core::memory::{CachedEntryInfo, TaskCache};
pub use orchestrator::{task_key, Orchestrator, OrchestratorStats, Producer, Task};
