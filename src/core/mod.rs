// Core infrastructure shared by the orchestrator

pub mod config;
pub mod errors;
pub mod limits;
pub mod memory;

// Re-export commonly used types
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder, Scheduling};
pub use errors::{OrchestratorError, Result};
pub use limits::{InFlightGuard, InFlightTracker};
pub use memory::{CachedEntryInfo, CleanReport, TaskCache};
