pub mod executor;
pub mod stats;
pub mod task;

pub use executor::Orchestrator;
pub use stats::OrchestratorStats;
pub use task::{task_key, Producer, Task};
