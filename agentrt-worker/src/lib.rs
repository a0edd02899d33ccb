//! TaskExecutor implementation: kind dispatch (reindex/general/objective),
//! the bounded agent loop, and task-result artifact persistence (distilled
//! spec §4.3).

pub mod agent;
pub mod artifact;
pub mod executor;
pub mod indexer;

pub use agent::{AgentLoopContext, AgentLoopLimits, Responder, StepOutcome, StepRecord, ToolCall, ToolRegistry};
pub use executor::WorkerExecutor;
pub use indexer::Indexer;
