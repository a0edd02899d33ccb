//! Shared domain types, configuration, and logging glue for the agent task
//! runtime workspace. Every other crate in the workspace depends on this one
//! for the `Task`/`Context`/`Objective` data model, the `StoreError`
//! taxonomy, and `RuntimeConfig`.

pub mod config;
pub mod context;
pub mod error;
pub mod heartbeat;
pub mod imap;
pub mod logging;
pub mod objective;
pub mod task;

pub use config::RuntimeConfig;
pub use context::Context;
pub use error::StoreError;
pub use imap::ImapMarker;
pub use objective::{Objective, TriggerType};
pub use task::{Task, TaskKind, TaskStatus};

pub type StoreResult<T> = Result<T, StoreError>;
