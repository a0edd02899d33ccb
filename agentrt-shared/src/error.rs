//! Error taxonomy shared by MetaStore and its callers. Names are contracts
//! (see distilled spec §7): HTTP handlers and the observer/scheduler map
//! these variants to specific behaviors, not just log-and-ignore.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("queue is full")]
    QueueFull,

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("objective not found: {0}")]
    ObjectiveNotFound(String),

    #[error("context not found: {0}")]
    ContextNotFound(String),

    #[error("task {task_id} is not running for worker {worker_id}")]
    NotRunningForWorker { task_id: String, worker_id: i64 },

    #[error("run_key already exists: {0}")]
    AlreadyExists(String),

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("workspace is empty")]
    EmptyWorkspace,

    #[error("database error: {0}")]
    Database(String),

    #[error("io error: {0}")]
    Io(String),
}

impl StoreError {
    /// HTTP status code this error maps to per distilled spec §7.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::QueueFull => 429,
            StoreError::TaskNotFound(_) | StoreError::ObjectiveNotFound(_) => 404,
            StoreError::ContextNotFound(_) => 404,
            StoreError::AlreadyExists(_) => 409,
            StoreError::NotRunningForWorker { .. } => 409,
            StoreError::EmptyPrompt | StoreError::EmptyWorkspace => 400,
            StoreError::Database(_) | StoreError::Io(_) => 500,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
