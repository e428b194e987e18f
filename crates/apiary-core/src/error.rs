//! Error types for apiary-core.
//!
//! Recoverable failures (handler errors, task retries, step retries) are
//! absorbed by the components and surface through status fields and logs.
//! This error type is reserved for caller mistakes: malformed workflow
//! definitions, unknown ids, or a full publish queue.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum Error {
    /// The bus queue is at capacity and the event was not accepted.
    #[error("event queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// A workflow definition failed structural validation.
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Workflow run id not known to the orchestrator.
    #[error("workflow run not found: {0}")]
    RunNotFound(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
