use thiserror::Error;

/// Convenience type alias for Results with HubError
pub type Result<T> = std::result::Result<T, HubError>;

/// Error taxonomy for the coordination hub.
///
/// Protocol and state errors are reported back to the originating
/// channel as typed error events (see `crate::transport`) and never
/// tear down the connection. `Internal` is reserved for invariant
/// violations the Conflict Detector should otherwise be catching.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Invalid transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: String,
        from: crate::models::TaskStatus,
        to: crate::models::TaskStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
