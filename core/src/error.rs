use thiserror::Error;

/// Crate-wide error taxonomy. Validation, visibility, and timeout errors are
/// surfaced to the caller; dispatch, queue, and unknown-agent conditions are
/// recovered locally by the gateway and only ever show up in logs/metrics.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid event: {0}")]
    ValidationError(String),

    #[error("visibility error: {0}")]
    VisibilityError(String),

    #[error("mod dispatch error: {0}")]
    DispatchError(String),

    #[error("timed out waiting for response to {0}")]
    TimeoutError(String),

    #[error("agent '{0}' is not registered")]
    UnknownAgent(String),

    #[error("agent '{0}' is already registered")]
    DuplicateRegistration(String),

    #[error("channel '{0}' not found")]
    UnknownChannel(String),

    #[error("subscription '{0}' not found")]
    UnknownSubscription(String),

    #[error("mod error: {0}")]
    ModError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
