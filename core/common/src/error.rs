//! Common error types for omnisync.

use thiserror::Error;

/// How far a failure reaches when it is contained.
///
/// The orchestrator matches on this instead of relying on where an error
/// happened to be caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureScope {
    /// Only the current line or item is lost; the batch continues.
    Item,
    /// The current entity kind is aborted for this configuration.
    EntityKind,
    /// The whole configuration run is aborted.
    Configuration,
}

/// Top-level error type for synchronization operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No session could be obtained from the remote instance.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The remote instance lacks a model, method or required field.
    #[error("Feature unavailable on remote ({model}): {reason}")]
    FeatureUnavailable { model: String, reason: String },

    /// A referenced entity has no remote counterpart.
    #[error("Dependency unresolved on remote ({model}): {key}")]
    DependencyUnresolved { model: String, key: String },

    /// Timeout, connection reset or unreadable transport response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed configuration, rejected before it reaches the engine.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote executed the call and reported a fault.
    #[error("Remote fault in {model}.{method}: {message}")]
    RemoteFault {
        model: String,
        method: String,
        message: String,
    },

    /// Outbound sync refused because the record is already synced or came
    /// from a remote instance.
    #[error("Sync refused: {0}")]
    LoopPrevented(String),

    /// Another run of the same configuration holds the run lock.
    #[error("Already running: {0}")]
    AlreadyRunning(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local store operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a [`Error::FeatureUnavailable`].
    pub fn unavailable(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FeatureUnavailable {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::DependencyUnresolved`].
    pub fn unresolved(model: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DependencyUnresolved {
            model: model.into(),
            key: key.into(),
        }
    }

    /// Containment scope of this error.
    pub fn scope(&self) -> FailureScope {
        match self {
            Self::Authentication(_) | Self::Validation(_) | Self::AlreadyRunning(_) => {
                FailureScope::Configuration
            }
            Self::FeatureUnavailable { .. } | Self::Storage(_) | Self::Io(_) => {
                FailureScope::EntityKind
            }
            Self::DependencyUnresolved { .. }
            | Self::Transport(_)
            | Self::RemoteFault { .. }
            | Self::LoopPrevented(_)
            | Self::NotFound(_)
            | Self::InvalidInput(_)
            | Self::Serialization(_) => FailureScope::Item,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
