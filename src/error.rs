//! Error types for PromptGuard.

use thiserror::Error;

/// Result type alias using PromptGuard's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during PromptGuard operations.
///
/// Parse failures are deliberately absent from this enum: a response the
/// parser cannot understand is recorded as a placeholder evaluation (see
/// [`crate::parser`]), never raised as an `Err`.
#[derive(Error, Debug)]
pub enum Error {
    /// The LLM adapter could not complete a call.
    #[error("transport error calling {model}: {message}")]
    Transport { model: String, message: String },

    /// A Fire Circle deliberation dropped below its minimum viable quorum.
    #[error("fire circle quorum lost: {active} active, {required} required")]
    Quorum { active: usize, required: usize },

    /// Invalid mode/model combination, missing credentials, or other
    /// construction-time misconfiguration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Evaluator recursion exceeded the configured maximum depth.
    #[error("recursion limit exceeded at depth {depth}")]
    RecursionLimit { depth: u32 },

    /// Deliberation storage I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error outside the tolerant response parser.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Cache backend I/O failure (disk backend).
    #[error("cache error: {0}")]
    Cache(String),
}

impl Error {
    /// Create a transport error for a specific model.
    pub fn transport(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a quorum-lost error.
    pub fn quorum(active: usize, required: usize) -> Self {
        Self::Quorum { active, required }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a recursion-limit error.
    pub fn recursion_limit(depth: u32) -> Self {
        Self::RecursionLimit { depth }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
