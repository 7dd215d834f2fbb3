use thiserror::Error;

/// Core error types for planvis operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Malformed plan metadata for key '{key}': {message}")]
    MalformedMetadata { key: String, message: String },

    #[error("Could not generate identifier: {0}")]
    IdGeneration(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new MalformedMetadata error
    pub fn malformed_metadata(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedMetadata {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new IdGeneration error
    pub fn id_generation(message: impl Into<String>) -> Self {
        Self::IdGeneration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
