//! Error types for Duet

use thiserror::Error;

/// Result type alias for Duet operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Duet
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: invalid {field} '{value}': {reason}")]
    Config {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Response API error: code={code}, message={message}")]
    ResponseFailed { code: String, message: String },

    #[error("stream ended without completion")]
    StreamIncomplete,

    #[error("Request cancelled")]
    Cancelled,

    #[error("incompatible model type: {0}")]
    IncompatibleProvider(String),

    #[error("api mode mismatch: conversation was recorded with {stored}, thread is configured for {configured}")]
    ApiModeMismatch { stored: String, configured: String },

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error naming the offending field and value.
    pub fn config(field: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Config {
            field: field.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
