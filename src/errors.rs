//! Typed error hierarchy for pushpoll.
//!
//! Four enums cover the four failure domains:
//! - `StreamError`: push connection transport failures
//! - `CompletionError`: external completion API failures
//! - `RelayError`: terminal failures of a relay session or poll job
//! - `ConfigError`: configuration loading failures

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from writing to a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Client disconnected")]
    TransportClosed,

    #[error("Connection cancelled")]
    Cancelled,
}

/// Errors from the external completion API.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("Request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("No response generated")]
    EmptyResponse,

    #[error("Stream error: {0}")]
    Stream(String),
}

/// Terminal failures of a relay session or a background poll job.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Request timed out after {}s", .0.as_secs())]
    Deadline(Duration),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

impl RelayError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, RelayError::Deadline(_))
    }
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}
