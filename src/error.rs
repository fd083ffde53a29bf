//! Error types for Almanac.
//!
//! These are Rust-level failures (bad config, an unreachable backend, a
//! malformed model response). Field-level extraction problems are reported
//! through [`crate::resolver::ParseIssue`] instead and never abort a parse.

use thiserror::Error;

/// Main error type for Almanac operations.
#[derive(Error, Debug)]
pub enum AlmanacError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    #[error("Enhancer error: {0}")]
    Enhancer(#[from] EnhancerError),

    #[error("Internal fault: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors raised by secondary (deterministic) recognizers.
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("Recognizer {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Recognizer backend error: {0}")]
    Backend(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Errors raised by the language-model enhancer.
#[derive(Error, Debug)]
pub enum EnhancerError {
    #[error("Language model unavailable")]
    Unavailable,

    #[error("Language model requires an API key")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Result type alias for Almanac operations.
pub type Result<T> = std::result::Result<T, AlmanacError>;
