//! Error types for the Backpack client
//!
//! Errors fall into four groups: configuration problems that are raised before
//! any I/O and never retried, transport failures the caller may retry,
//! protocol noise that is logged and dropped inside the receive loop, and
//! session-level refusals (not connected, queue full, authentication rejected).

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Client operation errors
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),

    #[error("API error {code}: {message}")]
    ApiError { code: String, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Private key must decode to 32 or 64 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Private key is not valid Base64: {0}")]
    InvalidKeyEncoding(String),

    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(String),

    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Outbound queue full ({0} frames pending)")]
    QueueFull(usize),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl ExchangeError {
    /// Raised before any network I/O; retrying cannot help
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials(_)
                | Self::InvalidCredentials(_)
                | Self::InvalidKeyLength(_)
                | Self::InvalidKeyEncoding(_)
                | Self::InvalidUrl(_)
                | Self::ConfigurationError(_)
                | Self::UnsupportedChannel(_)
        )
    }

    /// Transient failures the caller may retry, with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_)
            | Self::ConnectionFailed(_)
            | Self::Timeout(_)
            | Self::QueueFull(_)
            | Self::NotConnected(_)
            | Self::AuthenticationFailed(_) => true,
            Self::HttpError(status, _) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<url::ParseError> for ExchangeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}
