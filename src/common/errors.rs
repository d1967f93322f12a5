//! Error types for the client

use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure after the retry budget is exhausted.
    /// Carries the last underlying cause.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// Charset or JSON decode failure. Never retried: a malformed payload
    /// indicates a protocol mismatch, not transience.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Login rejected by the provider, with the provider's own code/text
    #[error("authentication rejected: code={code}, text={text}")]
    Authentication { code: String, text: String },

    /// Master data stream ended without the completion sentinel
    #[error("master data stream truncated: {0}")]
    StreamTruncated(String),

    /// Flatten/restore marshaling errors (bad shapes, field coercion)
    #[error("marshal error: {0}")]
    Marshal(String),

    /// WebSocket connection/communication errors
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Session state errors (no session held, double connect, ...)
    #[error("session error: {0}")]
    Session(String),

    /// Invalid API response
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport {
            attempts: 1,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}
