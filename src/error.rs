//! Error types for the Pub/Sub adapter
//!
//! Every failure of the publish pipeline is one of these variants. The retry
//! policy decides what to retry by looking at [`PubSubError::kind`], never at
//! the message text.

use thiserror::Error;

/// Pub/Sub adapter error types
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Malformed envelope or payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid configuration (e.g. no project)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not reach the broker or the connection broke mid-request
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request did not complete within its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The broker answered with a retryable status (429 or 5xx)
    #[error("Broker unavailable (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    /// The broker refused the request with a non-retryable status
    #[error("Broker rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Could not obtain an access token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A 2xx answer whose body we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Object missing from a result store
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Local filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The client was used after `close`
    #[error("Client is closed")]
    Closed,

    /// The caller cancelled the operation
    ///
    /// The built-in client is cancelled by dropping its future and never
    /// returns this. It is for custom [`Transport`](crate::transport::Transport)
    /// implementations that observe cancellation themselves.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Discriminator of [`PubSubError`] variants
///
/// Retry policies hold an explicit list of these to decide which failures are
/// transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Config,
    Connection,
    Timeout,
    Unavailable,
    Rejected,
    Auth,
    Serialization,
    InvalidResponse,
    NotFound,
    Io,
    Closed,
    Cancelled,
}

impl ErrorKind {
    /// Kinds that are safe to retry without side effects from re-sending.
    pub const TRANSIENT: [ErrorKind; 3] = [
        ErrorKind::Connection,
        ErrorKind::Timeout,
        ErrorKind::Unavailable,
    ];
}

/// Result type alias for Pub/Sub operations
pub type Result<T> = std::result::Result<T, PubSubError>;

impl PubSubError {
    /// The variant of this error, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PubSubError::Validation(_) => ErrorKind::Validation,
            PubSubError::Config(_) => ErrorKind::Config,
            PubSubError::Connection(_) => ErrorKind::Connection,
            PubSubError::Timeout(_) => ErrorKind::Timeout,
            PubSubError::Unavailable { .. } => ErrorKind::Unavailable,
            PubSubError::Rejected { .. } => ErrorKind::Rejected,
            PubSubError::Auth(_) => ErrorKind::Auth,
            PubSubError::Serialization(_) => ErrorKind::Serialization,
            PubSubError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            PubSubError::NotFound(_) => ErrorKind::NotFound,
            PubSubError::Io(_) => ErrorKind::Io,
            PubSubError::Closed => ErrorKind::Closed,
            PubSubError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error belongs to the default transient set.
    pub fn is_transient(&self) -> bool {
        ErrorKind::TRANSIENT.contains(&self.kind())
    }

    /// Classify a non-success HTTP status returned by the broker.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            408 => PubSubError::Timeout(format!("HTTP 408: {body}")),
            429 | 500 | 502 | 503 | 504 => PubSubError::Unavailable { status, body },
            _ => PubSubError::Rejected { status, body },
        }
    }
}

impl From<reqwest::Error> for PubSubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PubSubError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            PubSubError::Connection(err.to_string())
        } else if err.is_decode() {
            PubSubError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            PubSubError::from_status(status.as_u16(), err.to_string())
        } else {
            PubSubError::Connection(err.to_string())
        }
    }
}
