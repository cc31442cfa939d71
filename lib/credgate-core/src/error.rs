//! Error types for credgate.
//!
//! Every failure surfaced to a caller is one [`Error`] variant, and every
//! variant belongs to exactly one [`ErrorKind`]. Resilience policies decide
//! what to do from the kind alone.

use std::time::Duration;

use derive_more::{Display, Error, From};

// ============================================================================
// Error Kind
// ============================================================================

/// Closed classification of [`Error`] consumed by retry and breaker predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// Caller or configuration bug: missing target, missing credentials.
    /// Fatal, never retried.
    #[display("configuration")]
    Configuration,
    /// Low-level transport failure or timeout. Retried per policy.
    #[display("transient")]
    Transient,
    /// The circuit breaker rejected the call without reaching the transport.
    #[display("broken circuit")]
    BrokenCircuit,
    /// A response body could not be decoded. Fatal, never retried.
    #[display("deserialization")]
    Deserialization,
    /// A non-success HTTP status promoted to an error.
    #[display("http")]
    Http,
    /// The operation was cancelled by its caller.
    #[display("cancelled")]
    Cancelled,
    /// Anything else (request construction, serialization).
    #[display("other")]
    Other,
}

// ============================================================================
// Error Type
// ============================================================================

/// Main error type for credgate operations.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The request has no target URL.
    #[display("request has no target address")]
    #[from(skip)]
    MissingTarget,

    /// Client id or secret is missing for the resolved identity.
    #[display("missing {field} for identity '{identity}'")]
    #[from(skip)]
    MissingCredentials {
        /// Identity name, `default` for the default credentials.
        #[error(not(source))]
        identity: String,
        /// Which credential field is missing.
        #[error(not(source))]
        field: &'static str,
    },

    /// HTTP-level errors (non-2xx status codes).
    #[display("HTTP error {status}: {message}")]
    #[from(skip)]
    Http {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
        /// Response body, if available.
        #[error(not(source))]
        body: Option<bytes::Bytes>,
        /// Server-suggested delay, if the response carried `Retry-After`.
        #[error(not(source))]
        retry_after: Option<Duration>,
    },

    /// Network/connection errors.
    #[display("connection error: {_0}")]
    #[from(skip)]
    Connection(#[error(not(source))] String),

    /// TLS/SSL errors.
    #[display("TLS error: {_0}")]
    #[from(skip)]
    Tls(#[error(not(source))] String),

    /// An attempt exceeded its timeout and was abandoned.
    #[display("request timeout")]
    #[from(skip)]
    Timeout,

    /// The circuit is open; the transport was not invoked.
    #[display("circuit is open, call rejected")]
    #[from(skip)]
    BrokenCircuit,

    /// The caller cancelled the operation.
    #[display("operation cancelled")]
    #[from(skip)]
    Cancelled,

    /// Invalid request configuration.
    #[display("invalid request: {_0}")]
    #[from(skip)]
    InvalidRequest(#[error(not(source))] String),

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from]
    JsonSerialization(serde_json::Error),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "`expires_in`").
        path: String,
        /// Error message.
        message: String,
    },

    /// Form URL-encoded serialization error.
    #[display("form serialization error: {_0}")]
    #[from]
    FormSerialization(serde_urlencoded::ser::Error),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an HTTP error from status code and message.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
            body: None,
            retry_after: None,
        }
    }

    /// Create a missing-credentials error.
    #[must_use]
    pub fn missing_credentials(identity: Option<&str>, field: &'static str) -> Self {
        Self::MissingCredentials {
            identity: identity.unwrap_or("default").to_string(),
            field,
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTarget | Self::MissingCredentials { .. } => ErrorKind::Configuration,
            Self::Connection(_) | Self::Tls(_) | Self::Timeout => ErrorKind::Transient,
            Self::BrokenCircuit => ErrorKind::BrokenCircuit,
            Self::JsonDeserialization { .. } => ErrorKind::Deserialization,
            Self::Http { .. } => ErrorKind::Http,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRequest(_)
            | Self::JsonSerialization(_)
            | Self::FormSerialization(_)
            | Self::InvalidUrl(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Returns `true` if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Returns `true` if the circuit breaker rejected the call.
    #[must_use]
    pub const fn is_broken_circuit(&self) -> bool {
        matches!(self, Self::BrokenCircuit)
    }

    /// Returns `true` for fatal configuration errors.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration)
    }

    /// Returns `true` for transient transport failures.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Returns the HTTP status code if this is an HTTP error.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the response body if this is an HTTP error with a body.
    #[must_use]
    pub fn body(&self) -> Option<&bytes::Bytes> {
        match self {
            Self::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Returns the server-suggested delay carried by an HTTP error.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
