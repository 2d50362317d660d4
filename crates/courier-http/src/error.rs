//! Error types for the request engine.
//!
//! User cancellation is deliberately absent: a cancelled launch yields no
//! response and no error, only a cancel notification.

use thiserror::Error;

/// Errors produced while launching or executing a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    /// The server could not be reached within the connect timeout.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The server did not answer (headers or next body chunk) within the
    /// read timeout.
    #[error("read timed out")]
    ReadTimeout,

    /// Any other I/O failure: DNS, connection reset, malformed response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request URL is empty or cannot be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The request method is not a valid HTTP token.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// A header name or value is not valid on the wire.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The response body could not be decoded as requested.
    #[error("invalid response body: {0}")]
    InvalidBody(String),

    /// A launch of the same request is already in flight.
    #[error("request is already in flight and cannot be launched")]
    NotLaunchable,

    /// The background runtime could not be created or has shut down.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl HttpError {
    /// Check whether this is a connect or read timeout.
    ///
    /// Timeouts are the "request took too long to answer" case that callers
    /// typically offer to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout | Self::ReadTimeout)
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            if err.is_connect() {
                Self::ConnectTimeout
            } else {
                Self::ReadTimeout
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for HttpError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            Self::ReadTimeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<http::method::InvalidMethod> for HttpError {
    fn from(err: http::method::InvalidMethod) -> Self {
        Self::InvalidMethod(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for HttpError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for HttpError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidBody(err.to_string())
    }
}

/// A specialized Result type for request engine operations.
pub type Result<T> = std::result::Result<T, HttpError>;
