//! Error types used throughout the client
//!
//! Every failure a caller can observe is an [`ApiError`]. The type is `Clone`
//! because a single outcome may be broadcast to several waiters that share one
//! in-flight operation.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Main error type for Cadenza
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimitExceeded { retry_after: Duration },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Decoding error: {0}")]
    Decoding(#[from] DecodingError),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Shorthand for a [`ValidationError`] wrapped in `ApiError`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, message))
    }

    /// HTTP status attached to the failure, if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::Decoding(err) => Some(err.status),
            Self::Auth(AuthError::UnexpectedResponse { status, .. }) => Some(*status),
            Self::Auth(AuthError::Rejected { .. }) => Some(401),
            Self::RateLimitExceeded { .. } => Some(429),
            _ => None,
        }
    }

    /// True when the user has to go through authorization again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::Auth(AuthError::MissingRefreshToken | AuthError::InvalidGrant { .. }))
    }
}

/// Failures of the token lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no refresh token available, re-authorization required")]
    MissingRefreshToken,

    #[error("refresh token revoked or invalid: {description}")]
    InvalidGrant { description: String },

    #[error("unexpected token endpoint response ({status}): {message}")]
    UnexpectedResponse { status: u16, message: String },

    #[error("request rejected after token refresh: {message}")]
    Rejected { message: String, www_authenticate: Option<String> },
}

/// A request or configuration value failed local validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Coarse category of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connection failed",
            Self::Request => "request failed",
            Self::Body => "body transfer failed",
            Self::Other => "transport failure",
        };
        f.write_str(label)
    }
}

/// The request never produced an HTTP response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }
}

/// A success response whose body did not match the expected shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to decode response from {path} (status {status}): {message}")]
pub struct DecodingError {
    pub path: String,
    pub status: u16,
    pub message: String,
}

impl DecodingError {
    pub fn new(path: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self { path: path.into(), status, message: message.into() }
    }
}

/// Result type alias for Cadenza operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_reported_for_http_failures() {
        assert_eq!(ApiError::Server { status: 503, message: "down".into() }.status(), Some(503));
        assert_eq!(ApiError::RateLimitExceeded { retry_after: Duration::from_secs(2) }.status(), Some(429));
        assert_eq!(ApiError::Storage("disk".into()).status(), None);
        assert_eq!(ApiError::from(DecodingError::new("/v1/albums", 200, "eof")).status(), Some(200));
    }

    #[test]
    fn reauthorization_is_required_only_for_lost_grants() {
        assert!(ApiError::from(AuthError::MissingRefreshToken).requires_reauthorization());
        assert!(ApiError::from(AuthError::InvalidGrant { description: "revoked".into() })
            .requires_reauthorization());
        assert!(!ApiError::from(AuthError::Rejected { message: "no".into(), www_authenticate: None })
            .requires_reauthorization());
    }

    #[test]
    fn display_messages_carry_context() {
        let err = ApiError::validation("limit", "must be between 1 and 50");
        assert_eq!(err.to_string(), "Validation error: invalid limit: must be between 1 and 50");

        let err = ApiError::from(TransportError::timeout("no response after 30s"));
        assert_eq!(err.to_string(), "Transport error: timeout: no response after 30s");

        let err = ApiError::RateLimitExceeded { retry_after: Duration::from_secs(7) };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 7s");
    }
}
