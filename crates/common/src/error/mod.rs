//! Error classification shared across the client crates
//!
//! [`ApiError`] lives in `cadenza-domain`; this module adds the
//! [`ErrorClassification`] view used to pick log levels and to tell callers
//! whether trying again later is worthwhile.
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Client errors such as 404 |
//! | **Warning** | Degraded but operational | Rate limiting, transport timeouts |
//! | **Error** | Failure requiring attention | Server errors, decoding failures, config errors |
//! | **Critical** | Integrity at risk | Token persistence failures, revoked grants |
//!
//! Note that the executor never retries on its own beyond the 401 and 429
//! policies; `is_retryable` is advice for the caller.

use std::fmt;
use std::time::Duration;

use cadenza_domain::{ApiError, AuthError, TransportErrorKind};

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Transient failure that may succeed if attempted again later
    fn is_retryable(&self) -> bool;

    /// Used for logging and alerting decisions
    fn severity(&self) -> ErrorSeverity;

    /// Requires operator or user action before anything can succeed
    fn is_critical(&self) -> bool;

    /// Suggested delay before trying again, if the server gave one
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimitExceeded { .. } | Self::Server { .. } => true,
            Self::Transport(err) => {
                matches!(err.kind, TransportErrorKind::Timeout | TransportErrorKind::Connect)
            }
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Auth(AuthError::MissingRefreshToken | AuthError::InvalidGrant { .. }) => {
                ErrorSeverity::Critical
            }
            Self::Auth(_) => ErrorSeverity::Error,
            Self::RateLimitExceeded { .. } | Self::Transport(_) => ErrorSeverity::Warning,
            Self::Validation(_) | Self::Client { .. } => ErrorSeverity::Info,
            Self::Decoding(_) | Self::Server { .. } | Self::Config(_) => ErrorSeverity::Error,
            Self::Storage(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}
