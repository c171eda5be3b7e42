//! Conversions from external infrastructure errors into domain errors.

use std::io::Error as IoError;

use cadenza_domain::{ApiError, TransportError, TransportErrorKind};
use reqwest::Error as HttpError;
use serde_json::Error as JsonError;
use toml::de::Error as TomlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub ApiError);

impl From<InfraError> for ApiError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<ApiError> for InfraError {
    fn from(value: ApiError) -> Self {
        InfraError(value)
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TransportError */
/* -------------------------------------------------------------------------- */

/// Classify a reqwest failure; the transport port reports these verbatim.
pub fn transport_error(err: &HttpError) -> TransportError {
    if err.is_timeout() {
        return TransportError::timeout(format!("HTTP request timed out: {err}"));
    }

    #[cfg(not(target_arch = "wasm32"))]
    if err.is_connect() {
        return TransportError::connect(format!("HTTP connection failure: {err}"));
    }

    let kind = if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_request() || err.is_builder() || err.is_redirect() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, err.to_string())
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(ApiError::Transport(transport_error(&value)))
    }
}

/* -------------------------------------------------------------------------- */
/* std::io / serde_json / toml → ApiError */
/* -------------------------------------------------------------------------- */

impl From<IoError> for InfraError {
    fn from(value: IoError) -> Self {
        InfraError(ApiError::Storage(format!("I/O failure ({:?}): {value}", value.kind())))
    }
}

impl From<JsonError> for InfraError {
    fn from(value: JsonError) -> Self {
        InfraError(ApiError::Config(format!("Invalid JSON format: {value}")))
    }
}

impl From<TomlError> for InfraError {
    fn from(value: TomlError) -> Self {
        InfraError(ApiError::Config(format!("Invalid TOML format: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
