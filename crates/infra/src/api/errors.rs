//! Error envelopes returned by the catalog API

use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;

/// `{"error": {"status": 404, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Regular {
        #[serde(default)]
        message: Option<String>,
    },
    /// Authentication-style `{"error": "...", "error_description": "..."}`
    Code(String),
}

#[derive(Debug, Deserialize)]
struct AuthenticationEnvelope {
    #[serde(default)]
    error_description: Option<String>,
}

/// Human-readable message for a failed response.
///
/// Prefers the service's error envelope, then the raw body, then the
/// canonical reason phrase of `status`.
pub fn error_message(status: u16, body: &Bytes) -> String {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) {
        match envelope.error {
            ErrorBody::Regular { message: Some(message) } if !message.is_empty() => return message,
            ErrorBody::Code(code) => {
                let description = serde_json::from_slice::<AuthenticationEnvelope>(body)
                    .ok()
                    .and_then(|envelope| envelope.error_description);
                return match description {
                    Some(description) => format!("{code}: {description}"),
                    None => code,
                };
            }
            ErrorBody::Regular { .. } => {}
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    StatusCode::from_u16(status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("unknown status")
        .to_string()
}
