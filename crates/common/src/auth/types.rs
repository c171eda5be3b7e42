//! Token endpoint wire types and authority status

use std::time::Duration;

use cadenza_domain::constants::DEFAULT_TOKEN_LIFETIME_SECS;
use cadenza_domain::{AuthError, TokenSnapshot};
use serde::Deserialize;

/// OAuth token response from the accounts service
///
/// Standard OAuth 2.0 token response format (RFC 6749).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into a snapshot, keeping `previous_refresh_token` when the
    /// response does not rotate it.
    ///
    /// # Errors
    /// Returns `AuthError::UnexpectedResponse` when the response would yield
    /// an already-expired token.
    pub fn into_snapshot(
        self,
        status: u16,
        previous_refresh_token: Option<&str>,
    ) -> Result<TokenSnapshot, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::UnexpectedResponse {
                status,
                message: "token response carried an empty access_token".to_string(),
            });
        }

        let expires_in = self.expires_in.unwrap_or_else(|| {
            i64::try_from(DEFAULT_TOKEN_LIFETIME_SECS).unwrap_or(i64::MAX)
        });
        let lifetime = u64::try_from(expires_in).ok().filter(|secs| *secs > 0).ok_or_else(|| {
            AuthError::UnexpectedResponse {
                status,
                message: format!("token response has non-positive expires_in ({expires_in})"),
            }
        })?;

        let refresh_token = self
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_owned));

        let mut snapshot = TokenSnapshot::issued_now(
            self.access_token,
            refresh_token,
            Duration::from_secs(lifetime),
            self.scope,
        );
        if let Some(token_type) = self.token_type {
            snapshot.token_type = token_type;
        }
        Ok(snapshot)
    }
}

/// OAuth error body (`{"error", "error_description"}`)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    /// Map the error body onto the auth taxonomy.
    pub fn into_auth_error(self, status: u16) -> AuthError {
        let description = self.error_description.unwrap_or_else(|| self.error.clone());
        if self.error == "invalid_grant" {
            AuthError::InvalidGrant { description }
        } else {
            AuthError::UnexpectedResponse { status, message: format!("{}: {description}", self.error) }
        }
    }
}

/// Observable state of a token authority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityStatus {
    NoToken,
    CachedValid,
    CachedExpired,
    Refreshing,
}
