//! Client configuration structures
//!
//! Loaded by `cadenza_infra::config::loader` from the environment or a
//! JSON/TOML file. Every field except the credentials has a default.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_ACCOUNTS_BASE_URL, DEFAULT_API_BASE_URL, DEFAULT_MAX_RATE_LIMIT_RETRIES,
    DEFAULT_REFRESH_MARGIN_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, MAX_PAGE_LIMIT, MIN_PAGE_LIMIT,
};
use crate::errors::{ApiError, ValidationError};

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    pub credentials: CredentialsConfig,
}

impl Config {
    pub fn new(credentials: CredentialsConfig) -> Self {
        Self { client: ClientConfig::default(), credentials }
    }

    /// Reject settings that cannot produce a working client.
    ///
    /// # Errors
    /// Returns `ApiError::Config` describing the first inconsistency found.
    pub fn validate(&self) -> Result<(), ApiError> {
        self.client.validate()?;
        self.credentials.validate()
    }
}

/// Transport and engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub accounts_base_url: String,
    pub request_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    /// Snapshots expiring within this many seconds count as stale
    pub refresh_margin_secs: u64,
    pub user_agent: Option<String>,
    pub page_limits: PageLimits,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            accounts_base_url: DEFAULT_ACCOUNTS_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            user_agent: None,
            page_limits: PageLimits::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in
            [("api_base_url", &self.api_base_url), ("accounts_base_url", &self.accounts_base_url)]
        {
            if !(value.starts_with("https://") || value.starts_with("http://")) {
                return Err(ApiError::Config(format!("{field} must be an http(s) URL, got '{value}'")));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ApiError::Config("request_timeout_secs must be greater than zero".into()));
        }
        if self.page_limits.min == 0 || self.page_limits.min > self.page_limits.max {
            return Err(ApiError::Config(format!(
                "page_limits must satisfy 1 <= min <= max, got {}..={}",
                self.page_limits.min, self.page_limits.max
            )));
        }
        Ok(())
    }
}

/// OAuth grant used to obtain tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    AuthorizationCode,
    Pkce,
    ClientCredentials,
}

impl GrantKind {
    pub fn capability(self) -> Capability {
        match self {
            Self::AuthorizationCode | Self::Pkce => Capability::User,
            Self::ClientCredentials => Capability::AppOnly,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Pkce => "pkce",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantKind {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "authorization_code" | "code" => Ok(Self::AuthorizationCode),
            "pkce" | "authorization_code_pkce" => Ok(Self::Pkce),
            "client_credentials" => Ok(Self::ClientCredentials),
            other => Err(ApiError::Config(format!("unknown grant type '{other}'"))),
        }
    }
}

/// What a token issued under a grant is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Acts on behalf of a user (Authorization-Code, PKCE)
    User,
    /// App-level access only, no user context (Client-Credentials)
    AppOnly,
}

/// Application credentials and token persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub grant: GrantKind,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// JSON file that persists the token snapshot; in-memory when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cache_path: Option<PathBuf>,
}

impl CredentialsConfig {
    pub fn new(grant: GrantKind, client_id: impl Into<String>) -> Self {
        Self {
            grant,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: None,
            scopes: Vec::new(),
            token_cache_path: None,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.client_id.trim().is_empty() {
            return Err(ApiError::Config("client_id must not be empty".into()));
        }
        let has_secret = self.client_secret.as_deref().is_some_and(|s| !s.is_empty());
        match self.grant {
            GrantKind::AuthorizationCode | GrantKind::ClientCredentials if !has_secret => {
                Err(ApiError::Config(format!("{} grant requires client_secret", self.grant)))
            }
            GrantKind::Pkce if has_secret => {
                Err(ApiError::Config("pkce grant is for public clients; drop client_secret".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Allowed range for the `limit` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLimits {
    pub min: u32,
    pub max: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self { min: MIN_PAGE_LIMIT, max: MAX_PAGE_LIMIT }
    }
}

impl PageLimits {
    pub fn clamp(self, limit: u32) -> u32 {
        limit.clamp(self.min, self.max.max(self.min))
    }

    /// Accept `limit` unchanged or fail without touching the network.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] when `limit` is outside `min..=max`.
    pub fn validate(self, limit: u32) -> Result<u32, ValidationError> {
        if (self.min..=self.max).contains(&limit) {
            Ok(limit)
        } else {
            Err(ValidationError::new(
                "limit",
                format!("must be between {} and {}, got {limit}", self.min, self.max),
            ))
        }
    }
}
