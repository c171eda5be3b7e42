//! Access token snapshots
//!
//! A [`TokenSnapshot`] is the unit the token authority caches, persists and
//! hands out. Snapshots are immutable values: a refresh produces a new one.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bearer token together with the metadata needed to renew it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry instant, computed from `expires_in` when issued
    pub expires_at: DateTime<Utc>,
    /// Space-separated granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSnapshot {
    /// Build a snapshot that expires `expires_in` from now.
    pub fn issued_now(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in: Duration,
        scope: Option<String>,
    ) -> Self {
        let lifetime = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now().checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::with_expiry(access_token, refresh_token, expires_at, scope)
    }

    pub fn with_expiry(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at,
            scope,
            token_type: default_token_type(),
        }
    }

    /// Expired means `now >= expires_at`.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// True if the token expires within `margin` (or already has).
    pub fn is_expiring_within(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match self.expires_at.checked_sub_signed(margin) {
            Some(deadline) => Utc::now() >= deadline,
            None => true,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|token| !token.is_empty())
    }

    /// Seconds until expiry; negative once expired.
    pub fn seconds_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds()
    }

    pub fn scopes(&self) -> Vec<&str> {
        self.scope.as_deref().map(|scope| scope.split_whitespace().collect()).unwrap_or_default()
    }

    pub fn has_scopes(&self, required: &[&str]) -> bool {
        let granted = self.scopes();
        required.iter().all(|scope| granted.contains(scope))
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}
