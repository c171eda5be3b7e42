//! Traits for token endpoint and token persistence operations
//!
//! These traits enable dependency injection and testing by abstracting
//! external dependencies (the accounts service, durable storage).

use async_trait::async_trait;
use cadenza_domain::{ApiError, AuthError, GrantKind, Result, TokenSnapshot};

/// Client for one OAuth grant type
#[async_trait]
pub trait TokenGrant: Send + Sync {
    fn kind(&self) -> GrantKind;

    /// Exchange a refresh token for a new snapshot
    ///
    /// # Errors
    /// `AuthError::InvalidGrant` when the refresh token was revoked, other
    /// auth or transport errors otherwise.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSnapshot>;

    /// Obtain a token without any prior credential
    ///
    /// Only grants that need no user interaction support this.
    ///
    /// # Errors
    /// `AuthError::MissingRefreshToken` for user grants.
    async fn acquire(&self) -> Result<TokenSnapshot> {
        Err(AuthError::MissingRefreshToken.into())
    }

    /// Exchange an authorization code for a first snapshot
    ///
    /// # Errors
    /// `ValidationError` for grants without a code flow.
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        let _ = (code, code_verifier);
        Err(ApiError::validation("grant", format!("{} grant has no authorization code flow", self.kind())))
    }
}

/// Durable home of the current token snapshot
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the stored snapshot, `None` when nothing is stored
    ///
    /// # Errors
    /// `ApiError::Storage` if the backend cannot be read or holds garbage.
    async fn load(&self) -> Result<Option<TokenSnapshot>>;

    /// Replace the stored snapshot
    ///
    /// # Errors
    /// `ApiError::Storage` if the write fails.
    async fn save(&self, snapshot: &TokenSnapshot) -> Result<()>;

    /// Forget the stored snapshot; clearing an empty store succeeds
    ///
    /// # Errors
    /// `ApiError::Storage` if the backend refuses the deletion.
    async fn clear(&self) -> Result<()>;
}
