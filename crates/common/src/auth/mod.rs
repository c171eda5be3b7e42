//! OAuth 2.0 token lifecycle
//!
//! Obtains, caches, persists and refreshes access tokens for the three
//! supported grant types.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ TokenAuthority  │  single-flight refresh, cache, auto-refresh
//! └────────┬────────┘
//!          │
//!          ├──► TokenGrant   (AuthorizationCodeGrant, PkceGrant, ClientCredentialsGrant)
//!          │         │
//!          │         └──► HttpTransport  (token endpoint POST)
//!          │
//!          └──► TokenStore   (MemoryTokenStore, FileTokenStore)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cadenza_common::auth::{grant_from_config, FileTokenStore, TokenAuthority};
//! use cadenza_common::transport::HttpTransport;
//! use cadenza_domain::{CredentialsConfig, GrantKind};
//!
//! async fn example(transport: Arc<dyn HttpTransport>) -> cadenza_domain::Result<()> {
//!     let credentials = CredentialsConfig::new(GrantKind::ClientCredentials, "client-id")
//!         .with_secret("client-secret");
//!     let grant = grant_from_config(&credentials, "https://accounts.spotify.com", transport)?;
//!     let authority = TokenAuthority::new(grant, Arc::new(FileTokenStore::new("token.json")));
//!
//!     let snapshot = authority.access_token(false).await?;
//!     println!("{}", snapshot.authorization_header());
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - **[`types`]**: token endpoint wire types and [`AuthorityStatus`]
//! - **[`traits`]**: [`TokenGrant`] and [`TokenStore`] ports
//! - **[`grants`]**: token endpoint clients per grant type
//! - **[`store`]**: memory and JSON file stores
//! - **[`pkce`]**: verifier and challenge generation
//! - **[`authority`]**: [`TokenAuthority`]

pub mod authority;
pub mod grants;
pub mod pkce;
pub mod store;
pub mod traits;
pub mod types;

// Re-export commonly used types and functions
pub use authority::{AutoRefreshHandle, TokenAuthority};
pub use grants::{grant_from_config, AuthorizationCodeGrant, ClientCredentialsGrant, PkceGrant, TokenEndpoint};
pub use pkce::{code_challenge, generate_code_verifier, PkcePair};
pub use store::{FileTokenStore, MemoryTokenStore};
pub use traits::{TokenGrant, TokenStore};
pub use types::{AuthorityStatus, OAuthErrorResponse, TokenResponse};
