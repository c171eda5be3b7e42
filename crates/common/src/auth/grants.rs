//! Token endpoint clients, one per OAuth grant type
//!
//! All grants POST a form-encoded body to `{accounts_base_url}/api/token`.
//! Confidential clients authenticate with HTTP Basic; the PKCE grant is a
//! public client and sends `client_id` in the body instead.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cadenza_domain::constants::TOKEN_ENDPOINT_PATH;
use cadenza_domain::{ApiError, AuthError, CredentialsConfig, DecodingError, GrantKind, Result, TokenSnapshot};
use tracing::{debug, instrument};
use url::form_urlencoded;

use super::traits::TokenGrant;
use super::types::{OAuthErrorResponse, TokenResponse};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// Form POSTs against the accounts service token endpoint
#[derive(Clone)]
pub struct TokenEndpoint {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
}

impl std::fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpoint").field("token_url", &self.token_url).finish_non_exhaustive()
    }
}

impl TokenEndpoint {
    pub fn new(transport: Arc<dyn HttpTransport>, accounts_base_url: &str) -> Self {
        let token_url = format!("{}{TOKEN_ENDPOINT_PATH}", accounts_base_url.trim_end_matches('/'));
        Self { transport, token_url }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// POST `params`, then decode the answer into a snapshot.
    ///
    /// `previous_refresh_token` survives when the response does not rotate it.
    #[instrument(skip(self, params, basic_auth, previous_refresh_token), fields(url = %self.token_url))]
    async fn request_token(
        &self,
        params: &[(&str, &str)],
        basic_auth: Option<(&str, &str)>,
        previous_refresh_token: Option<&str>,
    ) -> Result<TokenSnapshot> {
        let body = form_urlencoded::Serializer::new(String::new()).extend_pairs(params).finish();

        let mut request = HttpRequest::new(HttpMethod::Post, self.token_url.clone())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body);
        if let Some((client_id, client_secret)) = basic_auth {
            let credentials = STANDARD.encode(format!("{client_id}:{client_secret}"));
            request = request.header("Authorization", format!("Basic {credentials}"));
        }

        let response = self.transport.send(request).await?;
        debug!(status = response.status, "token endpoint responded");

        if !response.is_success() {
            let error = match serde_json::from_slice::<OAuthErrorResponse>(&response.body) {
                Ok(body) => body.into_auth_error(response.status),
                Err(_) => AuthError::UnexpectedResponse { status: response.status, message: response.text() },
            };
            return Err(error.into());
        }

        let token: TokenResponse = serde_json::from_slice(&response.body)
            .map_err(|err| DecodingError::new(self.token_url.as_str(), response.status, err.to_string()))?;
        Ok(token.into_snapshot(response.status, previous_refresh_token)?)
    }
}

/// Authorization-Code grant for confidential clients
#[derive(Debug, Clone)]
pub struct AuthorizationCodeGrant {
    endpoint: TokenEndpoint,
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
}

impl AuthorizationCodeGrant {
    pub fn new(
        endpoint: TokenEndpoint,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Option<String>,
    ) -> Self {
        Self { endpoint, client_id: client_id.into(), client_secret: client_secret.into(), redirect_uri }
    }
}

#[async_trait]
impl TokenGrant for AuthorizationCodeGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::AuthorizationCode
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSnapshot> {
        let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        self.endpoint
            .request_token(&params, Some((self.client_id.as_str(), self.client_secret.as_str())), Some(refresh_token))
            .await
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        let redirect_uri = required_redirect_uri(self.redirect_uri.as_deref())?;
        let params = [("grant_type", "authorization_code"), ("code", code), ("redirect_uri", redirect_uri)];
        self.endpoint.request_token(&params, Some((self.client_id.as_str(), self.client_secret.as_str())), None).await
    }
}

/// Authorization-Code grant with PKCE for public clients
#[derive(Debug, Clone)]
pub struct PkceGrant {
    endpoint: TokenEndpoint,
    client_id: String,
    redirect_uri: Option<String>,
}

impl PkceGrant {
    pub fn new(endpoint: TokenEndpoint, client_id: impl Into<String>, redirect_uri: Option<String>) -> Self {
        Self { endpoint, client_id: client_id.into(), redirect_uri }
    }
}

#[async_trait]
impl TokenGrant for PkceGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::Pkce
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSnapshot> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        self.endpoint.request_token(&params, None, Some(refresh_token)).await
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        let redirect_uri = required_redirect_uri(self.redirect_uri.as_deref())?;
        let code_verifier = code_verifier
            .ok_or_else(|| ApiError::validation("code_verifier", "the PKCE grant requires a code verifier"))?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        self.endpoint.request_token(&params, None, None).await
    }
}

/// Client-Credentials grant: app-only tokens, never a refresh token
#[derive(Debug, Clone)]
pub struct ClientCredentialsGrant {
    endpoint: TokenEndpoint,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
}

impl ClientCredentialsGrant {
    pub fn new(endpoint: TokenEndpoint, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { endpoint, client_id: client_id.into(), client_secret: client_secret.into(), scope: None }
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: &[String]) -> Self {
        self.scope = (!scopes.is_empty()).then(|| scopes.join(" "));
        self
    }
}

#[async_trait]
impl TokenGrant for ClientCredentialsGrant {
    fn kind(&self) -> GrantKind {
        GrantKind::ClientCredentials
    }

    /// There is nothing to refresh; a new token is requested instead.
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSnapshot> {
        self.acquire().await
    }

    async fn acquire(&self) -> Result<TokenSnapshot> {
        let mut params = vec![("grant_type", "client_credentials")];
        if let Some(scope) = self.scope.as_deref() {
            params.push(("scope", scope));
        }
        let mut snapshot =
            self.endpoint.request_token(&params, Some((self.client_id.as_str(), self.client_secret.as_str())), None).await?;
        snapshot.refresh_token = None;
        Ok(snapshot)
    }
}

fn required_redirect_uri(redirect_uri: Option<&str>) -> Result<&str> {
    redirect_uri.ok_or_else(|| ApiError::validation("redirect_uri", "code exchange requires a redirect_uri"))
}

/// Build the grant described by `credentials`.
///
/// # Errors
/// Returns `ApiError::Config` when a confidential grant has no secret.
pub fn grant_from_config(
    credentials: &CredentialsConfig,
    accounts_base_url: &str,
    transport: Arc<dyn HttpTransport>,
) -> Result<Arc<dyn TokenGrant>> {
    let endpoint = TokenEndpoint::new(transport, accounts_base_url);
    let secret = || {
        credentials
            .client_secret
            .clone()
            .ok_or_else(|| ApiError::Config(format!("{} grant requires client_secret", credentials.grant)))
    };

    let grant: Arc<dyn TokenGrant> = match credentials.grant {
        GrantKind::AuthorizationCode => Arc::new(AuthorizationCodeGrant::new(
            endpoint,
            credentials.client_id.clone(),
            secret()?,
            credentials.redirect_uri.clone(),
        )),
        GrantKind::Pkce => {
            Arc::new(PkceGrant::new(endpoint, credentials.client_id.clone(), credentials.redirect_uri.clone()))
        }
        GrantKind::ClientCredentials => Arc::new(
            ClientCredentialsGrant::new(endpoint, credentials.client_id.clone(), secret()?)
                .with_scopes(&credentials.scopes),
        ),
    };
    Ok(grant)
}
