//! Integration tests for the auth module
//!
//! Drives the real grants, file store and token authority against a scripted
//! token endpoint, so every POST to `/api/token` is observable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadenza_common::auth::{
    grant_from_config, FileTokenStore, PkceGrant, PkcePair, TokenAuthority, TokenEndpoint, TokenStore,
};
use cadenza_common::transport::{HttpRequest, HttpResponse, HttpTransport};
use cadenza_domain::{AuthError, CredentialsConfig, GrantKind, TokenSnapshot, TransportError};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

const ACCOUNTS: &str = "https://accounts.example.com";

/// Token endpoint that replays queued responses after a short delay.
#[derive(Default)]
struct ScriptedEndpoint {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedEndpoint {
    fn replying(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self { responses: Mutex::new(responses.into()), requests: Mutex::default() })
    }

    fn bodies(&self) -> Vec<String> {
        self.requests.lock().iter().filter_map(|r| r.body_text().map(str::to_owned)).collect()
    }

    fn count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedEndpoint {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.responses.lock().pop_front().ok_or_else(|| TransportError::connect("no scripted response left"))
    }
}

fn token(access: &str, refresh: Option<&str>) -> HttpResponse {
    let mut body = json!({ "access_token": access, "token_type": "Bearer", "expires_in": 3600 });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    HttpResponse::new(200, body.to_string())
}

fn pkce_authority(endpoint: &Arc<ScriptedEndpoint>, store: FileTokenStore) -> TokenAuthority {
    let grant = PkceGrant::new(
        TokenEndpoint::new(Arc::clone(endpoint) as _, ACCOUNTS),
        "public-client",
        Some("http://127.0.0.1:8888/callback".into()),
    );
    TokenAuthority::new(Arc::new(grant), Arc::new(store))
}

/// A PKCE login persists its snapshot, and a later process restores it
/// without touching the network.
#[tokio::test]
async fn test_pkce_login_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let endpoint = ScriptedEndpoint::replying(vec![token("first", Some("refresh-1"))]);

    let pkce = PkcePair::generate();
    let authority = pkce_authority(&endpoint, FileTokenStore::new(&path));
    let snapshot = authority.authorize_with_code("auth-code", Some(&pkce.verifier)).await.unwrap();
    assert_eq!(snapshot.access_token, "first");

    let body = &endpoint.bodies()[0];
    assert!(body.contains("grant_type=authorization_code"));
    assert!(body.contains(&format!("code_verifier={}", pkce.verifier)));

    let restarted = pkce_authority(&endpoint, FileTokenStore::new(&path));
    let restored = restarted.load_persisted().await.unwrap().expect("persisted snapshot");
    assert_eq!(restored, snapshot);

    let served = restarted.access_token(false).await.unwrap();
    assert_eq!(served.access_token, "first");
    assert_eq!(endpoint.count(), 1);
}

/// Concurrent callers over an expired persisted token trigger exactly one
/// refresh, and the rotated snapshot keeps the old refresh token.
#[tokio::test]
async fn test_expired_file_token_is_refreshed_once_for_all_callers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let expired = TokenSnapshot::with_expiry(
        "stale",
        Some("keep-me".into()),
        Utc::now() - chrono::Duration::minutes(5),
        None,
    );
    FileTokenStore::new(&path).save(&expired).await.unwrap();

    let endpoint = ScriptedEndpoint::replying(vec![token("renewed", None)]);
    let authority = pkce_authority(&endpoint, FileTokenStore::new(&path));

    let results = futures::future::join_all((0..8).map(|_| authority.access_token(false))).await;

    for result in results {
        assert_eq!(result.unwrap().access_token, "renewed");
    }
    assert_eq!(endpoint.count(), 1);
    assert!(endpoint.bodies()[0].contains("refresh_token=keep-me"));

    let persisted = FileTokenStore::new(&path).load().await.unwrap().unwrap();
    assert_eq!(persisted.access_token, "renewed");
    assert_eq!(persisted.refresh_token.as_deref(), Some("keep-me"));
}

/// Logout empties the file store and tells subscribers.
#[tokio::test]
async fn test_logout_clears_file_and_notifies() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let endpoint = ScriptedEndpoint::replying(vec![token("first", Some("refresh-1"))]);
    let authority = pkce_authority(&endpoint, FileTokenStore::new(&path));
    authority.authorize_with_code("auth-code", Some("verifier")).await.unwrap();

    let mut changes = authority.subscribe();
    authority.logout().await.unwrap();

    changes.changed().await.unwrap();
    assert!(changes.borrow().is_none());
    assert!(!path.exists());
    assert!(authority.cached().is_none());
}

/// A revoked refresh token is terminal until the user signs in again.
#[tokio::test]
async fn test_revoked_refresh_token_requires_reauthorization() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("token.json");
    let expired =
        TokenSnapshot::with_expiry("stale", Some("revoked".into()), Utc::now() - chrono::Duration::seconds(1), None);
    FileTokenStore::new(&path).save(&expired).await.unwrap();

    let endpoint = ScriptedEndpoint::replying(vec![HttpResponse::new(
        400,
        json!({ "error": "invalid_grant", "error_description": "Refresh token revoked" }).to_string(),
    )]);
    let authority = pkce_authority(&endpoint, FileTokenStore::new(&path));

    let err = authority.access_token(false).await.unwrap_err();

    assert!(err.requires_reauthorization(), "unexpected error: {err:?}");
    assert!(matches!(err, cadenza_domain::ApiError::Auth(AuthError::InvalidGrant { .. })));
}

/// Client-credential tokens come from the configured grant with HTTP Basic.
#[tokio::test]
async fn test_client_credentials_from_config() {
    let endpoint = ScriptedEndpoint::replying(vec![token("app", None)]);
    let mut credentials = CredentialsConfig::new(GrantKind::ClientCredentials, "id").with_secret("secret");
    credentials.scopes = vec!["catalog-read".into()];

    let grant = grant_from_config(&credentials, ACCOUNTS, Arc::clone(&endpoint) as _).unwrap();
    let authority = TokenAuthority::new(grant, Arc::new(cadenza_common::auth::MemoryTokenStore::new()));

    let snapshot = authority.access_token(false).await.unwrap();

    assert_eq!(snapshot.access_token, "app");
    assert!(snapshot.refresh_token.is_none());
    let request = endpoint.requests.lock()[0].clone();
    assert_eq!(request.url, format!("{ACCOUNTS}/api/token"));
    assert_eq!(request.headers.get("Authorization"), Some("Basic aWQ6c2VjcmV0"));
    assert!(request.body_text().unwrap().contains("grant_type=client_credentials"));
}
