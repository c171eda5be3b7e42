//! Mock implementations of the client ports
//!
//! Provides scripted transports, counting grants and failing stores for
//! tests.

// Allow missing error/panic docs for test mocks - they are designed to be simple
// and errors are clearly indicated by their return types
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cadenza_domain::{ApiError, GrantKind, Result, TokenSnapshot, TransportError, TransportErrorKind};
use parking_lot::Mutex;
use serde::Serialize;

use crate::auth::{TokenGrant, TokenStore};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Scripted answer of a [`MockTransport`] route
#[derive(Debug, Clone)]
pub struct MockResponse {
    outcome: std::result::Result<HttpResponse, TransportError>,
    delay: Option<Duration>,
}

impl MockResponse {
    pub fn status(status: u16) -> Self {
        Self::from_response(HttpResponse::new(status, ""))
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self::from_response(HttpResponse::new(status, body.to_owned()))
    }

    pub fn json<T: Serialize>(status: u16, body: T) -> Self {
        let body = serde_json::to_vec(&body).unwrap_or_default();
        Self::from_response(HttpResponse::new(status, body).with_header("Content-Type", "application/json"))
    }

    pub fn transport_error(kind: TransportErrorKind, message: &str) -> Self {
        Self { outcome: Err(TransportError::new(kind, message)), delay: None }
    }

    pub fn from_response(response: HttpResponse) -> Self {
        Self { outcome: Ok(response), delay: None }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Ok(response) = self.outcome.as_mut() {
            response.headers.insert(name, value);
        }
        self
    }

    /// Delay only this answer, on top of the transport latency.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Route {
    method: HttpMethod,
    fragment: String,
    responses: VecDeque<MockResponse>,
}

/// Mock HTTP transport for testing
///
/// Routes match on method and a URL substring; the first matching route
/// answers. Each route replays its responses in order and keeps repeating
/// the last one. Every request is recorded.
///
/// # Examples
///
/// ```ignore
/// use cadenza_common::testing::{MockResponse, MockTransport};
/// use cadenza_common::transport::HttpMethod;
///
/// let transport = MockTransport::new();
/// transport.on_sequence(
///     HttpMethod::Get,
///     "/v1/me",
///     vec![MockResponse::status(429).with_header("Retry-After", "1"), MockResponse::text(200, "{}")],
/// );
/// assert_eq!(transport.request_count(), 0);
/// ```
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    latency: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, so concurrent callers overlap.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn on(&self, method: HttpMethod, url_fragment: &str, response: MockResponse) {
        self.on_sequence(method, url_fragment, vec![response]);
    }

    pub fn on_sequence(&self, method: HttpMethod, url_fragment: &str, responses: Vec<MockResponse>) {
        self.routes.lock().push(Route {
            method,
            fragment: url_fragment.to_owned(),
            responses: responses.into(),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of requests whose URL contains `url_fragment`.
    pub fn calls_to(&self, url_fragment: &str) -> usize {
        self.requests.lock().iter().filter(|request| request.url.contains(url_fragment)).count()
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn next_response(&self, request: &HttpRequest) -> Option<MockResponse> {
        let mut routes = self.routes.lock();
        let route = routes
            .iter_mut()
            .find(|route| route.method == request.method && request.url.contains(&route.fragment))?;
        if route.responses.len() > 1 {
            route.responses.pop_front()
        } else {
            route.responses.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let scripted = self.next_response(&request);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let Some(scripted) = scripted else {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("no mock route for {} {}", request.method, request.url),
            ));
        };
        if let Some(delay) = scripted.delay {
            tokio::time::sleep(delay).await;
        }
        scripted.outcome
    }
}

/// Counting grant that mints sequential tokens
///
/// Refreshes return `access-N` and keep the presented refresh token;
/// client-credential acquisitions return `app-N`.
pub struct MockTokenGrant {
    kind: GrantKind,
    latency: Option<Duration>,
    lifetime: Duration,
    issued: AtomicUsize,
    refreshes: AtomicUsize,
    acquisitions: AtomicUsize,
    exchanges: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<ApiError>>,
}

impl MockTokenGrant {
    pub fn new(kind: GrantKind) -> Self {
        Self {
            kind,
            latency: None,
            lifetime: Duration::from_secs(3600),
            issued: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            acquisitions: AtomicUsize::new(0),
            exchanges: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Make the next grant call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: ApiError) {
        self.failures.lock().push_back(error);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn acquire_count(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().clone()
    }

    async fn mint(&self, prefix: &str, refresh_token: Option<String>) -> Result<TokenSnapshot> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let serial = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenSnapshot::issued_now(format!("{prefix}-{serial}"), refresh_token, self.lifetime, None))
    }
}

#[async_trait]
impl TokenGrant for MockTokenGrant {
    fn kind(&self) -> GrantKind {
        self.kind
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSnapshot> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_owned());
        if self.kind == GrantKind::ClientCredentials {
            return self.mint("app", None).await;
        }
        self.mint("access", Some(refresh_token.to_owned())).await
    }

    async fn acquire(&self) -> Result<TokenSnapshot> {
        if self.kind != GrantKind::ClientCredentials {
            return Err(cadenza_domain::AuthError::MissingRefreshToken.into());
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.mint("app", None).await
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<TokenSnapshot> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.mint("access", Some(format!("refresh-for-{code}"))).await
    }
}

/// Token store whose every operation fails
#[derive(Debug, Default)]
pub struct FailingTokenStore;

impl FailingTokenStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenStore for FailingTokenStore {
    async fn load(&self) -> Result<Option<TokenSnapshot>> {
        Err(ApiError::Storage("store unavailable".into()))
    }

    async fn save(&self, _snapshot: &TokenSnapshot) -> Result<()> {
        Err(ApiError::Storage("store is read-only".into()))
    }

    async fn clear(&self) -> Result<()> {
        Err(ApiError::Storage("store is read-only".into()))
    }
}
