//! Authenticated request execution
//!
//! [`RequestExecutor`] attaches the authority's bearer token, sends the call
//! through the [`HttpTransport`] port and applies the two recoveries the
//! client performs on its own:
//!
//! - **401**: one refresh through
//!   [`TokenAuthority::refresh_after_rejection`], then exactly one retry.
//! - **429**: sleep for `Retry-After` and retry, at most
//!   `max_rate_limit_retries` times.
//!
//! Concurrent identical GET/HEAD calls share one transport call. The in-flight
//! table maps a [`RequestKey`] to a weak handle on a `Shared` future; the
//! future removes its own entry before resolving, and an entry whose waiters
//! have all gone away is replaced by the next caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cadenza_common::auth::TokenAuthority;
use cadenza_common::transport::{Headers, HttpMethod, HttpRequest, HttpTransport};
use cadenza_common::{ErrorClassification, ErrorSeverity};
use cadenza_domain::constants::DEFAULT_RETRY_AFTER_SECS;
use cadenza_domain::{ApiError, AuthError, Capability, ClientConfig, DecodingError, Result, TokenSnapshot};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::errors::error_message;
use super::request::{ApiRequest, RequestKey};

type SharedCall = Shared<BoxFuture<'static, Result<RawResponse>>>;

/// Successful (2xx) response as received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
    /// Final request URL, used as the path in decoding errors
    pub url: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// True for 204 and for bodies that hold nothing but whitespace.
    pub fn is_empty(&self) -> bool {
        self.status == 204 || self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// Decode the body, short-circuiting empty responses.
    ///
    /// # Errors
    /// `ApiError::Decoding` when the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Decoded<T>> {
        if self.is_empty() {
            return Ok(Decoded::Empty);
        }
        serde_json::from_slice(&self.body)
            .map(Decoded::Value)
            .map_err(|err| DecodingError::new(&self.url, self.status, err.to_string()).into())
    }
}

/// Outcome of a decoded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded<T> {
    Value(T),
    /// 204 or an empty body; nothing was decoded
    Empty,
}

impl<T> Decoded<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Empty => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Empty => None,
        }
    }
}

struct InFlightRequest {
    id: u64,
    operation: WeakShared<BoxFuture<'static, Result<RawResponse>>>,
}

struct ExecutorInner {
    transport: Arc<dyn HttpTransport>,
    authority: TokenAuthority,
    api_base_url: String,
    max_rate_limit_retries: u32,
    in_flight: Mutex<HashMap<RequestKey, InFlightRequest>>,
    next_id: AtomicU64,
}

/// A call ready to hit the wire, minus the token
#[derive(Clone)]
struct PreparedCall {
    method: HttpMethod,
    url: Url,
    body: Option<Bytes>,
}

/// Executes [`ApiRequest`]s with token handling, de-duplication and the
/// 401/429 retry policy. Cheap to clone.
#[derive(Clone)]
pub struct RequestExecutor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("api_base_url", &self.inner.api_base_url)
            .field("max_rate_limit_retries", &self.inner.max_rate_limit_retries)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, authority: TokenAuthority, config: &ClientConfig) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                transport,
                authority,
                api_base_url: config.api_base_url.clone(),
                max_rate_limit_retries: config.max_rate_limit_retries,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.inner.authority
    }

    pub fn api_base_url(&self) -> &str {
        &self.inner.api_base_url
    }

    /// Execute `request` and decode the body into `T`.
    ///
    /// # Errors
    /// Any [`ApiError`]; see [`Self::perform_raw`].
    pub async fn perform<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<Decoded<T>> {
        self.perform_raw(request).await?.decode()
    }

    /// Execute `request` and require a non-empty body decodable as `T`.
    ///
    /// # Errors
    /// `ApiError::Decoding` for an empty body, otherwise as [`Self::perform`].
    pub async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let raw = self.perform_raw(request).await?;
        match raw.decode()? {
            Decoded::Value(value) => Ok(value),
            Decoded::Empty => Err(DecodingError::new(&raw.url, raw.status, "expected a body, got none").into()),
        }
    }

    /// Execute `request` and discard the body.
    ///
    /// # Errors
    /// Any [`ApiError`]; see [`Self::perform_raw`].
    pub async fn perform_unit(&self, request: ApiRequest) -> Result<()> {
        self.perform_raw(request).await.map(|_| ())
    }

    /// Execute `request` and return the undecoded 2xx response.
    ///
    /// # Errors
    /// - `ApiError::Validation` for user-only requests on an app-only
    ///   authority and for malformed paths, before any network call
    /// - `AuthError::Rejected` after a second 401
    /// - `ApiError::RateLimitExceeded` once the 429 budget is spent
    /// - `ApiError::Server` / `ApiError::Client` for other failure statuses
    /// - `ApiError::Transport` verbatim from the transport
    #[instrument(skip(self, request), fields(method = %request.method(), path = %request.path()))]
    pub async fn perform_raw(&self, request: ApiRequest) -> Result<RawResponse> {
        if request.needs_user() && self.inner.authority.capability() == Capability::AppOnly {
            return Err(ApiError::validation(
                "capability",
                format!("{} requires a user-authorized token; the client-credentials grant has none", request.path()),
            ));
        }

        let call = PreparedCall {
            method: request.method(),
            url: request.url(&self.inner.api_base_url)?,
            body: request.body().cloned(),
        };

        if !call.method.is_idempotent_read() {
            return self.inner.run(call).await;
        }
        let key = RequestKey::new(call.method, &call.url, call.body.as_ref());
        self.shared_call(key, call).await
    }

    /// Number of physical calls currently shared through the in-flight table.
    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().values().filter(|entry| entry.operation.upgrade().is_some()).count()
    }

    fn shared_call(&self, key: RequestKey, call: PreparedCall) -> SharedCall {
        let mut table = self.inner.in_flight.lock();

        if let Some(entry) = table.get(&key) {
            if let Some(operation) = entry.operation.upgrade() {
                debug!(id = entry.id, waiters = operation.strong_count().unwrap_or(0), "joining in-flight request");
                return operation;
            }
        }
        table.retain(|_, entry| entry.operation.upgrade().is_some());

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let release_key = key.clone();
        let operation = async move {
            let outcome = inner.run(call).await;
            inner.release(&release_key, id);
            outcome
        }
        .boxed()
        .shared();

        if let Some(weak) = operation.downgrade() {
            table.insert(key, InFlightRequest { id, operation: weak });
        }
        operation
    }
}

impl ExecutorInner {
    fn release(&self, key: &RequestKey, id: u64) {
        let mut table = self.in_flight.lock();
        if table.get(key).is_some_and(|entry| entry.id == id) {
            table.remove(key);
        }
    }

    async fn run(&self, call: PreparedCall) -> Result<RawResponse> {
        let outcome = self.execute(&call).await;
        if let Err(err) = &outcome {
            log_failure(&call, err);
        }
        outcome
    }

    async fn execute(&self, call: &PreparedCall) -> Result<RawResponse> {
        let mut token = self.authority.access_token(false).await?;
        let mut reauthorized = false;
        let mut rate_limited = 0u32;

        loop {
            let response = self.transport.send(call.to_http(&token)).await?;
            let status = response.status;

            match status {
                200..=299 => {
                    return Ok(RawResponse {
                        status,
                        headers: response.headers,
                        body: response.body,
                        url: call.url.to_string(),
                    });
                }
                401 => {
                    let www_authenticate = response.header("WWW-Authenticate").map(str::to_owned);
                    if reauthorized {
                        return Err(AuthError::Rejected {
                            message: error_message(status, &response.body),
                            www_authenticate,
                        }
                        .into());
                    }
                    debug!(url = %call.url, "access token rejected, refreshing once");
                    reauthorized = true;
                    token = self.authority.refresh_after_rejection(&token.access_token).await?;
                }
                429 => {
                    let retry_after = parse_retry_after(response.header("Retry-After"));
                    if rate_limited >= self.max_rate_limit_retries {
                        return Err(ApiError::RateLimitExceeded { retry_after });
                    }
                    rate_limited += 1;
                    warn!(
                        url = %call.url,
                        retry_after_secs = retry_after.as_secs(),
                        attempt = rate_limited,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                    token = self.authority.access_token(false).await?;
                }
                500.. => {
                    return Err(ApiError::Server { status, message: error_message(status, &response.body) });
                }
                _ => {
                    return Err(ApiError::Client { status, message: error_message(status, &response.body) });
                }
            }
        }
    }
}

impl PreparedCall {
    fn to_http(&self, token: &TokenSnapshot) -> HttpRequest {
        let mut request = HttpRequest::new(self.method, self.url.as_str())
            .header("Authorization", token.authorization_header())
            .header("Accept", "application/json");
        if let Some(body) = &self.body {
            request = request.header("Content-Type", "application/json").body(body.clone());
        }
        request
    }
}

/// Delta-seconds `Retry-After`; missing or unparsable values mean one second.
fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(Duration::from_secs(DEFAULT_RETRY_AFTER_SECS), Duration::from_secs)
}

fn log_failure(call: &PreparedCall, err: &ApiError) {
    match err.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => {
            error!(method = %call.method, url = %call.url, error = %err, "request failed");
        }
        ErrorSeverity::Warning => {
            warn!(method = %call.method, url = %call.url, error = %err, "request failed");
        }
        ErrorSeverity::Info => {
            debug!(method = %call.method, url = %call.url, error = %err, "request failed");
        }
    }
}
