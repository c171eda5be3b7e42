//! Integration tests for the request executor
//!
//! Drive the executor against the scripted transport and a counting grant:
//! de-duplication, the 401/429 recovery policy and status mapping.

use std::sync::Arc;
use std::time::Duration;

use cadenza_common::auth::{MemoryTokenStore, TokenAuthority};
use cadenza_common::testing::{expired_snapshot, fresh_snapshot, MockResponse, MockTokenGrant, MockTransport};
use cadenza_common::transport::HttpMethod;
use cadenza_domain::{ApiError, AuthError, ClientConfig, GrantKind, TransportErrorKind};
use cadenza_infra::{ApiRequest, Decoded, RequestExecutor};
use futures::future::join_all;
use serde_json::json;

const BASE: &str = "https://api.example.com/v1";

fn config() -> ClientConfig {
    ClientConfig { api_base_url: BASE.to_string(), ..ClientConfig::default() }
}

async fn seeded_executor(transport: Arc<MockTransport>, grant: Arc<MockTokenGrant>) -> RequestExecutor {
    let authority = TokenAuthority::new(grant, Arc::new(MemoryTokenStore::new()));
    authority.seed(fresh_snapshot("seeded", Some("refresh-0"))).await.expect("seed");
    RequestExecutor::new(transport, authority, &config())
}

fn user_grant() -> Arc<MockTokenGrant> {
    Arc::new(MockTokenGrant::new(GrantKind::Pkce))
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_reads_share_one_transport_call() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::json(200, json!({"id": "1", "name": "Abbey Road"})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let outcomes = join_all((0..10).map(|_| executor.perform_raw(ApiRequest::get("/albums/1")))).await;

    assert_eq!(transport.calls_to("/albums/1"), 1);
    let first = outcomes[0].as_ref().expect("shared response");
    assert!(outcomes.iter().all(|outcome| outcome.as_ref() == Ok(first)));
    assert_eq!(executor.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shared_failure_reaches_every_waiter() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::text(500, "boom"));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let outcomes = join_all((0..10).map(|_| executor.perform_raw(ApiRequest::get("/albums/1")))).await;

    assert_eq!(transport.calls_to("/albums/1"), 1);
    for outcome in outcomes {
        assert_eq!(outcome.unwrap_err(), ApiError::Server { status: 500, message: "boom".into() });
    }
}

#[tokio::test(start_paused = true)]
async fn relative_path_and_next_link_share_one_transport_call() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.on(HttpMethod::Get, "/me/tracks", MockResponse::json(200, json!({"items": []})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let (relative, next_link) = tokio::join!(
        executor.perform_raw(ApiRequest::get("/me/tracks?offset=20&limit=20")),
        executor.perform_raw(ApiRequest::get(format!("{BASE}/me/tracks?limit=20&offset=20"))),
    );

    assert_eq!(relative.expect("relative"), next_link.expect("next link"));
    assert_eq!(transport.calls_to("/me/tracks"), 1);
}

#[tokio::test(start_paused = true)]
async fn differing_queries_are_not_coalesced() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.on(HttpMethod::Get, "/search", MockResponse::json(200, json!({})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let (a, b) = tokio::join!(
        executor.perform_raw(ApiRequest::get("/search").query("q", "abba")),
        executor.perform_raw(ApiRequest::get("/search").query("q", "queen")),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls_to("/search"), 2);
}

#[tokio::test(start_paused = true)]
async fn mutating_requests_are_never_coalesced() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.on(HttpMethod::Post, "/playlists", MockResponse::json(201, json!({"id": "p"})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let body = json!({"name": "road trip"});
    let outcomes = join_all(
        (0..3).map(|_| executor.perform::<serde_json::Value>(ApiRequest::post("/playlists").json(&body).unwrap())),
    )
    .await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(transport.calls_to("/playlists"), 3);
}

#[tokio::test(start_paused = true)]
async fn expired_token_is_refreshed_once_for_concurrent_callers() {
    let transport = Arc::new(MockTransport::new());
    transport.on(HttpMethod::Get, "/me", MockResponse::json(200, json!({"id": "me"})));
    let grant = Arc::new(MockTokenGrant::new(GrantKind::Pkce).with_latency(Duration::from_millis(20)));
    let store = Arc::new(MemoryTokenStore::with_snapshot(expired_snapshot("stale", Some("refresh-0"))));
    let executor = RequestExecutor::new(
        Arc::clone(&transport) as _,
        TokenAuthority::new(Arc::clone(&grant) as _, store),
        &config(),
    );

    let outcomes = join_all(
        (0..10).map(|i| executor.perform_raw(ApiRequest::get("/me").query("market", i))),
    )
    .await;

    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(grant.refresh_count(), 1);
    assert_eq!(grant.refresh_tokens_seen(), vec!["refresh-0".to_string()]);
    assert!(transport.requests().iter().all(|r| r.headers.get("authorization") == Some("Bearer access-1")));
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_one_retry() {
    let transport = Arc::new(MockTransport::new());
    transport.on_sequence(
        HttpMethod::Get,
        "/me",
        vec![MockResponse::status(401), MockResponse::json(200, json!({"id": "me"}))],
    );
    let grant = user_grant();
    let executor = seeded_executor(Arc::clone(&transport), Arc::clone(&grant)).await;

    let me: serde_json::Value = executor.fetch(ApiRequest::get("/me")).await.expect("retried call succeeds");

    assert_eq!(me["id"], "me");
    assert_eq!(grant.refresh_count(), 1);
    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].headers.get("authorization"), Some("Bearer seeded"));
    assert_eq!(requests[1].headers.get("authorization"), Some("Bearer access-1"));
}

#[tokio::test]
async fn second_unauthorized_surfaces_rejected() {
    let transport = Arc::new(MockTransport::new());
    transport.on(
        HttpMethod::Get,
        "/me",
        MockResponse::status(401).with_header("WWW-Authenticate", r#"Bearer error="invalid_token""#),
    );
    let grant = user_grant();
    let executor = seeded_executor(Arc::clone(&transport), Arc::clone(&grant)).await;

    let err = executor.perform_unit(ApiRequest::get("/me")).await.unwrap_err();

    match err {
        ApiError::Auth(AuthError::Rejected { www_authenticate, .. }) => {
            assert_eq!(www_authenticate.as_deref(), Some(r#"Bearer error="invalid_token""#));
        }
        other => panic!("expected rejected, got {other:?}"),
    }
    assert_eq!(transport.calls_to("/me"), 2);
    assert_eq!(grant.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_call_waits_for_retry_after() {
    let transport = Arc::new(MockTransport::new());
    transport.on_sequence(
        HttpMethod::Get,
        "/albums/1",
        vec![
            MockResponse::status(429).with_header("Retry-After", "2"),
            MockResponse::json(200, json!({"id": "1"})),
        ],
    );
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let started = tokio::time::Instant::now();
    let outcome = executor.perform::<serde_json::Value>(ApiRequest::get("/albums/1")).await.unwrap();

    assert_eq!(outcome, Decoded::Value(json!({"id": "1"})));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.calls_to("/albums/1"), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_budget_is_bounded() {
    let transport = Arc::new(MockTransport::new());
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::status(429).with_header("Retry-After", "1"));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let err = executor.perform_unit(ApiRequest::get("/albums/1")).await.unwrap_err();

    assert_eq!(err, ApiError::RateLimitExceeded { retry_after: Duration::from_secs(1) });
    assert_eq!(transport.calls_to("/albums/1"), 4);
}

#[tokio::test(start_paused = true)]
async fn missing_retry_after_defaults_to_one_second() {
    let transport = Arc::new(MockTransport::new());
    transport.on_sequence(
        HttpMethod::Get,
        "/albums/1",
        vec![MockResponse::status(429), MockResponse::status(204)],
    );
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let started = tokio::time::Instant::now();
    executor.perform_unit(ApiRequest::get("/albums/1")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let transport = Arc::new(MockTransport::new());
    transport.on(
        HttpMethod::Get,
        "/albums/1",
        MockResponse::json(503, json!({"error": {"status": 503, "message": "Service unavailable"}})),
    );
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let err = executor.perform_unit(ApiRequest::get("/albums/1")).await.unwrap_err();

    assert_eq!(err, ApiError::Server { status: 503, message: "Service unavailable".into() });
    assert_eq!(transport.calls_to("/albums/1"), 1);
}

#[tokio::test]
async fn no_content_short_circuits_decoding() {
    let transport = Arc::new(MockTransport::new());
    transport.on(HttpMethod::Put, "/me/player/pause", MockResponse::status(204));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let outcome = executor.perform::<serde_json::Value>(ApiRequest::put("/me/player/pause")).await.unwrap();
    assert_eq!(outcome, Decoded::Empty);
}

#[tokio::test]
async fn transport_errors_pass_through_verbatim() {
    let transport = Arc::new(MockTransport::new());
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::transport_error(TransportErrorKind::Timeout, "slow"));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let err = executor.perform_unit(ApiRequest::get("/albums/1")).await.unwrap_err();

    assert!(matches!(err, ApiError::Transport(ref e) if e.kind == TransportErrorKind::Timeout));
    assert_eq!(transport.calls_to("/albums/1"), 1);
}

#[tokio::test]
async fn app_only_authority_rejects_user_requests_before_the_network() {
    let transport = Arc::new(MockTransport::new());
    transport.on(HttpMethod::Get, "/me", MockResponse::json(200, json!({})));
    let grant = Arc::new(MockTokenGrant::new(GrantKind::ClientCredentials));
    let executor = RequestExecutor::new(
        Arc::clone(&transport) as _,
        TokenAuthority::new(Arc::clone(&grant) as _, Arc::new(MemoryTokenStore::new())),
        &config(),
    );

    let err = executor.perform_unit(ApiRequest::get("/me").requires_user()).await.unwrap_err();

    assert!(matches!(err, ApiError::Validation(ref v) if v.field == "capability"));
    assert_eq!(transport.request_count(), 0);
    assert_eq!(grant.acquire_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_one_waiter_keeps_the_shared_call_alive() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(100)));
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::json(200, json!({"id": "1"})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let spawn_get = |executor: RequestExecutor| {
        tokio::spawn(async move { executor.perform_raw(ApiRequest::get("/albums/1")).await })
    };
    let first = spawn_get(executor.clone());
    let second = spawn_get(executor.clone());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(executor.in_flight_count(), 1);
    first.abort();

    let response = second.await.expect("task").expect("response");
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls_to("/albums/1"), 1);
    assert_eq!(executor.in_flight_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_call_is_replaced_by_the_next_request() {
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(100)));
    transport.on(HttpMethod::Get, "/albums/1", MockResponse::json(200, json!({"id": "1"})));
    let executor = seeded_executor(Arc::clone(&transport), user_grant()).await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), executor.perform_raw(ApiRequest::get("/albums/1"))).await;
    assert!(abandoned.is_err());
    assert_eq!(executor.in_flight_count(), 0);

    let response = executor.perform_raw(ApiRequest::get("/albums/1")).await.expect("fresh call");
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls_to("/albums/1"), 2);
}
